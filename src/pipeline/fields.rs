//! Filter-field whitelist for the [`StructuredFilterSet`].
//!
//! Every field the model may populate is listed here with its type. Values
//! arriving as JSON are parsed against the field's type; anything that does not
//! fit is reported back as a warning and left unset.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::pipeline::types::{
    DEFAULT_PAGE_NUMBER, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, SortDirection, SortField,
    StructuredFilterSet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Date,
    Count,
    Percentage,
    Page,
    PageSize,
    Sort,
    Direction,
}

impl FieldKind {
    fn label(self) -> &'static str {
        match self {
            Self::Text => "string",
            Self::Date => "date (YYYY-MM-DD)",
            Self::Count => "integer",
            Self::Percentage => "decimal 0-100",
            Self::Page => "integer >= 1",
            Self::PageSize => "integer 1-1000",
            Self::Sort => "sort field",
            Self::Direction => "\"asc\" or \"desc\"",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    StrategyName,
    StartDate,
    EndDate,
    MinTotalEmails,
    MaxTotalEmails,
    MinDelivered,
    MaxDelivered,
    MinOpened,
    MaxOpened,
    MinClicked,
    MaxClicked,
    MinDeliveryRatePercentage,
    MaxDeliveryRatePercentage,
    MinOpenRatePercentage,
    MaxOpenRatePercentage,
    MinClickRatePercentage,
    MaxClickRatePercentage,
    MinBounceRatePercentage,
    MaxBounceRatePercentage,
    PageNumber,
    PageSize,
    SortBy,
    SortDirection,
}

impl FilterField {
    pub const ALL: [FilterField; 23] = [
        Self::StrategyName,
        Self::StartDate,
        Self::EndDate,
        Self::MinTotalEmails,
        Self::MaxTotalEmails,
        Self::MinDelivered,
        Self::MaxDelivered,
        Self::MinOpened,
        Self::MaxOpened,
        Self::MinClicked,
        Self::MaxClicked,
        Self::MinDeliveryRatePercentage,
        Self::MaxDeliveryRatePercentage,
        Self::MinOpenRatePercentage,
        Self::MaxOpenRatePercentage,
        Self::MinClickRatePercentage,
        Self::MaxClickRatePercentage,
        Self::MinBounceRatePercentage,
        Self::MaxBounceRatePercentage,
        Self::PageNumber,
        Self::PageSize,
        Self::SortBy,
        Self::SortDirection,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::StrategyName => "StrategyName",
            Self::StartDate => "StartDate",
            Self::EndDate => "EndDate",
            Self::MinTotalEmails => "MinTotalEmails",
            Self::MaxTotalEmails => "MaxTotalEmails",
            Self::MinDelivered => "MinDelivered",
            Self::MaxDelivered => "MaxDelivered",
            Self::MinOpened => "MinOpened",
            Self::MaxOpened => "MaxOpened",
            Self::MinClicked => "MinClicked",
            Self::MaxClicked => "MaxClicked",
            Self::MinDeliveryRatePercentage => "MinDeliveryRatePercentage",
            Self::MaxDeliveryRatePercentage => "MaxDeliveryRatePercentage",
            Self::MinOpenRatePercentage => "MinOpenRatePercentage",
            Self::MaxOpenRatePercentage => "MaxOpenRatePercentage",
            Self::MinClickRatePercentage => "MinClickRatePercentage",
            Self::MaxClickRatePercentage => "MaxClickRatePercentage",
            Self::MinBounceRatePercentage => "MinBounceRatePercentage",
            Self::MaxBounceRatePercentage => "MaxBounceRatePercentage",
            Self::PageNumber => "PageNumber",
            Self::PageSize => "PageSize",
            Self::SortBy => "SortBy",
            Self::SortDirection => "SortDirection",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Self::StrategyName => FieldKind::Text,
            Self::StartDate | Self::EndDate => FieldKind::Date,
            Self::MinTotalEmails
            | Self::MaxTotalEmails
            | Self::MinDelivered
            | Self::MaxDelivered
            | Self::MinOpened
            | Self::MaxOpened
            | Self::MinClicked
            | Self::MaxClicked => FieldKind::Count,
            Self::MinDeliveryRatePercentage
            | Self::MaxDeliveryRatePercentage
            | Self::MinOpenRatePercentage
            | Self::MaxOpenRatePercentage
            | Self::MinClickRatePercentage
            | Self::MaxClickRatePercentage
            | Self::MinBounceRatePercentage
            | Self::MaxBounceRatePercentage => FieldKind::Percentage,
            Self::PageNumber => FieldKind::Page,
            Self::PageSize => FieldKind::PageSize,
            Self::SortBy => FieldKind::Sort,
            Self::SortDirection => FieldKind::Direction,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::StrategyName => "campaign/strategy name, partial match",
            Self::StartDate => "earliest first-send date",
            Self::EndDate => "latest first-send date",
            Self::MinTotalEmails | Self::MaxTotalEmails => "bound on total emails sent",
            Self::MinDelivered | Self::MaxDelivered => "bound on delivered count",
            Self::MinOpened | Self::MaxOpened => "bound on opened count",
            Self::MinClicked | Self::MaxClicked => "bound on clicked count",
            Self::MinDeliveryRatePercentage | Self::MaxDeliveryRatePercentage => {
                "bound on delivery rate percentage"
            }
            Self::MinOpenRatePercentage | Self::MaxOpenRatePercentage => {
                "bound on open rate percentage"
            }
            Self::MinClickRatePercentage | Self::MaxClickRatePercentage => {
                "bound on click rate percentage"
            }
            Self::MinBounceRatePercentage | Self::MaxBounceRatePercentage => {
                "bound on bounce rate percentage"
            }
            Self::PageNumber => "result page, starting at 1",
            Self::PageSize => "rows per page",
            Self::SortBy => "ordering column",
            Self::SortDirection => "ordering direction",
        }
    }

    /// Look up a field by name, ignoring case.
    pub fn parse(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(key))
    }

    /// One prompt line per field: `- Name (type): description`.
    pub fn prompt_listing() -> String {
        let mut out = String::new();
        for field in Self::ALL {
            out.push_str(&format!(
                "- {} ({}): {}\n",
                field.name(),
                field.kind().label(),
                field.description()
            ));
        }
        let sorts: Vec<&str> = SortField::ALL.iter().map(|s| s.as_str()).collect();
        out.push_str(&format!("  SortBy accepts: {}\n", sorts.join(", ")));
        out
    }
}

/// A value parsed against a field's type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Count(i64),
    Percentage(Decimal),
    Page(u32),
    Sort(SortField),
    Direction(SortDirection),
}

/// Parse a JSON value for `field`. `Ok(None)` for null/blank (silently skipped).
pub fn parse_value(field: FilterField, value: &Value) -> Result<Option<FieldValue>, String> {
    if value.is_null() || value.as_str().is_some_and(|s| s.trim().is_empty()) {
        return Ok(None);
    }
    let bad = |expected: &str| format!("{} expects {expected}, got {value}", field.name());

    let parsed = match field.kind() {
        FieldKind::Text => match value {
            Value::String(s) => FieldValue::Text(s.trim().to_string()),
            _ => return Err(bad("a string")),
        },
        FieldKind::Date => {
            let raw = value.as_str().ok_or_else(|| bad("a date string"))?;
            FieldValue::Date(parse_date(raw).ok_or_else(|| bad("YYYY-MM-DD"))?)
        }
        FieldKind::Count => {
            let n = as_integer(value).ok_or_else(|| bad("an integer"))?;
            if n < 0 {
                return Err(bad("a non-negative integer"));
            }
            FieldValue::Count(n)
        }
        FieldKind::Percentage => {
            let d = as_decimal(value).ok_or_else(|| bad("a number"))?;
            if d < Decimal::ZERO || d > Decimal::ONE_HUNDRED {
                return Err(bad("a percentage between 0 and 100"));
            }
            FieldValue::Percentage(d)
        }
        FieldKind::Page | FieldKind::PageSize => {
            let n = as_integer(value).ok_or_else(|| bad("an integer"))?;
            FieldValue::Page(u32::try_from(n.max(0)).unwrap_or(u32::MAX))
        }
        FieldKind::Sort => {
            let raw = value.as_str().ok_or_else(|| bad("a sort field name"))?;
            FieldValue::Sort(SortField::parse_or_default(raw))
        }
        FieldKind::Direction => {
            let raw = value.as_str().ok_or_else(|| bad("asc or desc"))?;
            FieldValue::Direction(SortDirection::parse(raw).ok_or_else(|| bad("asc or desc"))?)
        }
    };
    Ok(Some(parsed))
}

/// Store a parsed value in the filter set. Returns `false` on a type mismatch.
pub fn apply(filters: &mut StructuredFilterSet, field: FilterField, value: FieldValue) -> bool {
    use FieldValue as V;
    use FilterField as F;

    match (field, value) {
        (F::StrategyName, V::Text(s)) => filters.strategy_name = Some(s),
        (F::StartDate, V::Date(d)) => filters.start_date = Some(d),
        (F::EndDate, V::Date(d)) => filters.end_date = Some(d),
        (F::MinTotalEmails, V::Count(n)) => filters.min_total_emails = Some(n),
        (F::MaxTotalEmails, V::Count(n)) => filters.max_total_emails = Some(n),
        (F::MinDelivered, V::Count(n)) => filters.min_delivered = Some(n),
        (F::MaxDelivered, V::Count(n)) => filters.max_delivered = Some(n),
        (F::MinOpened, V::Count(n)) => filters.min_opened = Some(n),
        (F::MaxOpened, V::Count(n)) => filters.max_opened = Some(n),
        (F::MinClicked, V::Count(n)) => filters.min_clicked = Some(n),
        (F::MaxClicked, V::Count(n)) => filters.max_clicked = Some(n),
        (F::MinDeliveryRatePercentage, V::Percentage(d)) => {
            filters.min_delivery_rate_percentage = Some(d)
        }
        (F::MaxDeliveryRatePercentage, V::Percentage(d)) => {
            filters.max_delivery_rate_percentage = Some(d)
        }
        (F::MinOpenRatePercentage, V::Percentage(d)) => filters.min_open_rate_percentage = Some(d),
        (F::MaxOpenRatePercentage, V::Percentage(d)) => filters.max_open_rate_percentage = Some(d),
        (F::MinClickRatePercentage, V::Percentage(d)) => {
            filters.min_click_rate_percentage = Some(d)
        }
        (F::MaxClickRatePercentage, V::Percentage(d)) => {
            filters.max_click_rate_percentage = Some(d)
        }
        (F::MinBounceRatePercentage, V::Percentage(d)) => {
            filters.min_bounce_rate_percentage = Some(d)
        }
        (F::MaxBounceRatePercentage, V::Percentage(d)) => {
            filters.max_bounce_rate_percentage = Some(d)
        }
        (F::PageNumber, V::Page(n)) => filters.page_number = n,
        (F::PageSize, V::Page(n)) => filters.page_size = n,
        (F::SortBy, V::Sort(s)) => filters.sort_by = s,
        (F::SortDirection, V::Direction(d)) => filters.sort_direction = d,
        _ => return false,
    }
    true
}

/// Apply pagination defaults and caps. Returns the fields that were reset
/// to their defaults.
pub fn normalize(filters: &mut StructuredFilterSet) -> Vec<FilterField> {
    let mut defaulted = Vec::new();
    if filters.page_number == 0 {
        filters.page_number = DEFAULT_PAGE_NUMBER;
        defaulted.push(FilterField::PageNumber);
    }
    if filters.page_size == 0 {
        filters.page_size = DEFAULT_PAGE_SIZE;
        defaulted.push(FilterField::PageSize);
    }
    filters.page_size = filters.page_size.min(MAX_PAGE_SIZE);
    defaulted
}

/// Accepts `YYYY-MM-DD`, or an ISO datetime whose date part is used.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}
