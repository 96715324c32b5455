//! Shared types for query resolution.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// View queried by the trigger-report filter path.
pub const TRIGGER_REPORT_VIEW: &str = "email_trigger_report";

pub const DEFAULT_PAGE_NUMBER: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 1000;

// ── Intent ──────────────────────────────────────────────────────────

/// Coarse category of what the user is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentTag {
    #[default]
    Campaigns,
    Recipients,
    Events,
    Metrics,
    Lists,
}

impl IntentTag {
    /// Predicate fields accepted for this entity.
    pub fn allowed_fields(self) -> &'static [&'static str] {
        match self {
            Self::Campaigns => &[
                "name",
                "status",
                "sent_at",
                "total_emails",
                "opens",
                "clicks",
                "bounces",
                "open_rate",
                "click_rate",
                "bounce_rate",
                "delivery_rate",
            ],
            Self::Recipients => &["email", "status", "list_id", "segment", "subscribed_at"],
            Self::Events => &["event_type", "campaign_id", "recipient_id", "occurred_at"],
            Self::Metrics => &["metric", "period"],
            Self::Lists => &["name", "created_at", "subscriber_count"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Campaigns => "campaigns",
            Self::Recipients => "recipients",
            Self::Events => "events",
            Self::Metrics => "metrics",
            Self::Lists => "lists",
        }
    }

    /// Lenient parse of a model-provided intent label.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "campaigns" | "campaign" => Some(Self::Campaigns),
            "recipients" | "recipient" => Some(Self::Recipients),
            "events" | "event" => Some(Self::Events),
            "metrics" | "metric" => Some(Self::Metrics),
            "lists" | "list" => Some(Self::Lists),
            _ => None,
        }
    }
}

impl fmt::Display for IntentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Filter predicates ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    Contains,
    GreaterThan,
    LessThan,
    /// Inclusive lower bound.
    AtLeast,
    /// Inclusive upper bound.
    AtMost,
    Between,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PredicateValue {
    Text(String),
    Number(Decimal),
    Date(NaiveDate),
    DateRange(NaiveDate, NaiveDate),
}

/// One constraint narrowing a result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub field: String,
    pub operator: FilterOperator,
    pub value: PredicateValue,
}

impl FilterPredicate {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: PredicateValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Render as a SQL condition. `None` when operator and value don't fit together.
    pub fn to_sql(&self) -> Option<String> {
        let field = &self.field;
        let symbol = match self.operator {
            FilterOperator::Equals => "=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::LessThan => "<",
            FilterOperator::AtLeast => ">=",
            FilterOperator::AtMost => "<=",
            FilterOperator::Contains => {
                return match &self.value {
                    PredicateValue::Text(text) => Some(format!(
                        "LOWER({field}) LIKE '%{}%'",
                        escape_sql(&text.to_lowercase())
                    )),
                    _ => None,
                };
            }
            FilterOperator::Between => {
                return match &self.value {
                    PredicateValue::DateRange(start, end) => {
                        Some(format!("{field} BETWEEN '{start}' AND '{end}'"))
                    }
                    _ => None,
                };
            }
        };

        let literal = match &self.value {
            PredicateValue::Text(text) => format!("'{}'", escape_sql(text)),
            PredicateValue::Number(n) => n.normalize().to_string(),
            PredicateValue::Date(d) => format!("'{d}'"),
            PredicateValue::DateRange(..) => return None,
        };
        Some(format!("{field} {symbol} {literal}"))
    }
}

/// Escape a value for use inside a single-quoted SQL string.
pub fn escape_sql(value: &str) -> String {
    value.replace('\'', "''")
}

// ── Query intent ────────────────────────────────────────────────────

/// What a request asks for, built once per request and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryIntent {
    tag: IntentTag,
    entities: BTreeMap<String, String>,
    predicates: Vec<FilterPredicate>,
    limit: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dropped_fields: Vec<String>,
}

impl QueryIntent {
    pub fn builder(tag: IntentTag) -> QueryIntentBuilder {
        QueryIntentBuilder {
            intent: QueryIntent {
                tag,
                entities: BTreeMap::new(),
                predicates: Vec::new(),
                limit: None,
                dropped_fields: Vec::new(),
            },
        }
    }

    pub fn tag(&self) -> IntentTag {
        self.tag
    }

    pub fn entities(&self) -> &BTreeMap<String, String> {
        &self.entities
    }

    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(String::as_str)
    }

    pub fn predicates(&self) -> &[FilterPredicate] {
        &self.predicates
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Predicate fields rejected by the entity whitelist.
    pub fn dropped_fields(&self) -> &[String] {
        &self.dropped_fields
    }

    /// `AND`-joined SQL conditions for every predicate.
    pub fn where_clause(&self) -> Option<String> {
        let conditions: Vec<String> = self.predicates.iter().filter_map(|p| p.to_sql()).collect();
        if conditions.is_empty() {
            None
        } else {
            Some(conditions.join(" AND "))
        }
    }
}

pub struct QueryIntentBuilder {
    intent: QueryIntent,
}

impl QueryIntentBuilder {
    pub fn entity(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.intent.entities.insert(key.into(), value.to_string());
        self
    }

    /// Add a predicate if its field is whitelisted for the intent's entity.
    pub fn predicate(mut self, predicate: FilterPredicate) -> Self {
        if self.intent.tag.allowed_fields().contains(&predicate.field.as_str()) {
            self.intent.predicates.push(predicate);
        } else {
            warn!(
                field = %predicate.field,
                entity = %self.intent.tag,
                "Dropping predicate on unknown field"
            );
            self.intent.dropped_fields.push(predicate.field);
        }
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.intent.limit = Some(limit);
        self
    }

    pub fn build(self) -> QueryIntent {
        self.intent
    }
}

// ── Structured filter set ───────────────────────────────────────────

/// Orderings accepted by the trigger-report query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortField {
    #[default]
    StrategyName,
    FirstEmailSent,
    TotalEmails,
    Delivered,
    Opened,
    Clicked,
    DeliveryRate,
    OpenRate,
    ClickRate,
    BounceRate,
}

impl SortField {
    pub const ALL: [SortField; 10] = [
        Self::StrategyName,
        Self::FirstEmailSent,
        Self::TotalEmails,
        Self::Delivered,
        Self::Opened,
        Self::Clicked,
        Self::DeliveryRate,
        Self::OpenRate,
        Self::ClickRate,
        Self::BounceRate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StrategyName => "StrategyName",
            Self::FirstEmailSent => "FirstEmailSent",
            Self::TotalEmails => "TotalEmails",
            Self::Delivered => "Delivered",
            Self::Opened => "Opened",
            Self::Clicked => "Clicked",
            Self::DeliveryRate => "DeliveryRate",
            Self::OpenRate => "OpenRate",
            Self::ClickRate => "ClickRate",
            Self::BounceRate => "BounceRate",
        }
    }

    /// Match ignoring case, spaces, underscores and dashes, plus a few aliases.
    pub fn parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        if let Some(field) = Self::ALL
            .iter()
            .find(|f| f.as_str().to_ascii_lowercase() == key)
        {
            return Some(*field);
        }
        match key.as_str() {
            "name" | "campaign" | "campaignname" | "strategy" => Some(Self::StrategyName),
            "date" | "sent" | "sentdate" | "firstsent" => Some(Self::FirstEmailSent),
            "emails" | "total" | "volume" | "sends" => Some(Self::TotalEmails),
            "deliveries" => Some(Self::Delivered),
            "opens" => Some(Self::Opened),
            "clicks" => Some(Self::Clicked),
            "deliverability" | "deliveryratepercentage" => Some(Self::DeliveryRate),
            "openratepercentage" => Some(Self::OpenRate),
            "ctr" | "clickthroughrate" | "clickratepercentage" => Some(Self::ClickRate),
            "bounces" | "bounced" | "bounceratepercentage" => Some(Self::BounceRate),
            _ => None,
        }
    }

    /// Like [`SortField::parse`], but unknown names fall back to the default.
    pub fn parse_or_default(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|| {
            warn!(sort_by = %raw, "Unknown sort field, using StrategyName");
            Self::default()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(Self::Asc),
            "desc" | "descending" => Some(Self::Desc),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Fixed-schema filter object for the trigger-report query path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StructuredFilterSet {
    pub strategy_name: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub min_total_emails: Option<i64>,
    pub max_total_emails: Option<i64>,
    pub min_delivered: Option<i64>,
    pub max_delivered: Option<i64>,
    pub min_opened: Option<i64>,
    pub max_opened: Option<i64>,
    pub min_clicked: Option<i64>,
    pub max_clicked: Option<i64>,
    pub min_delivery_rate_percentage: Option<Decimal>,
    pub max_delivery_rate_percentage: Option<Decimal>,
    pub min_open_rate_percentage: Option<Decimal>,
    pub max_open_rate_percentage: Option<Decimal>,
    pub min_click_rate_percentage: Option<Decimal>,
    pub max_click_rate_percentage: Option<Decimal>,
    pub min_bounce_rate_percentage: Option<Decimal>,
    pub max_bounce_rate_percentage: Option<Decimal>,
    pub page_number: u32,
    pub page_size: u32,
    pub sort_by: SortField,
    pub sort_direction: SortDirection,
}

impl Default for StructuredFilterSet {
    fn default() -> Self {
        Self {
            strategy_name: None,
            start_date: None,
            end_date: None,
            min_total_emails: None,
            max_total_emails: None,
            min_delivered: None,
            max_delivered: None,
            min_opened: None,
            max_opened: None,
            min_clicked: None,
            max_clicked: None,
            min_delivery_rate_percentage: None,
            max_delivery_rate_percentage: None,
            min_open_rate_percentage: None,
            max_open_rate_percentage: None,
            min_click_rate_percentage: None,
            max_click_rate_percentage: None,
            min_bounce_rate_percentage: None,
            max_bounce_rate_percentage: None,
            page_number: DEFAULT_PAGE_NUMBER,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: SortField::default(),
            sort_direction: SortDirection::default(),
        }
    }
}

impl StructuredFilterSet {
    /// Row offset for the current page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page_number.saturating_sub(1)) * u64::from(self.page_size)
    }

    /// Render as a read-only SELECT over the trigger-report view.
    pub fn to_sql(&self) -> String {
        let mut conditions = Vec::new();

        if let Some(name) = &self.strategy_name {
            conditions.push(format!(
                "LOWER(StrategyName) LIKE '%{}%'",
                escape_sql(&name.to_lowercase())
            ));
        }
        if let Some(start) = self.start_date {
            conditions.push(format!("FirstEmailSent >= '{start}'"));
        }
        if let Some(end) = self.end_date {
            conditions.push(format!("FirstEmailSent <= '{end}'"));
        }

        let counts = [
            ("TotalEmails", self.min_total_emails, self.max_total_emails),
            ("Delivered", self.min_delivered, self.max_delivered),
            ("Opened", self.min_opened, self.max_opened),
            ("Clicked", self.min_clicked, self.max_clicked),
        ];
        for (column, min, max) in counts {
            if let Some(min) = min {
                conditions.push(format!("{column} >= {min}"));
            }
            if let Some(max) = max {
                conditions.push(format!("{column} <= {max}"));
            }
        }

        let rates = [
            (
                "DeliveryRate",
                self.min_delivery_rate_percentage,
                self.max_delivery_rate_percentage,
            ),
            (
                "OpenRate",
                self.min_open_rate_percentage,
                self.max_open_rate_percentage,
            ),
            (
                "ClickRate",
                self.min_click_rate_percentage,
                self.max_click_rate_percentage,
            ),
            (
                "BounceRate",
                self.min_bounce_rate_percentage,
                self.max_bounce_rate_percentage,
            ),
        ];
        for (column, min, max) in rates {
            if let Some(min) = min {
                conditions.push(format!("{column} >= {}", min.normalize()));
            }
            if let Some(max) = max {
                conditions.push(format!("{column} <= {}", max.normalize()));
            }
        }

        let mut sql = format!("SELECT * FROM {TRIGGER_REPORT_VIEW}");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY {} {} LIMIT {} OFFSET {}",
            self.sort_by.as_str(),
            self.sort_direction.as_sql(),
            self.page_size,
            self.offset()
        ));
        sql
    }
}

// ── Extraction result ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Model,
    Rules,
}

/// Outcome of turning free text into a [`StructuredFilterSet`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub success: bool,
    pub filters: StructuredFilterSet,
    pub explanation: String,
    pub confidence: f32,
    pub source: ExtractionSource,
    /// Raw model output, for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    /// Names of the fields that were actually populated.
    pub extracted_parameters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the model path was abandoned, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ExtractionResult {
    pub fn failure(error: impl Into<String>, source: ExtractionSource) -> Self {
        Self {
            success: false,
            filters: StructuredFilterSet::default(),
            explanation: String::new(),
            confidence: 0.0,
            source,
            raw_output: None,
            extracted_parameters: Vec::new(),
            error: Some(error.into()),
            fallback_reason: None,
            warnings: Vec::new(),
        }
    }
}

// ── Request / response envelope ─────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub include_debug_info: bool,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: None,
            include_debug_info: false,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_debug_info(mut self) -> Self {
        self.include_debug_info = true;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub request_id: String,
    pub strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_model_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped_fields: Vec<String>,
}

/// Response envelope handed to the API layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub original_query: String,
    pub intent: IntentTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_sql: Option<String>,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_reports: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    pub explanation: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<DebugInfo>,
    pub processing_time_ms: u64,
}
