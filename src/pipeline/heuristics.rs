//! Rule-based extraction of a [`StructuredFilterSet`] from free text.
//!
//! Deterministic and model-free: used as the only path under the rule-based
//! strategy and as the fallback when the model is unavailable or its output
//! is unusable. It understands campaign names, relative and absolute periods,
//! count and rate thresholds, sort phrases and paging.

use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::pipeline::fields::{FilterField, parse_date};
use crate::pipeline::types::{MAX_PAGE_SIZE, SortDirection, SortField, StructuredFilterSet};

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in pattern compiles")
}

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";

static QUOTED_NAME: LazyLock<Regex> = LazyLock::new(|| re(r#"["“]([^"“”]{2,80})["”]"#));
static NAMED: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(?:named|called|name contains|containing)\s+([A-Za-z0-9][A-Za-z0-9 &'\-]*?)(?:\s+(?:from|with|in|sent|that|and|sorted|ordered|since|before|after|during)\b|[,.;?!]|$)")
});
static LAST_N_DAYS: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(?:last|past|previous)\s+(\d{1,4})\s+days?\b"));
static RELATIVE_PERIOD: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(today|yesterday|this week|last week|this month|last month|this year|last year)\b")
});
static MONTH_WITH_YEAR: LazyLock<Regex> =
    LazyLock::new(|| re(&format!(r"(?i)\b({MONTHS})\s+(\d{{4}})\b")));
static MONTH_AFTER_PREPOSITION: LazyLock<Regex> =
    LazyLock::new(|| re(&format!(r"(?i)\b(?:in|during|from|for|of)\s+({MONTHS})\b")));
static DATE_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(?:between|from)\s+(\d{4}-\d{2}-\d{2})\s+(?:to|and|until|-)\s+(\d{4}-\d{2}-\d{2})")
});
static DATE_START: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(?:since|after|from)\s+(\d{4}-\d{2}-\d{2})"));
static DATE_END: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(?:before|until|through|to)\s+(\d{4}-\d{2}-\d{2})"));
static COUNT_THRESHOLD: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(more than|greater than|over|above|at least|minimum of|min|less than|fewer than|under|below|at most|maximum of|max)\s+(\d[\d,]*)\s+(emails?|sends?|messages?|delivered|deliveries|opens|opened|clicks|clicked)\b")
});
static RATE_THRESHOLD: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(open|click|delivery|bounce|ctr|click-through)(?:\s+rates?)?\s+(?:of\s+|is\s+)?(above|over|greater than|more than|at least|below|under|less than|at most|>=|<=|>|<)\s*(\d{1,3}(?:\.\d+)?)\s*%?")
});
static RATE_THRESHOLD_REVERSED: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(above|over|more than|at least|below|under|less than|at most)\s+(\d{1,3}(?:\.\d+)?)\s*%\s+(open|click|delivery|bounce)")
});
static RATE_QUALITATIVE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(high|higher|good|strong|great|best|low|lower|poor|weak|bad|worst)\s+(open|click|delivery|bounce|click-through)(?:\s+rates?)?\b")
});
static SORT_BY: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(?:sort(?:ed)?|order(?:ed)?|rank(?:ed)?)\s+by\s+([a-z][a-z _\-]*?)(?:\s+(asc(?:ending)?|desc(?:ending)?))?(?:\s+(?:and|with|from|for|in|on|page)\b|[,.;?!]|$)")
});
static TOP_N: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(top|best|highest|worst|lowest|bottom)\s+(\d{1,4})\b")
});
static PAGE_NUMBER: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bpage\s+(\d{1,5})\b"));
static PAGE_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(\d{1,4})\s+(?:per page|results|rows|items|records)\b|\b(?:limit|first)\s+(\d{1,4})\b")
});

/// Words that never form part of a campaign name.
const NAME_STOPWORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "best", "by", "display", "email", "emails", "find",
    "for", "from", "get", "give", "high", "highest", "in", "latest", "list", "low", "lowest",
    "me", "my", "new", "of", "old", "on", "or", "our", "performing", "recent", "show", "some",
    "that", "the", "top", "trigger", "underperforming", "were", "what", "which", "with", "worst",
    "active", "sent", "last", "this", "see", "fetch", "pull", "up", "summarize", "summarise",
    "retrieve", "return", "count", "compare", "analyze", "analyse", "how", "many", "much", "who",
    "when", "where", "why", "did", "do", "does", "had", "has", "have", "was", "is", "can", "could",
    "would", "please", "only", "these", "those", "every", "each", "total",
];

/// Output of the rule-based extractor.
#[derive(Debug, Clone)]
pub struct HeuristicExtraction {
    pub filters: StructuredFilterSet,
    /// Populated fields, in the order they were found.
    pub populated: Vec<FilterField>,
    /// Short descriptions of what matched, for the explanation text.
    pub notes: Vec<String>,
}

impl HeuristicExtraction {
    pub fn extracted_parameters(&self) -> Vec<String> {
        self.populated.iter().map(|f| f.name().to_string()).collect()
    }

    pub fn explanation(&self) -> String {
        if self.notes.is_empty() {
            "Rule-based extraction found no filters; showing all campaigns".to_string()
        } else {
            format!("Rule-based extraction: {}", self.notes.join("; "))
        }
    }

    fn mark(&mut self, field: FilterField) {
        if !self.populated.contains(&field) {
            self.populated.push(field);
        }
    }
}

/// Extract filters from `query`, resolving relative dates against `today`.
pub fn extract_filters(query: &str, today: NaiveDate) -> HeuristicExtraction {
    let mut out = HeuristicExtraction {
        filters: StructuredFilterSet::default(),
        populated: Vec::new(),
        notes: Vec::new(),
    };

    extract_name(query, &mut out);
    extract_dates(query, today, &mut out);
    extract_count_thresholds(query, &mut out);
    extract_rate_thresholds(query, &mut out);
    extract_sort(query, &mut out);
    extract_paging(query, &mut out);

    out
}

fn extract_name(query: &str, out: &mut HeuristicExtraction) {
    let name = QUOTED_NAME
        .captures(query)
        .or_else(|| NAMED.captures(query))
        .map(|c| c[1].trim().to_string())
        .or_else(|| name_before_keyword(query));

    if let Some(name) = name.filter(|n| !n.is_empty()) {
        out.notes.push(format!("name contains \"{name}\""));
        out.filters.strategy_name = Some(name);
        out.mark(FilterField::StrategyName);
    }
}

/// Capitalised words directly preceding "campaign(s)", e.g. "Find *Black Friday* campaigns".
fn name_before_keyword(query: &str) -> Option<String> {
    let words: Vec<&str> = query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '&' && c != '\''))
        .collect();
    let keyword = words.iter().position(|w| {
        matches!(
            w.to_ascii_lowercase().as_str(),
            "campaign" | "campaigns" | "strategy" | "strategies"
        )
    })?;

    let mut name: Vec<&str> = words[..keyword]
        .iter()
        .rev()
        .take_while(|w| {
            let lower = w.to_ascii_lowercase();
            w.starts_with(|c: char| c.is_uppercase())
                && !NAME_STOPWORDS.contains(&lower.as_str())
                && !w.chars().all(|c| c.is_ascii_digit())
        })
        .copied()
        .collect();
    name.reverse();

    if name.is_empty() {
        None
    } else {
        Some(name.join(" "))
    }
}

fn extract_dates(query: &str, today: NaiveDate, out: &mut HeuristicExtraction) {
    let range = if let Some(c) = DATE_RANGE.captures(query) {
        match (parse_date(&c[1]), parse_date(&c[2])) {
            (Some(start), Some(end)) => Some((Some(start), Some(end), format!("{start} to {end}"))),
            _ => None,
        }
    } else if let Some(c) = LAST_N_DAYS.captures(query) {
        c[1].parse::<i64>().ok().map(|days| {
            (
                Some(today - Duration::days(days)),
                Some(today),
                format!("last {days} days"),
            )
        })
    } else if let Some(c) = RELATIVE_PERIOD.captures(query) {
        let phrase = c[1].to_ascii_lowercase();
        relative_period(&phrase, today).map(|(start, end)| (Some(start), Some(end), phrase))
    } else if let Some(c) = MONTH_WITH_YEAR.captures(query) {
        let year = c[2].parse::<i32>().ok();
        month_number(&c[1])
            .zip(year)
            .and_then(|(month, year)| month_range(year, month))
            .map(|(start, end)| (Some(start), Some(end), format!("{} {}", &c[1], &c[2])))
    } else if let Some(c) = MONTH_AFTER_PREPOSITION.captures(query) {
        month_number(&c[1]).and_then(|month| {
            // A month later than the current one means last year's.
            let year = if month > today.month() {
                today.year() - 1
            } else {
                today.year()
            };
            month_range(year, month).map(|(start, end)| (Some(start), Some(end), c[1].to_string()))
        })
    } else {
        let start = DATE_START.captures(query).and_then(|c| parse_date(&c[1]));
        let end = DATE_END.captures(query).and_then(|c| parse_date(&c[1]));
        if start.is_some() || end.is_some() {
            Some((start, end, "explicit date bounds".to_string()))
        } else {
            None
        }
    };

    if let Some((start, end, label)) = range {
        if let Some(start) = start {
            out.filters.start_date = Some(start);
            out.mark(FilterField::StartDate);
        }
        if let Some(end) = end {
            out.filters.end_date = Some(end);
            out.mark(FilterField::EndDate);
        }
        out.notes.push(format!("period: {label}"));
    }
}

/// Resolve a relative period phrase to an inclusive date range.
pub fn relative_period(phrase: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    match phrase {
        "today" => Some((today, today)),
        "yesterday" => {
            let day = today - Duration::days(1);
            Some((day, day))
        }
        "this week" => {
            let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
            Some((monday, today))
        }
        "last week" => {
            let monday = today
                - Duration::days(i64::from(today.weekday().num_days_from_monday()))
                - Duration::days(7);
            Some((monday, monday + Duration::days(6)))
        }
        "this month" => Some((today.with_day(1)?, today)),
        "last month" => {
            let end = today.with_day(1)? - Duration::days(1);
            Some((end.with_day(1)?, end))
        }
        "this year" => Some((NaiveDate::from_ymd_opt(today.year(), 1, 1)?, today)),
        "last year" => Some((
            NaiveDate::from_ymd_opt(today.year() - 1, 1, 1)?,
            NaiveDate::from_ymd_opt(today.year() - 1, 12, 31)?,
        )),
        _ => None,
    }
}

/// First and last day of a calendar month.
pub fn month_range(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((start, next - Duration::days(1)))
}

/// Month number for a full or abbreviated English month name.
pub fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// `true` for comparators that set a lower bound.
fn is_lower_bound(comparator: &str) -> bool {
    matches!(
        comparator.to_ascii_lowercase().as_str(),
        "more than" | "greater than" | "over" | "above" | "at least" | "minimum of" | "min" | ">"
            | ">="
    )
}

fn extract_count_thresholds(query: &str, out: &mut HeuristicExtraction) {
    for c in COUNT_THRESHOLD.captures_iter(query) {
        let Ok(value) = c[2].replace(',', "").parse::<i64>() else {
            continue;
        };
        let lower = is_lower_bound(&c[1]);
        let unit = c[3].to_ascii_lowercase();
        let field = match (unit.as_str(), lower) {
            ("delivered" | "deliveries", true) => FilterField::MinDelivered,
            ("delivered" | "deliveries", false) => FilterField::MaxDelivered,
            ("opens" | "opened", true) => FilterField::MinOpened,
            ("opens" | "opened", false) => FilterField::MaxOpened,
            ("clicks" | "clicked", true) => FilterField::MinClicked,
            ("clicks" | "clicked", false) => FilterField::MaxClicked,
            (_, true) => FilterField::MinTotalEmails,
            (_, false) => FilterField::MaxTotalEmails,
        };
        let slot = match field {
            FilterField::MinDelivered => &mut out.filters.min_delivered,
            FilterField::MaxDelivered => &mut out.filters.max_delivered,
            FilterField::MinOpened => &mut out.filters.min_opened,
            FilterField::MaxOpened => &mut out.filters.max_opened,
            FilterField::MinClicked => &mut out.filters.min_clicked,
            FilterField::MaxClicked => &mut out.filters.max_clicked,
            FilterField::MinTotalEmails => &mut out.filters.min_total_emails,
            _ => &mut out.filters.max_total_emails,
        };
        *slot = Some(value);
        out.notes.push(format!("{} = {value}", field.name()));
        out.mark(field);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rate {
    Open,
    Click,
    Delivery,
    Bounce,
}

impl Rate {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "click" | "ctr" | "click-through" => Some(Self::Click),
            "delivery" => Some(Self::Delivery),
            "bounce" => Some(Self::Bounce),
            _ => None,
        }
    }

    fn sort_field(self) -> SortField {
        match self {
            Self::Open => SortField::OpenRate,
            Self::Click => SortField::ClickRate,
            Self::Delivery => SortField::DeliveryRate,
            Self::Bounce => SortField::BounceRate,
        }
    }

    /// Threshold implied by "high"/"low" without a number.
    fn qualitative_threshold(self, high: bool) -> Decimal {
        match (self, high) {
            (Self::Open, true) => dec!(20),
            (Self::Open, false) => dec!(10),
            (Self::Click, true) => dec!(3),
            (Self::Click, false) => dec!(1),
            (Self::Delivery, true) => dec!(95),
            (Self::Delivery, false) => dec!(90),
            (Self::Bounce, true) => dec!(5),
            (Self::Bounce, false) => dec!(2),
        }
    }

    fn field(self, lower_bound: bool) -> FilterField {
        match (self, lower_bound) {
            (Self::Open, true) => FilterField::MinOpenRatePercentage,
            (Self::Open, false) => FilterField::MaxOpenRatePercentage,
            (Self::Click, true) => FilterField::MinClickRatePercentage,
            (Self::Click, false) => FilterField::MaxClickRatePercentage,
            (Self::Delivery, true) => FilterField::MinDeliveryRatePercentage,
            (Self::Delivery, false) => FilterField::MaxDeliveryRatePercentage,
            (Self::Bounce, true) => FilterField::MinBounceRatePercentage,
            (Self::Bounce, false) => FilterField::MaxBounceRatePercentage,
        }
    }
}

fn set_rate(out: &mut HeuristicExtraction, rate: Rate, lower_bound: bool, value: Decimal) {
    if value > Decimal::ONE_HUNDRED {
        out.notes.push(format!("ignored {value}% (above 100)"));
        return;
    }
    let field = rate.field(lower_bound);
    let filters = &mut out.filters;
    let slot = match field {
        FilterField::MinOpenRatePercentage => &mut filters.min_open_rate_percentage,
        FilterField::MaxOpenRatePercentage => &mut filters.max_open_rate_percentage,
        FilterField::MinClickRatePercentage => &mut filters.min_click_rate_percentage,
        FilterField::MaxClickRatePercentage => &mut filters.max_click_rate_percentage,
        FilterField::MinDeliveryRatePercentage => &mut filters.min_delivery_rate_percentage,
        FilterField::MaxDeliveryRatePercentage => &mut filters.max_delivery_rate_percentage,
        FilterField::MinBounceRatePercentage => &mut filters.min_bounce_rate_percentage,
        _ => &mut filters.max_bounce_rate_percentage,
    };
    *slot = Some(value);
    out.notes.push(format!("{} = {value}", field.name()));
    out.mark(field);
}

fn extract_rate_thresholds(query: &str, out: &mut HeuristicExtraction) {
    let numeric: Vec<(Rate, bool, Decimal)> = RATE_THRESHOLD
        .captures_iter(query)
        .filter_map(|c| rate_capture(&c, 1, 2, 3))
        .chain(
            RATE_THRESHOLD_REVERSED
                .captures_iter(query)
                .filter_map(|c| rate_capture(&c, 3, 1, 2)),
        )
        .collect();

    let explicit = !numeric.is_empty();
    for (rate, lower, value) in numeric {
        set_rate(out, rate, lower, value);
    }
    if explicit {
        return;
    }

    if let Some(c) = RATE_QUALITATIVE.captures(query)
        && let Some(rate) = Rate::parse(&c[2])
    {
        let high = matches!(
            c[1].to_ascii_lowercase().as_str(),
            "high" | "higher" | "good" | "strong" | "great" | "best"
        );
        // "High" open rates means a floor; "low" ones a ceiling. Bounce is the same.
        set_rate(out, rate, high, rate.qualitative_threshold(high));

        out.filters.sort_by = rate.sort_field();
        out.filters.sort_direction = if high {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        out.mark(FilterField::SortBy);
        out.mark(FilterField::SortDirection);
    }
}

fn rate_capture(
    c: &Captures<'_>,
    rate: usize,
    comparator: usize,
    value: usize,
) -> Option<(Rate, bool, Decimal)> {
    let rate = Rate::parse(&c[rate])?;
    let value: Decimal = c[value].parse().ok()?;
    Some((rate, is_lower_bound(&c[comparator]), value))
}

fn extract_sort(query: &str, out: &mut HeuristicExtraction) {
    if let Some(c) = SORT_BY.captures(query) {
        let field = SortField::parse_or_default(c[1].trim());
        out.filters.sort_by = field;
        out.mark(FilterField::SortBy);
        if let Some(direction) = c.get(2).and_then(|d| SortDirection::parse(d.as_str())) {
            out.filters.sort_direction = direction;
            out.mark(FilterField::SortDirection);
        }
        out.notes.push(format!("sorted by {}", field.as_str()));
    }

    if let Some(c) = TOP_N.captures(query) {
        let descending = matches!(
            c[1].to_ascii_lowercase().as_str(),
            "top" | "best" | "highest"
        );
        if !out.populated.contains(&FilterField::SortDirection) {
            out.filters.sort_direction = if descending {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            };
            out.mark(FilterField::SortDirection);
        }
        if let Ok(n) = c[2].parse::<u32>()
            && n > 0
        {
            out.filters.page_size = n.min(MAX_PAGE_SIZE);
            out.mark(FilterField::PageSize);
            out.notes.push(format!("{} {n}", c[1].to_ascii_lowercase()));
        }
    }
}

fn extract_paging(query: &str, out: &mut HeuristicExtraction) {
    if let Some(n) = PAGE_NUMBER
        .captures(query)
        .and_then(|c| c[1].parse::<u32>().ok())
        .filter(|n| *n > 0)
    {
        out.filters.page_number = n;
        out.mark(FilterField::PageNumber);
        out.notes.push(format!("page {n}"));
    }

    if let Some(n) = PAGE_SIZE
        .captures(query)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0)
    {
        out.filters.page_size = n.min(MAX_PAGE_SIZE);
        out.mark(FilterField::PageSize);
        out.notes.push(format!("{n} per page"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        day(2024, 12, 15)
    }

    #[test]
    fn black_friday_last_month_with_volume() {
        let out = extract_filters(
            "Find Black Friday campaigns from last month with more than 1000 emails",
            today(),
        );
        let f = &out.filters;
        assert_eq!(f.strategy_name.as_deref(), Some("Black Friday"));
        assert_eq!(f.start_date, Some(day(2024, 11, 1)));
        assert_eq!(f.end_date, Some(day(2024, 11, 30)));
        assert_eq!(f.min_total_emails, Some(1000));
        assert_eq!(f.page_number, 1);
        assert_eq!(f.page_size, 50);
        assert_eq!(
            out.extracted_parameters(),
            vec!["StrategyName", "StartDate", "EndDate", "MinTotalEmails"]
        );
    }

    #[test]
    fn high_open_rates_sets_floor_and_sort() {
        let out = extract_filters("Show me campaigns with high open rates", today());
        let f = &out.filters;
        assert!(f.strategy_name.is_none());
        assert_eq!(f.min_open_rate_percentage, Some(dec!(20)));
        assert_eq!(f.sort_by, SortField::OpenRate);
        assert_eq!(f.sort_direction, SortDirection::Desc);
    }

    #[test]
    fn low_bounce_rates_sets_ceiling() {
        let out = extract_filters("campaigns with low bounce rate", today());
        assert_eq!(out.filters.max_bounce_rate_percentage, Some(dec!(2)));
        assert_eq!(out.filters.sort_direction, SortDirection::Asc);
    }

    #[test]
    fn explicit_rate_thresholds() {
        let out = extract_filters(
            "campaigns with open rate above 25% and click rate below 2.5%",
            today(),
        );
        assert_eq!(out.filters.min_open_rate_percentage, Some(dec!(25)));
        assert_eq!(out.filters.max_click_rate_percentage, Some(dec!(2.5)));
        // Explicit numbers win over qualitative defaults; no implicit sort.
        assert_eq!(out.filters.sort_by, SortField::StrategyName);
    }

    #[test]
    fn reversed_rate_phrase() {
        let out = extract_filters("show anything over 30% open", today());
        assert_eq!(out.filters.min_open_rate_percentage, Some(dec!(30)));
    }

    #[test]
    fn quoted_name_wins() {
        let out = extract_filters("show \"Spring Sale 2024\" campaigns", today());
        assert_eq!(out.filters.strategy_name.as_deref(), Some("Spring Sale 2024"));
    }

    #[test]
    fn named_phrase() {
        let out = extract_filters("strategies named Welcome Series from last week", today());
        assert_eq!(out.filters.strategy_name.as_deref(), Some("Welcome Series"));
        assert_eq!(out.filters.start_date, Some(day(2024, 12, 2)));
        assert_eq!(out.filters.end_date, Some(day(2024, 12, 8)));
    }

    #[test]
    fn no_name_for_generic_queries() {
        assert!(extract_filters("show me all campaigns", today()).filters.strategy_name.is_none());
        assert!(extract_filters("top 10 campaigns", today()).filters.strategy_name.is_none());
    }

    #[test]
    fn verbs_and_question_words_are_not_names() {
        for query in [
            "Fetch campaigns from last month",
            "How many campaigns had high open rates",
            "Summarize campaigns with more than 1000 emails",
            "Pull up campaigns sorted by open rate",
            "which holiday campaigns went out",
        ] {
            let out = extract_filters(query, today());
            assert!(
                out.filters.strategy_name.is_none(),
                "{query} produced {:?}",
                out.filters.strategy_name
            );
        }
    }

    #[test]
    fn name_stops_at_lowercase_words() {
        let out = extract_filters("Show the Cyber Monday campaigns", today());
        assert_eq!(out.filters.strategy_name.as_deref(), Some("Cyber Monday"));
    }

    #[test]
    fn last_n_days() {
        let out = extract_filters("campaigns from the last 30 days", today());
        assert_eq!(out.filters.start_date, Some(day(2024, 11, 15)));
        assert_eq!(out.filters.end_date, Some(today()));
    }

    #[test]
    fn month_names_resolve_to_past_month() {
        let march = extract_filters("campaigns sent in March", today());
        assert_eq!(march.filters.start_date, Some(day(2024, 3, 1)));
        assert_eq!(march.filters.end_date, Some(day(2024, 3, 31)));

        let feb = extract_filters("campaigns from February 2023", today());
        assert_eq!(feb.filters.start_date, Some(day(2023, 2, 1)));
        assert_eq!(feb.filters.end_date, Some(day(2023, 2, 28)));
    }

    #[test]
    fn future_month_means_last_year() {
        let out = extract_filters("campaigns in december", day(2024, 6, 1));
        assert_eq!(out.filters.start_date, Some(day(2023, 12, 1)));
        assert_eq!(out.filters.end_date, Some(day(2023, 12, 31)));
    }

    #[test]
    fn explicit_date_range() {
        let out = extract_filters("campaigns between 2024-01-01 and 2024-02-15", today());
        assert_eq!(out.filters.start_date, Some(day(2024, 1, 1)));
        assert_eq!(out.filters.end_date, Some(day(2024, 2, 15)));

        let since = extract_filters("campaigns since 2024-06-01", today());
        assert_eq!(since.filters.start_date, Some(day(2024, 6, 1)));
        assert!(since.filters.end_date.is_none());
    }

    #[test]
    fn count_thresholds_per_metric() {
        let out = extract_filters(
            "campaigns with at least 500 clicks and fewer than 20,000 emails",
            today(),
        );
        assert_eq!(out.filters.min_clicked, Some(500));
        assert_eq!(out.filters.max_total_emails, Some(20_000));
    }

    #[test]
    fn sort_and_paging_phrases() {
        let out = extract_filters(
            "campaigns sorted by total emails descending, page 3, 25 per page",
            today(),
        );
        assert_eq!(out.filters.sort_by, SortField::TotalEmails);
        assert_eq!(out.filters.sort_direction, SortDirection::Desc);
        assert_eq!(out.filters.page_number, 3);
        assert_eq!(out.filters.page_size, 25);
    }

    #[test]
    fn unknown_sort_falls_back_to_default() {
        let out = extract_filters("campaigns sorted by mood", today());
        assert_eq!(out.filters.sort_by, SortField::StrategyName);
    }

    #[test]
    fn top_n_sets_page_size_and_direction() {
        let out = extract_filters("top 5 campaigns sorted by open rate", today());
        assert_eq!(out.filters.page_size, 5);
        assert_eq!(out.filters.sort_by, SortField::OpenRate);
        assert_eq!(out.filters.sort_direction, SortDirection::Desc);
    }

    #[test]
    fn empty_extraction_explains_itself() {
        let out = extract_filters("hello there", today());
        assert!(out.populated.is_empty());
        assert!(out.explanation().contains("no filters"));
    }

    #[test]
    fn relative_periods() {
        assert_eq!(
            relative_period("this month", today()),
            Some((day(2024, 12, 1), today()))
        );
        assert_eq!(
            relative_period("last month", day(2024, 1, 10)),
            Some((day(2023, 12, 1), day(2023, 12, 31)))
        );
        assert_eq!(
            relative_period("last year", today()),
            Some((day(2023, 1, 1), day(2023, 12, 31)))
        );
        assert_eq!(relative_period("someday", today()), None);
    }

    #[test]
    fn month_helpers() {
        assert_eq!(month_number("Sept"), Some(9));
        assert_eq!(month_number("xyz"), None);
        assert_eq!(month_range(2024, 2), Some((day(2024, 2, 1), day(2024, 2, 29))));
        assert_eq!(month_range(2024, 12), Some((day(2024, 12, 1), day(2024, 12, 31))));
    }
}
