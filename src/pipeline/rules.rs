//! Pattern matcher: ordered keyword/regex rules for intent classification.
//!
//! Rules are evaluated top to bottom against the case-folded query and the
//! first match wins. Each rule either produces a canned SQL template with the
//! extracted literals substituted in, or delegates to a read-only
//! [`CollaboratorCall`]. `None` means no rule fired and the caller picks the
//! next stage (model SQL generation, then [`most_recent_campaigns`]).
//!
//! Priority order:
//! numeric threshold, campaign, bounce/failure, engagement, recipient, list,
//! unsubscribe, delivery, dashboard, analytics/report, comparison, audience,
//! performance issue, month name, ROI, compliance, segmentation.

use regex::{Captures, Regex};
use rust_decimal::Decimal;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::pipeline::collaborators::CollaboratorCall;
use crate::pipeline::heuristics::month_number;
use crate::pipeline::types::{
    DEFAULT_PAGE_SIZE, FilterOperator, FilterPredicate, IntentTag, PredicateValue, QueryIntent,
    SortDirection, SortField, StructuredFilterSet,
};

/// Month names; "may" only counts after a preposition or before a year.
const MONTH_PHRASE: &str = r"\b(january|february|march|april|june|july|august|september|october|november|december|(?:in|during|from|for|of|since)\s+may|may\s+\d{4})\b";

const CAMPAIGN_COLUMNS: &str =
    "name, status, sent_at, total_emails, opens, clicks, bounces, open_rate, click_rate, bounce_rate";

/// What a matched rule asks the processor to do.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchAction {
    /// A ready-to-run read-only SQL statement.
    Sql(String),
    /// A delegated collaborator query.
    Call(CollaboratorCall),
}

/// Result of a successful rule match.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    /// Name of the rule that fired.
    pub rule: &'static str,
    pub intent: QueryIntent,
    pub action: MatchAction,
    pub explanation: String,
    /// Literals extracted from the query.
    pub parameters: Map<String, Value>,
}

impl PatternMatch {
    fn sql(rule: &'static str, intent: QueryIntent, sql: String, explanation: &str) -> Self {
        Self {
            rule,
            intent,
            action: MatchAction::Sql(sql),
            explanation: explanation.to_string(),
            parameters: Map::new(),
        }
    }

    fn call(
        rule: &'static str,
        intent: QueryIntent,
        call: CollaboratorCall,
        explanation: &str,
    ) -> Self {
        Self {
            rule,
            intent,
            action: MatchAction::Call(call),
            explanation: explanation.to_string(),
            parameters: Map::new(),
        }
    }

    fn param(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }
}

/// Which builder a rule dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    NumericThreshold,
    Campaigns,
    Bounces,
    Engagement,
    Recipients,
    Lists,
    Unsubscribes,
    Delivery,
    Dashboard,
    Analytics,
    Comparison,
    Audience,
    PerformanceIssues,
    Month,
    Roi,
    Compliance,
    Segmentation,
}

/// A single rule: a compiled pattern and the builder it dispatches to.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub name: &'static str,
    regex: Regex,
    kind: RuleKind,
}

/// Ordered rule table.
pub struct PatternMatcher {
    rules: Vec<PatternRule>,
    rate_hint: Regex,
    month_hint: Regex,
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::default_rules()
    }
}

impl PatternMatcher {
    /// The built-in rule table, in priority order.
    pub fn default_rules() -> Self {
        let rule = |name: &'static str, pattern: &str, kind: RuleKind| PatternRule {
            name,
            regex: Regex::new(pattern).expect("built-in rule pattern compiles"),
            kind,
        };

        let rules = vec![
            // "clicks more than 1000" or "more than 1000 clicks"
            rule(
                "numeric_threshold",
                r"\b(clicks?|opens?|bounces?|emails?|sends?)\s+(?:count\s+)?(more than|greater than|over|above|at least|less than|fewer than|under|below|at most)\s+(\d[\d,]*)\b|\b(more than|greater than|over|above|at least|less than|fewer than|under|below|at most)\s+(\d[\d,]*)\s+(clicks?|opens?|bounces?|emails?|sends?)\b",
                RuleKind::NumericThreshold,
            ),
            rule("campaigns", r"\bcampaigns?\b", RuleKind::Campaigns),
            rule(
                "bounces",
                r"\b(bounce[sd]?|bouncing|fail(?:ed|ure|ures|ing)?|undeliver(?:ed|able))\b",
                RuleKind::Bounces,
            ),
            rule(
                "engagement",
                r"\b(opens?|opened|clicks?|clicked|engagement|engaged)\b",
                RuleKind::Engagement,
            ),
            rule(
                "recipients",
                r"\b(recipients?|contacts?|who (?:received|got))\b",
                RuleKind::Recipients,
            ),
            rule("lists", r"\b(email lists?|mailing lists?|lists)\b", RuleKind::Lists),
            rule(
                "unsubscribes",
                r"\b(unsubscrib\w*|opt[- ]?outs?|opted out)\b",
                RuleKind::Unsubscribes,
            ),
            rule("delivery", r"\bdeliver(?:ed|y|ies)\b", RuleKind::Delivery),
            rule(
                "dashboard",
                r"\b(dashboard|metrics|kpis?|overview|summary|stats|statistics)\b",
                RuleKind::Dashboard,
            ),
            rule(
                "analytics",
                r"\b(analytics|reports?|reporting|trends?)\b",
                RuleKind::Analytics,
            ),
            rule(
                "comparison",
                r"\b(compare|comparison|comparing|versus|vs)\b",
                RuleKind::Comparison,
            ),
            rule(
                "audience",
                r"\b(subscribers?|audience|growth)\b",
                RuleKind::Audience,
            ),
            rule(
                "performance_issues",
                r"\b(underperform\w*|poorly|poor|worst|problems?|issues?|low performing)\b",
                RuleKind::PerformanceIssues,
            ),
            rule("month", MONTH_PHRASE, RuleKind::Month),
            rule(
                "roi",
                r"\b(roi|revenue|return on investment|business impact|conversions?)\b",
                RuleKind::Roi,
            ),
            rule(
                "compliance",
                r"\b(compliance|deliverability|spam|complaints?|gdpr|can-spam|blacklist\w*|blocklist\w*)\b",
                RuleKind::Compliance,
            ),
            rule(
                "segmentation",
                r"\b(segments?|segmentation|segmented|cohorts?)\b",
                RuleKind::Segmentation,
            ),
        ];

        Self {
            rules,
            rate_hint: Regex::new(
                r"\b(high|higher|good|strong|great|best|top|low|lower|poor|weak|bad|worst)\s+(open|click|bounce|delivery)(?:\s+rates?)?\b",
            )
            .expect("built-in rule pattern compiles"),
            month_hint: Regex::new(MONTH_PHRASE).expect("built-in rule pattern compiles"),
        }
    }

    /// Rule names in evaluation order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Evaluate a query against the rule table.
    ///
    /// Returns `Some(PatternMatch)` for the first rule that fires, `None` if
    /// none does (including for empty input).
    pub fn evaluate(&self, query: &str) -> Option<PatternMatch> {
        let text = query.trim().to_lowercase();
        if text.is_empty() {
            return None;
        }

        for rule in &self.rules {
            let Some(caps) = rule.regex.captures(&text) else {
                continue;
            };
            match self.build(rule, &caps, &text) {
                Some(matched) => {
                    debug!(rule = rule.name, matched = &caps[0], "Pattern rule matched");
                    return Some(matched);
                }
                None => debug!(rule = rule.name, "Pattern rule declined; trying the next"),
            }
        }

        debug!("No pattern rule matched");
        None
    }

    /// `None` when the rule fired but its literals are unusable.
    fn build(&self, rule: &PatternRule, caps: &Captures<'_>, text: &str) -> Option<PatternMatch> {
        let name = rule.name;
        let matched = match rule.kind {
            RuleKind::NumericThreshold => return numeric_threshold(name, caps),
            RuleKind::Campaigns => self.campaigns(name, text),
            RuleKind::Bounces => PatternMatch::sql(
                name,
                QueryIntent::builder(IntentTag::Events)
                    .predicate(event_type("bounce"))
                    .limit(DEFAULT_PAGE_SIZE)
                    .build(),
                "SELECT campaign_id, COUNT(*) AS bounces FROM email_events \
                 WHERE event_type IN ('bounce', 'failed') \
                 GROUP BY campaign_id ORDER BY bounces DESC LIMIT 50"
                    .to_string(),
                "Campaigns ranked by bounced or failed deliveries",
            ),
            RuleKind::Engagement => {
                let event = match &caps[1] {
                    m if m.starts_with("open") => Some("open"),
                    m if m.starts_with("click") => Some("click"),
                    _ => None,
                };
                let mut intent = QueryIntent::builder(IntentTag::Events).limit(DEFAULT_PAGE_SIZE);
                if let Some(event) = event {
                    intent = intent.entity("eventType", event).predicate(event_type(event));
                }
                let explanation = match event {
                    Some("open") => "Recent open events",
                    Some(_) => "Recent click events",
                    None => "Recent engagement events",
                };
                PatternMatch::call(
                    name,
                    intent.build(),
                    CollaboratorCall::EmailEvents {
                        campaign_id: None,
                        event_type: event.map(str::to_string),
                        page_size: DEFAULT_PAGE_SIZE,
                        offset: 0,
                    },
                    explanation,
                )
            }
            RuleKind::Recipients => PatternMatch::call(
                name,
                QueryIntent::builder(IntentTag::Recipients)
                    .limit(DEFAULT_PAGE_SIZE)
                    .build(),
                CollaboratorCall::Recipients {
                    page_size: DEFAULT_PAGE_SIZE,
                    offset: 0,
                },
                "Recipients of recent campaigns",
            ),
            RuleKind::Lists => PatternMatch::call(
                name,
                QueryIntent::builder(IntentTag::Lists).build(),
                CollaboratorCall::EmailLists,
                "All email lists",
            ),
            RuleKind::Unsubscribes => PatternMatch::sql(
                name,
                QueryIntent::builder(IntentTag::Events)
                    .predicate(event_type("unsubscribe"))
                    .limit(DEFAULT_PAGE_SIZE)
                    .build(),
                "SELECT campaign_id, COUNT(*) AS unsubscribes FROM email_events \
                 WHERE event_type = 'unsubscribe' \
                 GROUP BY campaign_id ORDER BY unsubscribes DESC LIMIT 50"
                    .to_string(),
                "Unsubscribes per campaign",
            ),
            RuleKind::Delivery => PatternMatch::sql(
                name,
                QueryIntent::builder(IntentTag::Events)
                    .predicate(event_type("delivered"))
                    .limit(DEFAULT_PAGE_SIZE)
                    .build(),
                "SELECT campaign_id, COUNT(*) AS delivered FROM email_events \
                 WHERE event_type = 'delivered' \
                 GROUP BY campaign_id ORDER BY delivered DESC LIMIT 50"
                    .to_string(),
                "Delivered emails per campaign",
            ),
            RuleKind::Dashboard => PatternMatch::call(
                name,
                QueryIntent::builder(IntentTag::Metrics).build(),
                CollaboratorCall::DashboardMetrics,
                "Dashboard metrics overview",
            ),
            RuleKind::Analytics => PatternMatch::sql(
                name,
                QueryIntent::builder(IntentTag::Metrics)
                    .entity("period", "month")
                    .limit(12)
                    .build(),
                "SELECT DATE_TRUNC('month', sent_at) AS month, COUNT(*) AS campaigns, \
                 SUM(total_emails) AS emails, AVG(open_rate) AS avg_open_rate, \
                 AVG(click_rate) AS avg_click_rate \
                 FROM campaigns GROUP BY 1 ORDER BY 1 DESC LIMIT 12"
                    .to_string(),
                "Monthly campaign performance report",
            ),
            RuleKind::Comparison => PatternMatch::sql(
                name,
                QueryIntent::builder(IntentTag::Campaigns).limit(10).build(),
                format!(
                    "SELECT {CAMPAIGN_COLUMNS} FROM campaigns \
                     ORDER BY sent_at DESC LIMIT 10"
                ),
                "Side-by-side metrics for the ten most recent campaigns",
            ),
            RuleKind::Audience => PatternMatch::sql(
                name,
                QueryIntent::builder(IntentTag::Lists)
                    .limit(DEFAULT_PAGE_SIZE)
                    .build(),
                "SELECT name, subscriber_count, created_at FROM email_lists \
                 ORDER BY subscriber_count DESC LIMIT 50"
                    .to_string(),
                "Audience size by list",
            ),
            RuleKind::PerformanceIssues => PatternMatch::sql(
                name,
                QueryIntent::builder(IntentTag::Campaigns)
                    .predicate(FilterPredicate::new(
                        "open_rate",
                        FilterOperator::LessThan,
                        PredicateValue::Number(Decimal::TEN),
                    ))
                    .limit(DEFAULT_PAGE_SIZE)
                    .build(),
                format!(
                    "SELECT {CAMPAIGN_COLUMNS} FROM campaigns \
                     WHERE open_rate < 10 OR bounce_rate > 5 \
                     ORDER BY open_rate ASC LIMIT 50"
                ),
                "Campaigns with low open rates or high bounce rates",
            )
            .param("maxOpenRate", json!(10))
            .param("minBounceRate", json!(5)),
            RuleKind::Month => match month_in(&caps[1]) {
                Some(month) => month_campaigns(name, month),
                None => most_recent_campaigns(),
            },
            RuleKind::Roi => PatternMatch::sql(
                name,
                QueryIntent::builder(IntentTag::Campaigns)
                    .limit(DEFAULT_PAGE_SIZE)
                    .build(),
                "SELECT name, sent_at, total_emails, clicks, \
                 CAST(clicks AS DECIMAL) / NULLIF(total_emails, 0) * 100 AS click_through_pct \
                 FROM campaigns ORDER BY click_through_pct DESC LIMIT 50"
                    .to_string(),
                "Campaigns ranked by click-through, the closest proxy for business impact",
            ),
            RuleKind::Compliance => PatternMatch::sql(
                name,
                QueryIntent::builder(IntentTag::Events)
                    .limit(DEFAULT_PAGE_SIZE)
                    .build(),
                "SELECT campaign_id, \
                 SUM(CASE WHEN event_type = 'spam_complaint' THEN 1 ELSE 0 END) AS complaints, \
                 SUM(CASE WHEN event_type = 'bounce' THEN 1 ELSE 0 END) AS bounces \
                 FROM email_events GROUP BY campaign_id ORDER BY complaints DESC LIMIT 50"
                    .to_string(),
                "Spam complaints and bounces per campaign",
            ),
            RuleKind::Segmentation => PatternMatch::sql(
                name,
                QueryIntent::builder(IntentTag::Recipients)
                    .entity("groupBy", "segment")
                    .build(),
                "SELECT segment, COUNT(*) AS recipients FROM recipients \
                 GROUP BY segment ORDER BY recipients DESC"
                    .to_string(),
                "Recipient counts per segment",
            ),
        };
        Some(matched)
    }

    /// Campaign keyword: rate phrases become trigger-report filters, a month
    /// name narrows by send month, anything else lists recent campaigns.
    fn campaigns(&self, name: &'static str, text: &str) -> PatternMatch {
        if let Some(caps) = self.rate_hint.captures(text) {
            return rate_campaigns(name, &caps[1], &caps[2]);
        }
        if let Some(month) = self
            .month_hint
            .captures(text)
            .and_then(|c| month_in(&c[1]))
        {
            return month_campaigns(name, month);
        }
        PatternMatch {
            rule: name,
            ..most_recent_campaigns()
        }
    }
}

/// Month number of the first month word in a matched phrase.
fn month_in(phrase: &str) -> Option<u32> {
    phrase.split_whitespace().find_map(month_number)
}

fn event_type(event: &str) -> FilterPredicate {
    FilterPredicate::new(
        "event_type",
        FilterOperator::Equals,
        PredicateValue::Text(event.to_string()),
    )
}

fn numeric_threshold(name: &'static str, caps: &Captures<'_>) -> Option<PatternMatch> {
    // Either "<metric> <comparator> <n>" (groups 1-3) or "<comparator> <n> <metric>" (4-6).
    let (metric, comparator, number) = match caps.get(1) {
        Some(metric) => (metric.as_str(), &caps[2], &caps[3]),
        None => (&caps[6], &caps[4], &caps[5]),
    };
    let Ok(threshold) = number.replace(',', "").parse::<i64>() else {
        warn!(number, "Threshold out of range; skipping numeric rule");
        return None;
    };
    let is_greater = matches!(
        comparator,
        "more than" | "greater than" | "over" | "above" | "at least"
    );
    let metric_type = metric.trim_end_matches('s');
    let column = match metric_type {
        "click" => "clicks",
        "open" => "opens",
        "bounce" => "bounces",
        _ => "total_emails",
    };
    let (operator, symbol, order) = match (is_greater, comparator) {
        (true, "at least") => (FilterOperator::AtLeast, ">=", "DESC"),
        (true, _) => (FilterOperator::GreaterThan, ">", "DESC"),
        (false, "at most") => (FilterOperator::AtMost, "<=", "ASC"),
        (false, _) => (FilterOperator::LessThan, "<", "ASC"),
    };

    let intent = QueryIntent::builder(IntentTag::Campaigns)
        .entity("metricType", metric_type)
        .entity("threshold", threshold)
        .predicate(FilterPredicate::new(
            column,
            operator,
            PredicateValue::Number(Decimal::from(threshold)),
        ))
        .limit(DEFAULT_PAGE_SIZE)
        .build();

    let matched = PatternMatch::sql(
        name,
        intent,
        format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns \
             WHERE {column} {symbol} {threshold} ORDER BY {column} {order} LIMIT 50"
        ),
        &format!(
            "Campaigns with {column} {} {threshold}",
            if is_greater { "above" } else { "below" }
        ),
    )
    .param("metricType", json!(metric_type))
    .param("threshold", json!(threshold))
    .param("isGreater", json!(is_greater));
    Some(matched)
}

/// "high open rates" and friends, answered from the trigger-report view.
fn rate_campaigns(name: &'static str, quality: &str, metric: &str) -> PatternMatch {
    let high = matches!(
        quality,
        "high" | "higher" | "good" | "strong" | "great" | "best" | "top"
    );
    let (sort_by, column, high_threshold, low_threshold) = match metric {
        "open" => (SortField::OpenRate, "open_rate", 20, 10),
        "click" => (SortField::ClickRate, "click_rate", 3, 1),
        "bounce" => (SortField::BounceRate, "bounce_rate", 5, 2),
        _ => (SortField::DeliveryRate, "delivery_rate", 95, 90),
    };
    let threshold = Decimal::from(if high { high_threshold } else { low_threshold });

    let mut filters = StructuredFilterSet {
        sort_by,
        sort_direction: if high {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        },
        ..StructuredFilterSet::default()
    };
    let bound_key = match (metric, high) {
        ("open", true) => {
            filters.min_open_rate_percentage = Some(threshold);
            "MinOpenRatePercentage"
        }
        ("open", false) => {
            filters.max_open_rate_percentage = Some(threshold);
            "MaxOpenRatePercentage"
        }
        ("click", true) => {
            filters.min_click_rate_percentage = Some(threshold);
            "MinClickRatePercentage"
        }
        ("click", false) => {
            filters.max_click_rate_percentage = Some(threshold);
            "MaxClickRatePercentage"
        }
        ("bounce", true) => {
            filters.min_bounce_rate_percentage = Some(threshold);
            "MinBounceRatePercentage"
        }
        ("bounce", false) => {
            filters.max_bounce_rate_percentage = Some(threshold);
            "MaxBounceRatePercentage"
        }
        (_, true) => {
            filters.min_delivery_rate_percentage = Some(threshold);
            "MinDeliveryRatePercentage"
        }
        (_, false) => {
            filters.max_delivery_rate_percentage = Some(threshold);
            "MaxDeliveryRatePercentage"
        }
    };

    // Filter-set bounds are inclusive.
    let operator = if high {
        FilterOperator::AtLeast
    } else {
        FilterOperator::AtMost
    };
    let intent = QueryIntent::builder(IntentTag::Campaigns)
        .entity("metric", column)
        .predicate(FilterPredicate::new(
            column,
            operator,
            PredicateValue::Number(threshold),
        ))
        .limit(filters.page_size)
        .build();

    PatternMatch::sql(
        name,
        intent,
        filters.to_sql(),
        &format!(
            "Campaigns with {} {metric} rates ({bound_key} {threshold}), sorted by {} {}",
            if high { "high" } else { "low" },
            sort_by.as_str(),
            filters.sort_direction.as_sql().to_lowercase()
        ),
    )
    .param(bound_key, json!(threshold.normalize().to_string()))
    .param("SortBy", json!(sort_by.as_str()))
    .param("SortDirection", json!(filters.sort_direction))
}

fn month_campaigns(name: &'static str, month: u32) -> PatternMatch {
    PatternMatch::sql(
        name,
        QueryIntent::builder(IntentTag::Campaigns)
            .entity("month", month)
            .limit(DEFAULT_PAGE_SIZE)
            .build(),
        format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns \
             WHERE EXTRACT(MONTH FROM sent_at) = {month} ORDER BY sent_at DESC LIMIT 50"
        ),
        &format!("Campaigns sent in month {month}"),
    )
    .param("month", json!(month))
}

/// Final fallback when neither a rule nor the model produced anything.
pub fn most_recent_campaigns() -> PatternMatch {
    PatternMatch::call(
        "most_recent_campaigns",
        QueryIntent::builder(IntentTag::Campaigns)
            .limit(DEFAULT_PAGE_SIZE)
            .build(),
        CollaboratorCall::Campaigns {
            page_size: DEFAULT_PAGE_SIZE,
            offset: 0,
        },
        "Most recent campaigns",
    )
}
