//! Model-backed SQL proposals for queries no pattern rule understood.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::QueryError;
use crate::llm::{InferenceRequest, ModelSession};
use crate::pipeline::extractor::parse_json_object;
use crate::pipeline::types::{IntentTag, TRIGGER_REPORT_VIEW};

const SCHEMA: &str = "\
campaigns(id, name, status, sent_at, total_emails, opens, clicks, bounces, open_rate, click_rate, bounce_rate)
email_events(id, campaign_id, recipient_id, event_type, occurred_at)
recipients(id, email, status, list_id, segment, subscribed_at)
email_lists(id, name, created_at, subscriber_count)";

const FORBIDDEN: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "merge", "grant",
    "revoke", "exec", "execute", "call", "replace", "attach", "detach", "pragma", "into",
];

static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(?:[^']|'')*'").expect("built-in pattern compiles"));
static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_]+").expect("built-in pattern compiles"));

/// A model-proposed statement that passed the read-only check.
#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub intent: IntentTag,
    pub sql: String,
    pub explanation: String,
    pub raw_output: String,
}

pub struct SqlGenerator {
    session: Arc<ModelSession>,
}

impl SqlGenerator {
    pub fn new(session: Arc<ModelSession>) -> Self {
        Self { session }
    }

    /// Ask the model for `{intent, sql, explanation}` and validate the SQL.
    pub async fn generate(
        &self,
        query: &str,
        context: Option<&str>,
    ) -> Result<GeneratedSql, QueryError> {
        let config = self.session.config();
        let request = InferenceRequest::new(build_prompt(query, context))
            .with_stop_sequences(["\nQuestion:", "\n\n\n"])
            .with_max_tokens(config.max_tokens)
            .with_max_chars(config.max_output_chars)
            .with_temperature(config.temperature);

        let generation = self.session.infer(request).await?;
        let object = parse_json_object(&generation.text).map_err(QueryError::MalformedResponse)?;

        let sql = object
            .get("sql")
            .and_then(Value::as_str)
            .ok_or_else(|| QueryError::MalformedResponse("missing \"sql\" string".into()))?;
        let sql = validate_read_only(sql)?;

        let intent = object
            .get("intent")
            .and_then(Value::as_str)
            .and_then(IntentTag::parse)
            .unwrap_or_default();
        let explanation = object
            .get("explanation")
            .and_then(Value::as_str)
            .unwrap_or("SQL generated by model")
            .to_string();

        debug!(%intent, sql = %sql, "Model proposed SQL");
        Ok(GeneratedSql {
            intent,
            sql,
            explanation,
            raw_output: generation.text,
        })
    }
}

fn build_prompt(query: &str, context: Option<&str>) -> String {
    let mut prompt = format!(
        "You write read-only SQL for an email campaign analytics database.\n\n\
         Tables:\n{SCHEMA}\n{TRIGGER_REPORT_VIEW}(StrategyName, FirstEmailSent, TotalEmails, Delivered, Opened, Clicked, DeliveryRate, OpenRate, ClickRate, BounceRate)\n\n\
         Reply with one JSON object: {{\"intent\": \"campaigns|recipients|events|metrics|lists\", \"sql\": \"SELECT ...\", \"explanation\": \"...\"}}\n\
         Only a single SELECT statement. Always include a LIMIT.\n\n\
         Question: which lists have more than 500 subscribers\n\
         JSON: {{\"intent\": \"lists\", \"sql\": \"SELECT name, subscriber_count FROM email_lists WHERE subscriber_count > 500 ORDER BY subscriber_count DESC LIMIT 50\", \"explanation\": \"Lists with over 500 subscribers\"}}\n\n"
    );
    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str(&format!("Additional context: {context}\n\n"));
    }
    prompt.push_str(&format!("Question: {query}\nJSON:"));
    prompt
}

/// Accept only a single `SELECT`/`WITH` statement with no write keywords.
/// Returns the statement without a trailing semicolon.
pub fn validate_read_only(sql: &str) -> Result<String, QueryError> {
    let statement = sql.trim().trim_end_matches(';').trim();
    if statement.is_empty() {
        return Err(QueryError::UnsafeSql("empty statement".into()));
    }

    let stripped = STRING_LITERAL.replace_all(statement, "''");
    if stripped.contains(';') {
        return Err(QueryError::UnsafeSql("multiple statements".into()));
    }
    if stripped.contains("--") || stripped.contains("/*") {
        return Err(QueryError::UnsafeSql("comments are not allowed".into()));
    }

    let mut words = WORD.find_iter(&stripped).map(|m| m.as_str().to_ascii_lowercase());
    match words.next().as_deref() {
        Some("select" | "with") => {}
        _ => return Err(QueryError::UnsafeSql("must start with SELECT or WITH".into())),
    }
    if let Some(word) = words.find(|w| FORBIDDEN.contains(&w.as_str())) {
        warn!(keyword = %word, "Rejected generated SQL");
        return Err(QueryError::UnsafeSql(format!("contains {}", word.to_uppercase())));
    }

    Ok(statement.to_string())
}
