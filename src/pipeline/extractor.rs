//! Filter extractor: free text to [`StructuredFilterSet`].
//!
//! Under the model strategy the query is wrapped in a few-shot prompt that
//! lists every whitelisted field, the model's reply is searched for a JSON
//! object, and each recognised key is parsed against its field type. Under the
//! rule-based strategy, or when the model path fails and fallback is enabled,
//! the deterministic [`heuristics`](crate::pipeline::heuristics) extractor
//! produces the filters instead at a lower confidence.

use std::sync::LazyLock;

use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::QueryError;
use crate::llm::{InferenceRequest, ModelSession};
use crate::pipeline::Strategy;
use crate::pipeline::fields::{self, FilterField};
use crate::pipeline::heuristics::{self, relative_period};
use crate::pipeline::types::{ExtractionResult, ExtractionSource, StructuredFilterSet};

/// Confidence reported for rule-based extraction.
pub const RULE_CONFIDENCE: f32 = 0.6;
/// Confidence reported when the model failed and rules filled in.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

const STOP_SEQUENCES: [&str; 3] = ["\nQuery:", "\n\n\n", "```\n\n"];

static JSON_FALLBACK: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(r#"(?s)\{\s*"filters"\s*:.*\}"#).expect("built-in pattern compiles")
    });

/// Turns free-text questions into trigger-report filters.
pub struct FilterExtractor {
    strategy: Strategy,
    rule_fallback: bool,
    today: Option<NaiveDate>,
}

impl FilterExtractor {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            rule_fallback: true,
            today: None,
        }
    }

    /// When `false`, model failures are reported instead of answered by rules.
    pub fn with_rule_fallback(mut self, enabled: bool) -> Self {
        self.rule_fallback = enabled;
        self
    }

    /// Pin the date relative periods are resolved against.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Extract filters from `query`. Never fails past this boundary: errors are
    /// reported through `success`/`error` on the result.
    pub async fn extract(&self, query: &str, context: Option<&str>) -> ExtractionResult {
        let query = query.trim();
        if query.is_empty() {
            let source = match self.strategy {
                Strategy::RuleBased => ExtractionSource::Rules,
                Strategy::Model(_) => ExtractionSource::Model,
            };
            return ExtractionResult::failure(QueryError::EmptyQuery.to_string(), source);
        }

        match &self.strategy {
            Strategy::RuleBased => self.extract_with_rules(query),
            Strategy::Model(session) => self.extract_with_model(session, query, context).await,
        }
    }

    fn extract_with_rules(&self, query: &str) -> ExtractionResult {
        let mut extraction = heuristics::extract_filters(query, self.today());
        fields::normalize(&mut extraction.filters);
        debug!(
            fields = ?extraction.extracted_parameters(),
            "Rule-based filter extraction"
        );

        ExtractionResult {
            success: true,
            explanation: extraction.explanation(),
            extracted_parameters: extraction.extracted_parameters(),
            filters: extraction.filters,
            confidence: RULE_CONFIDENCE,
            source: ExtractionSource::Rules,
            raw_output: None,
            error: None,
            fallback_reason: None,
            warnings: Vec::new(),
        }
    }

    async fn extract_with_model(
        &self,
        session: &ModelSession,
        query: &str,
        context: Option<&str>,
    ) -> ExtractionResult {
        let config = session.config();
        let request = InferenceRequest::new(build_prompt(query, context, self.today()))
            .with_stop_sequences(STOP_SEQUENCES)
            .with_max_tokens(config.max_tokens)
            .with_max_chars(config.max_output_chars)
            .with_temperature(config.temperature);

        let generation = match session.infer(request).await {
            Ok(generation) => generation,
            Err(e) => return self.model_failed(query, QueryError::from(e), None),
        };

        match parse_model_output(&generation.text) {
            Ok(parsed) => {
                info!(
                    fields = ?parsed.populated,
                    confidence = parsed.confidence,
                    warnings = parsed.warnings.len(),
                    "Model filter extraction"
                );
                ExtractionResult {
                    success: true,
                    filters: parsed.filters,
                    explanation: parsed.explanation,
                    confidence: parsed.confidence,
                    source: ExtractionSource::Model,
                    raw_output: Some(generation.text),
                    extracted_parameters: parsed.populated,
                    error: None,
                    fallback_reason: None,
                    warnings: parsed.warnings,
                }
            }
            Err(reason) => self.model_failed(
                query,
                QueryError::MalformedResponse(reason),
                Some(generation.text),
            ),
        }
    }

    fn model_failed(
        &self,
        query: &str,
        error: QueryError,
        raw: Option<String>,
    ) -> ExtractionResult {
        if !self.rule_fallback {
            warn!(error = %error, "Model extraction failed; rule fallback disabled");
            let mut result = ExtractionResult::failure(error.to_string(), ExtractionSource::Model);
            result.raw_output = raw;
            return result;
        }

        warn!(error = %error, "Model extraction failed; using rule-based filters");
        let mut result = self.extract_with_rules(query);
        result.confidence = FALLBACK_CONFIDENCE;
        result.explanation = format!(
            "{} (model unavailable, rule-based fallback)",
            result.explanation
        );
        result.fallback_reason = Some(error.to_string());
        result.raw_output = raw;
        result
    }
}

/// Few-shot instruction prompt listing every filter field.
pub fn build_prompt(query: &str, context: Option<&str>, today: NaiveDate) -> String {
    let (month_start, month_end) =
        relative_period("last month", today).unwrap_or((today, today));

    let mut prompt = format!(
        "You convert questions about email campaign trigger reports into JSON filters.\n\
         Today is {today}.\n\n\
         Fields:\n{fields}\n\
         Reply with one JSON object and nothing else:\n\
         {{\"filters\": {{...}}, \"explanation\": \"...\", \"confidence\": 0.0-1.0, \"extractedParameters\": [\"...\"]}}\n\
         Use only the fields listed. Leave out anything the question does not ask for.\n\n\
         Query: Show campaigns with open rate above 25%\n\
         JSON: {{\"filters\": {{\"MinOpenRatePercentage\": 25}}, \"explanation\": \"Open rate above 25%\", \"confidence\": 0.95, \"extractedParameters\": [\"MinOpenRatePercentage\"]}}\n\n\
         Query: Find Black Friday campaigns from last month with more than 1000 emails\n\
         JSON: {{\"filters\": {{\"StrategyName\": \"Black Friday\", \"StartDate\": \"{month_start}\", \"EndDate\": \"{month_end}\", \"MinTotalEmails\": 1000}}, \"explanation\": \"Black Friday campaigns sent last month with over 1000 emails\", \"confidence\": 0.9, \"extractedParameters\": [\"StrategyName\", \"StartDate\", \"EndDate\", \"MinTotalEmails\"]}}\n\n\
         Query: top 10 campaigns by click rate\n\
         JSON: {{\"filters\": {{\"SortBy\": \"ClickRate\", \"SortDirection\": \"desc\", \"PageSize\": 10}}, \"explanation\": \"Ten campaigns with the highest click rate\", \"confidence\": 0.9, \"extractedParameters\": [\"SortBy\", \"SortDirection\", \"PageSize\"]}}\n\n",
        fields = FilterField::prompt_listing(),
    );

    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str(&format!("Additional context: {context}\n\n"));
    }
    prompt.push_str(&format!("Query: {query}\nJSON:"));
    prompt
}

/// Filters recovered from a model reply.
#[derive(Debug, Clone)]
pub struct ParsedExtraction {
    pub filters: StructuredFilterSet,
    pub explanation: String,
    pub confidence: f32,
    pub populated: Vec<String>,
    pub warnings: Vec<String>,
}

/// First balanced `{...}` block in `text`, ignoring braces inside strings.
pub fn find_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

pub(crate) fn parse_json_object(text: &str) -> Result<Map<String, Value>, String> {
    let candidates = find_json_block(text)
        .into_iter()
        .chain(JSON_FALLBACK.find(text).map(|m| m.as_str()));

    let mut last_error = "no JSON object in model output".to_string();
    for candidate in candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(other) => last_error = format!("expected a JSON object, got {other}"),
            Err(e) => last_error = format!("invalid JSON: {e}"),
        }
    }
    Err(last_error)
}

/// Parse a model reply into filters, applying the field whitelist.
pub fn parse_model_output(text: &str) -> Result<ParsedExtraction, String> {
    let root = parse_json_object(text)?;

    // Some models skip the wrapper and emit the filters object directly.
    let filters_obj = match root.get("filters") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None if !root.contains_key("filters") => root
            .iter()
            .filter(|(k, _)| field_for_key(k).is_some())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Some(Value::Null) | None => Map::new(),
        Some(other) => return Err(format!("\"filters\" must be an object, got {other}")),
    };

    let explanation = root
        .get("explanation")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Filters extracted by model")
        .to_string();

    let confidence = match root.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(1.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(1.0),
        _ => 1.0,
    }
    .clamp(0.0, 1.0) as f32;

    let named: Option<Vec<FilterField>> = root
        .get("extractedParameters")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(field_for_key)
                .collect()
        });

    let mut filters = StructuredFilterSet::default();
    let mut populated: Vec<FilterField> = Vec::new();
    let mut warnings = Vec::new();

    for (key, value) in &filters_obj {
        let Some(field) = field_for_key(key) else {
            warn!(field = %key, "Unknown filter field skipped");
            warnings.push(format!("Unknown filter field '{key}' ignored"));
            continue;
        };
        if let Some(named) = &named
            && !named.contains(&field)
        {
            debug!(field = field.name(), "Field not listed in extractedParameters, skipped");
            continue;
        }
        match fields::parse_value(field, value) {
            Ok(Some(parsed)) => {
                if fields::apply(&mut filters, field, parsed) && !populated.contains(&field) {
                    populated.push(field);
                }
            }
            Ok(None) => {}
            Err(message) => {
                warn!(field = field.name(), %message, "Filter value rejected");
                warnings.push(message);
            }
        }
    }

    let defaulted = fields::normalize(&mut filters);
    populated.retain(|f| !defaulted.contains(f));
    populated.sort_by_key(|f| FilterField::ALL.iter().position(|a| a == f));

    Ok(ParsedExtraction {
        filters,
        explanation,
        confidence,
        populated: populated.iter().map(|f| f.name().to_string()).collect(),
        warnings,
    })
}

/// Whitelist lookup tolerant of `snake_case` and `camelCase` keys.
fn field_for_key(key: &str) -> Option<FilterField> {
    FilterField::parse(key).or_else(|| FilterField::parse(&key.replace('_', "")))
}
