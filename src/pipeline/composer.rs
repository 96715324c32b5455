//! Response composer: assembles the [`QueryResponse`] envelope.

use std::time::Instant;

use serde_json::{Map, Value};

use crate::pipeline::types::{DebugInfo, IntentTag, QueryResponse};

/// Wall-clock timer spanning a whole request.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Collects the pieces of a response; [`finish`](Self::finish) stamps the timing.
///
/// Intent defaults to `campaigns` when nothing set one.
#[derive(Debug)]
pub struct ResponseComposer {
    stopwatch: Stopwatch,
    original_query: String,
    intent: Option<IntentTag>,
    generated_sql: Option<String>,
    parameters: Map<String, Value>,
    results: Option<Value>,
    trigger_reports: Option<Vec<Value>>,
    total_count: Option<u64>,
    explanation: String,
    error: Option<String>,
    debug_info: Option<DebugInfo>,
}

impl ResponseComposer {
    pub fn new(original_query: impl Into<String>, stopwatch: Stopwatch) -> Self {
        Self {
            stopwatch,
            original_query: original_query.into(),
            intent: None,
            generated_sql: None,
            parameters: Map::new(),
            results: None,
            trigger_reports: None,
            total_count: None,
            explanation: String::new(),
            error: None,
            debug_info: None,
        }
    }

    pub fn intent(mut self, intent: IntentTag) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.generated_sql = Some(sql.into());
        self
    }

    /// Merge `parameters` into the envelope's parameter map.
    pub fn parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn results(mut self, results: Value) -> Self {
        self.results = Some(results);
        self
    }

    pub fn trigger_reports(mut self, rows: Vec<Value>, total_count: u64) -> Self {
        self.trigger_reports = Some(rows);
        self.total_count = Some(total_count);
        self
    }

    pub fn explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }

    /// Mark the response failed. Upstream error text is passed through verbatim.
    pub fn error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn debug_info(mut self, debug_info: Option<DebugInfo>) -> Self {
        self.debug_info = debug_info;
        self
    }

    pub fn finish(self) -> QueryResponse {
        QueryResponse {
            original_query: self.original_query,
            intent: self.intent.unwrap_or_default(),
            generated_sql: self.generated_sql,
            parameters: self.parameters,
            results: self.results,
            trigger_reports: self.trigger_reports,
            total_count: self.total_count,
            explanation: self.explanation,
            success: self.error.is_none(),
            error: self.error,
            debug_info: self.debug_info,
            processing_time_ms: self.stopwatch.elapsed_ms(),
        }
    }
}
