//! End-to-end tests for the query pipeline.
//!
//! The model is replaced by a scripted engine that answers filter prompts and
//! SQL prompts with canned JSON, so every path runs without real weights.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Value, json};
use tempfile::NamedTempFile;

use campaign_query::config::{MIN_MODEL_BYTES, ModelConfig, QueryConfig, StrategyKind};
use campaign_query::error::{CollaboratorError, LlmError};
use campaign_query::llm::{
    Generation, InferenceEngine, InferenceRequest, LoadOptions, ModelLoader, ModelSession,
};
use campaign_query::pipeline::collaborators::TriggerReports;
use campaign_query::pipeline::types::{IntentTag, QueryRequest, StructuredFilterSet};
use campaign_query::{QueryProcessor, Strategy};

/// Replies by prompt kind: filter extraction or SQL generation.
struct ScriptedEngine {
    filters_reply: String,
    sql_reply: String,
    inferences: Arc<AtomicUsize>,
}

impl InferenceEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn infer(&self, request: &InferenceRequest) -> Result<Generation, LlmError> {
        self.inferences.fetch_add(1, Ordering::SeqCst);
        if request.prompt.contains("into JSON filters") {
            Ok(Generation::text(self.filters_reply.clone()))
        } else {
            Ok(Generation::text(self.sql_reply.clone()))
        }
    }
}

struct ScriptedLoader {
    filters_reply: String,
    sql_reply: String,
    fail: bool,
    loads: Arc<AtomicUsize>,
    inferences: Arc<AtomicUsize>,
}

impl ModelLoader for ScriptedLoader {
    fn load(
        &self,
        _path: &Path,
        _options: LoadOptions,
        _cancel: &AtomicBool,
    ) -> Result<Arc<dyn InferenceEngine>, LlmError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(20));
        if self.fail {
            return Err(LlmError::LoadFailure {
                reason: "unsupported quantization".into(),
            });
        }
        Ok(Arc::new(ScriptedEngine {
            filters_reply: self.filters_reply.clone(),
            sql_reply: self.sql_reply.clone(),
            inferences: Arc::clone(&self.inferences),
        }))
    }
}

struct Harness {
    processor: QueryProcessor,
    loads: Arc<AtomicUsize>,
    inferences: Arc<AtomicUsize>,
    _model: NamedTempFile,
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 15).unwrap()
}

fn model_harness(filters_reply: &str, sql_reply: &str, fail: bool) -> Harness {
    let model = NamedTempFile::new().unwrap();
    model.as_file().set_len(MIN_MODEL_BYTES).unwrap();

    let loads = Arc::new(AtomicUsize::new(0));
    let inferences = Arc::new(AtomicUsize::new(0));
    let loader = ScriptedLoader {
        filters_reply: filters_reply.to_string(),
        sql_reply: sql_reply.to_string(),
        fail,
        loads: Arc::clone(&loads),
        inferences: Arc::clone(&inferences),
    };
    let config = QueryConfig {
        strategy: StrategyKind::Model,
        model: ModelConfig {
            model_path: model.path().to_path_buf(),
            ..ModelConfig::default()
        },
        rule_fallback: true,
    };

    Harness {
        processor: QueryProcessor::from_config(&config, Arc::new(loader)).with_today(today()),
        loads,
        inferences,
        _model: model,
    }
}

struct EchoReports;

#[async_trait]
impl TriggerReports for EchoReports {
    async fn get_reports_filtered(
        &self,
        filters: &StructuredFilterSet,
    ) -> Result<(Vec<Value>, u64), CollaboratorError> {
        let rows = (0..3)
            .map(|i| json!({"StrategyName": filters.strategy_name, "Row": i}))
            .collect();
        Ok((rows, 3))
    }
}

const BLACK_FRIDAY: &str = "Find Black Friday campaigns from last month with more than 1000 emails";

#[tokio::test]
async fn high_open_rates_answered_by_rules_without_loading_model() {
    let harness = model_harness("{}", "{}", false);
    let response = harness
        .processor
        .process(QueryRequest::new("Show me campaigns with high open rates").with_debug_info())
        .await;

    assert!(response.success);
    assert_eq!(response.intent, IntentTag::Campaigns);
    let sql = response.generated_sql.unwrap();
    assert!(sql.contains("OpenRate >= 20"));
    assert!(sql.contains("ORDER BY OpenRate DESC"));
    assert_eq!(response.parameters["SortBy"], "OpenRate");
    assert_eq!(
        response.debug_info.unwrap().matched_rule.as_deref(),
        Some("campaigns")
    );
    assert_eq!(harness.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn black_friday_via_model() {
    let reply = r#"{"filters": {"StrategyName": "Black Friday", "StartDate": "2024-11-01",
        "EndDate": "2024-11-30", "MinTotalEmails": 1000},
        "explanation": "Black Friday campaigns from November with over 1000 emails",
        "confidence": 0.92,
        "extractedParameters": ["StrategyName", "StartDate", "EndDate", "MinTotalEmails"]}"#;
    let harness = model_harness(reply, "{}", false);
    let processor = harness.processor.with_trigger_reports(Arc::new(EchoReports));

    let response = processor
        .process_trigger_report(QueryRequest::new(BLACK_FRIDAY).with_debug_info())
        .await;

    assert!(response.success);
    assert_eq!(response.parameters["source"], "model");
    assert_eq!(
        response.parameters["extractedParameters"],
        json!(["StrategyName", "StartDate", "EndDate", "MinTotalEmails"])
    );
    let filters = &response.parameters["filters"];
    assert_eq!(filters["StrategyName"], "Black Friday");
    assert_eq!(filters["MinTotalEmails"], 1000);
    assert_eq!(filters["StartDate"], "2024-11-01");
    assert_eq!(filters["EndDate"], "2024-11-30");
    assert_eq!(response.total_count, Some(3));
    assert_eq!(response.trigger_reports.unwrap().len(), 3);

    let debug = response.debug_info.unwrap();
    assert!(debug.raw_model_output.unwrap().contains("Black Friday"));
    assert!(debug.fallback_reason.is_none());
    assert_eq!(harness.inferences.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn black_friday_via_rules_when_model_fails() {
    let harness = model_harness("{}", "{}", true);
    let response = harness
        .processor
        .process_trigger_report(QueryRequest::new(BLACK_FRIDAY).with_debug_info())
        .await;

    assert!(response.success);
    assert_eq!(response.parameters["source"], "rules");
    let filters = &response.parameters["filters"];
    assert_eq!(filters["StrategyName"], "Black Friday");
    assert_eq!(filters["MinTotalEmails"], 1000);
    assert_eq!(filters["StartDate"], "2024-11-01");
    assert_eq!(filters["EndDate"], "2024-11-30");

    let debug = response.debug_info.unwrap();
    assert!(debug.fallback_reason.unwrap().contains("unsupported quantization"));
    assert_eq!(debug.confidence, Some(0.5));
}

#[tokio::test]
async fn failed_session_is_not_reloaded() {
    let harness = model_harness("{}", "{}", true);
    for _ in 0..3 {
        let response = harness
            .processor
            .process_trigger_report(QueryRequest::new("show campaigns"))
            .await;
        assert!(response.success);
    }
    assert_eq!(harness.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_requests_share_one_load() {
    let harness = model_harness(r#"{"filters": {}}"#, "{}", false);
    let processor = Arc::new(harness.processor);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                processor
                    .process_trigger_report(QueryRequest::new("show campaigns"))
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().success);
    }

    assert_eq!(harness.loads.load(Ordering::SeqCst), 1);
    assert_eq!(harness.inferences.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn show_campaigns_gets_default_pagination() {
    let harness = model_harness(r#"{"filters": {}, "explanation": "everything"}"#, "{}", false);
    let response = harness
        .processor
        .process_trigger_report(QueryRequest::new("show campaigns"))
        .await;

    let filters = &response.parameters["filters"];
    assert_eq!(filters["PageNumber"], 1);
    assert_eq!(filters["PageSize"], 50);
    assert_eq!(filters["SortBy"], "StrategyName");
    assert_eq!(filters["SortDirection"], "asc");
    assert!(
        response
            .generated_sql
            .unwrap()
            .ends_with("ORDER BY StrategyName ASC LIMIT 50 OFFSET 0")
    );
}

#[tokio::test]
async fn unmatched_query_uses_model_sql() {
    let sql_reply = r#"{"intent": "lists", "sql": "SELECT name FROM email_lists ORDER BY name LIMIT 20", "explanation": "Lists alphabetically"}"#;
    let harness = model_harness("{}", sql_reply, false);
    let response = harness
        .processor
        .process(QueryRequest::new("alphabetical order please").with_debug_info())
        .await;

    assert!(response.success);
    assert_eq!(response.intent, IntentTag::Lists);
    assert_eq!(
        response.generated_sql.as_deref(),
        Some("SELECT name FROM email_lists ORDER BY name LIMIT 20")
    );
    assert_eq!(
        response.debug_info.unwrap().matched_rule.as_deref(),
        Some("model_sql")
    );
}

#[tokio::test]
async fn unsafe_model_sql_falls_back_to_recent_campaigns() {
    let sql_reply = r#"{"intent": "campaigns", "sql": "DELETE FROM campaigns"}"#;
    let harness = model_harness("{}", sql_reply, false);
    let response = harness
        .processor
        .process(QueryRequest::new("tidy things up").with_debug_info())
        .await;

    assert!(response.success);
    assert_eq!(response.intent, IntentTag::Campaigns);
    assert!(response.generated_sql.is_none());
    let debug = response.debug_info.unwrap();
    assert_eq!(debug.matched_rule.as_deref(), Some("most_recent_campaigns"));
    assert!(debug.fallback_reason.unwrap().contains("rejected"));
}

#[tokio::test]
async fn sql_fallback_is_explained_without_debug_info() {
    let harness = model_harness("{}", "nope", false);
    let response = harness
        .processor
        .process(QueryRequest::new("tidy things up"))
        .await;

    assert!(response.success);
    assert!(response.debug_info.is_none());
    assert!(response.explanation.contains("rule-based fallback"));
    assert!(
        response.parameters["fallbackReason"]
            .as_str()
            .unwrap()
            .contains("Malformed")
    );
}

#[tokio::test]
async fn rule_based_names_skip_leading_verbs() {
    let processor = QueryProcessor::new(Strategy::RuleBased).with_today(today());
    for query in [
        "Fetch campaigns from last month",
        "How many campaigns had high open rates",
        "Summarize campaigns with more than 1000 emails",
        "Pull up campaigns sorted by open rate",
    ] {
        let response = processor
            .process_trigger_report(QueryRequest::new(query))
            .await;
        assert!(response.success);
        assert!(response.parameters["filters"]["StrategyName"].is_null(), "{query}");
        assert!(!response.generated_sql.unwrap().contains("LIKE"), "{query}");
    }
}

#[tokio::test]
async fn disabled_fallback_surfaces_model_errors() {
    let harness = model_harness("{}", "{}", true);
    let processor = harness.processor.with_rule_fallback(false);

    let response = processor
        .process_trigger_report(QueryRequest::new("show campaigns"))
        .await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("unavailable"));

    let response = processor.process(QueryRequest::new("tidy things up")).await;
    assert!(!response.success);
}

#[tokio::test]
async fn empty_query_never_reaches_the_model() {
    let harness = model_harness("{}", "{}", false);
    let response = harness
        .processor
        .process_trigger_report(QueryRequest::new("   "))
        .await;
    assert!(!response.success);
    assert!(response.error.unwrap().contains("empty"));

    let response = harness.processor.process(QueryRequest::new("")).await;
    assert!(!response.success);
    assert_eq!(harness.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn session_can_be_injected_directly() {
    let model = NamedTempFile::new().unwrap();
    model.as_file().set_len(MIN_MODEL_BYTES).unwrap();
    let loads = Arc::new(AtomicUsize::new(0));
    let loader = ScriptedLoader {
        filters_reply: r#"{"filters": {"PageSize": 5000}}"#.into(),
        sql_reply: "{}".into(),
        fail: false,
        loads: Arc::clone(&loads),
        inferences: Arc::new(AtomicUsize::new(0)),
    };
    let session = Arc::new(ModelSession::new(
        Arc::new(loader),
        ModelConfig {
            model_path: model.path().to_path_buf(),
            ..ModelConfig::default()
        },
    ));

    let processor = QueryProcessor::new(Strategy::Model(Arc::clone(&session)));
    let response = processor
        .process_trigger_report(QueryRequest::new("everything"))
        .await;

    assert_eq!(response.parameters["filters"]["PageSize"], 1000);
    assert_eq!(session.load_attempts(), 1);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}
