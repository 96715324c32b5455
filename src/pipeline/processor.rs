//! Query processor: free text in, [`QueryResponse`] out.
//!
//! Flow for [`QueryProcessor::process`]:
//! 1. Pattern matcher (fast, no model) → canned SQL or collaborator call
//! 2. Model SQL generation, only under the model strategy
//! 3. Generic "most recent campaigns" fallback
//!
//! [`QueryProcessor::process_trigger_report`] runs the filter extractor and
//! hands the resulting [`StructuredFilterSet`] to the trigger-report
//! collaborator.
//!
//! Model trouble never fails a request on its own: it is recorded as the
//! fallback reason and the rule path answers instead.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::llm::ModelLoader;
use crate::pipeline::Strategy;
use crate::pipeline::collaborators::{CampaignAnalytics, TriggerReports};
use crate::pipeline::composer::{ResponseComposer, Stopwatch};
use crate::pipeline::extractor::FilterExtractor;
use crate::pipeline::rules::{MatchAction, PatternMatch, PatternMatcher, most_recent_campaigns};
use crate::pipeline::sql_generator::SqlGenerator;
use crate::pipeline::types::{
    DebugInfo, ExtractionResult, IntentTag, QueryRequest, QueryResponse, StructuredFilterSet,
};

/// Entry point for natural-language campaign queries.
pub struct QueryProcessor {
    strategy: Strategy,
    matcher: PatternMatcher,
    extractor: FilterExtractor,
    sql_generator: Option<SqlGenerator>,
    rule_fallback: bool,
    analytics: Option<Arc<dyn CampaignAnalytics>>,
    reports: Option<Arc<dyn TriggerReports>>,
}

impl QueryProcessor {
    pub fn new(strategy: Strategy) -> Self {
        let sql_generator = strategy.session().map(|s| SqlGenerator::new(Arc::clone(s)));
        Self {
            extractor: FilterExtractor::new(strategy.clone()),
            strategy,
            matcher: PatternMatcher::default_rules(),
            sql_generator,
            rule_fallback: true,
            analytics: None,
            reports: None,
        }
    }

    /// Build the strategy described by `config` and a processor around it.
    pub fn from_config(config: &QueryConfig, loader: Arc<dyn ModelLoader>) -> Self {
        Self::new(Strategy::from_config(config, loader)).with_rule_fallback(config.rule_fallback)
    }

    pub fn with_rule_fallback(self, enabled: bool) -> Self {
        Self {
            extractor: self.extractor.with_rule_fallback(enabled),
            rule_fallback: enabled,
            ..self
        }
    }

    /// Pin the date relative periods resolve against.
    pub fn with_today(self, today: NaiveDate) -> Self {
        Self {
            extractor: self.extractor.with_today(today),
            ..self
        }
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn CampaignAnalytics>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn with_trigger_reports(mut self, reports: Arc<dyn TriggerReports>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Answer a free-text question with SQL or collaborator results.
    pub async fn process(&self, request: QueryRequest) -> QueryResponse {
        let stopwatch = Stopwatch::start();
        let request_id = Uuid::new_v4().to_string();
        info!(
            request_id = %request_id,
            strategy = self.strategy.name(),
            query = %request.query,
            "Processing query"
        );

        let mut debug_info = DebugInfo {
            request_id: request_id.clone(),
            strategy: self.strategy.name().to_string(),
            ..DebugInfo::default()
        };
        let composer = ResponseComposer::new(&request.query, stopwatch);
        let query = request.query.trim();

        if query.is_empty() {
            return composer
                .error(QueryError::EmptyQuery)
                .debug_info(request.include_debug_info.then_some(debug_info))
                .finish();
        }

        // Step 1: pattern rules
        if let Some(matched) = self.matcher.evaluate(query) {
            return self
                .respond_to_match(composer, matched, debug_info, request.include_debug_info)
                .await;
        }

        // Step 2: model SQL
        if let Some(generator) = &self.sql_generator {
            match generator.generate(query, request.context.as_deref()).await {
                Ok(generated) => {
                    info!(
                        request_id = %request_id,
                        intent = %generated.intent,
                        "Model generated SQL"
                    );
                    debug_info.matched_rule = Some("model_sql".into());
                    debug_info.raw_model_output = Some(generated.raw_output);
                    return composer
                        .intent(generated.intent)
                        .sql(generated.sql)
                        .explanation(generated.explanation)
                        .debug_info(request.include_debug_info.then_some(debug_info))
                        .finish();
                }
                Err(e) if !self.rule_fallback => {
                    warn!(request_id = %request_id, error = %e, "Model SQL generation failed");
                    return composer
                        .error(e)
                        .debug_info(request.include_debug_info.then_some(debug_info))
                        .finish();
                }
                Err(e) => {
                    warn!(
                        request_id = %request_id,
                        error = %e,
                        "Model SQL generation failed; using default query"
                    );
                    debug_info.fallback_reason = Some(e.to_string());
                }
            }
        }

        // Step 3: generic fallback
        debug!(request_id = %request_id, "No rule matched; listing recent campaigns");
        let mut fallback = most_recent_campaigns();
        if let Some(reason) = &debug_info.fallback_reason {
            fallback.explanation =
                format!("{} (model unavailable, rule-based fallback)", fallback.explanation);
            fallback
                .parameters
                .insert("fallbackReason".into(), json!(reason));
        }
        self.respond_to_match(composer, fallback, debug_info, request.include_debug_info)
            .await
    }

    async fn respond_to_match(
        &self,
        composer: ResponseComposer,
        matched: PatternMatch,
        mut debug_info: DebugInfo,
        include_debug: bool,
    ) -> QueryResponse {
        debug_info.matched_rule = Some(matched.rule.to_string());
        debug_info.dropped_fields = matched.intent.dropped_fields().to_vec();

        let mut composer = composer
            .intent(matched.intent.tag())
            .explanation(matched.explanation)
            .parameters(matched.parameters);

        composer = match matched.action {
            MatchAction::Sql(sql) => composer.sql(sql),
            MatchAction::Call(call) => {
                let composer = composer
                    .parameter("collaborator", json!(call.name()))
                    .parameter("call", call.arguments());
                match &self.analytics {
                    Some(analytics) => match call.execute(analytics.as_ref()).await {
                        Ok(results) => composer.results(results),
                        Err(e) => {
                            error!(
                                request_id = %debug_info.request_id,
                                call = %call,
                                error = %e,
                                "Collaborator query failed"
                            );
                            composer.error(QueryError::from(e))
                        }
                    },
                    None => {
                        debug!(call = %call, "No analytics collaborator configured");
                        composer.parameter("description", json!(call.to_string()))
                    }
                }
            }
        };

        composer
            .debug_info(include_debug.then_some(debug_info))
            .finish()
    }

    /// Resolve free text into trigger-report filters and run them.
    pub async fn process_trigger_report(&self, request: QueryRequest) -> QueryResponse {
        let stopwatch = Stopwatch::start();
        let request_id = Uuid::new_v4().to_string();
        info!(
            request_id = %request_id,
            strategy = self.strategy.name(),
            query = %request.query,
            "Processing trigger report query"
        );

        let extraction = self
            .extractor
            .extract(&request.query, request.context.as_deref())
            .await;

        let debug_info = DebugInfo {
            request_id: request_id.clone(),
            strategy: self.strategy.name().to_string(),
            matched_rule: None,
            fallback_reason: extraction.fallback_reason.clone(),
            raw_model_output: extraction.raw_output.clone(),
            confidence: Some(extraction.confidence),
            warnings: extraction.warnings.clone(),
            dropped_fields: Vec::new(),
        };
        let composer = ResponseComposer::new(&request.query, stopwatch)
            .intent(IntentTag::Campaigns)
            .debug_info(request.include_debug_info.then_some(debug_info));

        if !extraction.success {
            let message = extraction
                .error
                .unwrap_or_else(|| "filter extraction failed".to_string());
            warn!(request_id = %request_id, error = %message, "Filter extraction failed");
            return composer.error(message).finish();
        }

        let composer = composer
            .sql(extraction.filters.to_sql())
            .explanation(extraction.explanation.clone())
            .parameters(extraction_parameters(&extraction));

        match &self.reports {
            Some(reports) => match reports.get_reports_filtered(&extraction.filters).await {
                Ok((rows, total)) => {
                    info!(
                        request_id = %request_id,
                        rows = rows.len(),
                        total,
                        "Trigger reports fetched"
                    );
                    composer.trigger_reports(rows, total).finish()
                }
                Err(e) => {
                    error!(request_id = %request_id, error = %e, "Trigger report query failed");
                    composer.error(QueryError::from(e)).finish()
                }
            },
            None => composer.finish(),
        }
    }
}

/// Envelope parameters for an extraction: the full filter set plus which
/// fields were actually read from the query.
fn extraction_parameters(extraction: &ExtractionResult) -> Map<String, Value> {
    let mut parameters = Map::new();
    parameters.insert("filters".into(), filters_json(&extraction.filters));
    parameters.insert(
        "extractedParameters".into(),
        json!(extraction.extracted_parameters),
    );
    parameters.insert("confidence".into(), json!(extraction.confidence));
    parameters.insert("source".into(), json!(extraction.source));
    parameters
}

fn filters_json(filters: &StructuredFilterSet) -> Value {
    serde_json::to_value(filters).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::error::CollaboratorError;

    #[derive(Default)]
    struct StubAnalytics {
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CampaignAnalytics for StubAnalytics {
        async fn get_campaigns(
            &self,
            page_size: u32,
            offset: u64,
        ) -> Result<Vec<Value>, CollaboratorError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("campaigns({page_size},{offset})"));
            if self.fail {
                return Err(CollaboratorError::QueryFailed {
                    collaborator: "campaigns".into(),
                    reason: "warehouse offline".into(),
                });
            }
            Ok(vec![json!({"name": "Spring Sale", "open_rate": 31.5})])
        }

        async fn get_email_events(
            &self,
            _campaign_id: Option<&str>,
            event_type: Option<&str>,
            _page_size: u32,
            _offset: u64,
        ) -> Result<Vec<Value>, CollaboratorError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("events({})", event_type.unwrap_or("*")));
            Ok(vec![])
        }

        async fn get_dashboard_metrics(&self) -> Result<Value, CollaboratorError> {
            Ok(json!({"totalCampaigns": 3}))
        }

        async fn get_recipients(
            &self,
            _page_size: u32,
            _offset: u64,
        ) -> Result<Vec<Value>, CollaboratorError> {
            Ok(vec![])
        }

        async fn get_email_lists(&self) -> Result<Vec<Value>, CollaboratorError> {
            Ok(vec![json!({"name": "Newsletter"})])
        }
    }

    struct StubReports;

    #[async_trait]
    impl TriggerReports for StubReports {
        async fn get_reports_filtered(
            &self,
            filters: &StructuredFilterSet,
        ) -> Result<(Vec<Value>, u64), CollaboratorError> {
            let name = filters.strategy_name.clone().unwrap_or_default();
            Ok((vec![json!({"StrategyName": name})], 42))
        }
    }

    fn rules_processor() -> QueryProcessor {
        QueryProcessor::new(Strategy::RuleBased)
            .with_today(NaiveDate::from_ymd_opt(2024, 12, 15).unwrap())
    }

    #[tokio::test]
    async fn high_open_rates_yield_filter_sql() {
        let response = rules_processor()
            .process(QueryRequest::new("Show me campaigns with high open rates"))
            .await;
        assert!(response.success);
        assert_eq!(response.intent, IntentTag::Campaigns);
        let sql = response.generated_sql.unwrap();
        assert!(sql.contains("OpenRate >= 20"));
        assert!(sql.contains("ORDER BY OpenRate DESC"));
        assert_eq!(response.parameters["MinOpenRatePercentage"], "20");
    }

    #[tokio::test]
    async fn threshold_parameters_reach_the_envelope() {
        let response = rules_processor()
            .process(QueryRequest::new("campaigns with clicks more than 1000"))
            .await;
        assert_eq!(response.parameters["metricType"], "click");
        assert_eq!(response.parameters["threshold"], 1000);
        assert_eq!(response.parameters["isGreater"], true);
    }

    #[tokio::test]
    async fn collaborator_calls_are_executed() {
        let analytics = Arc::new(StubAnalytics::default());
        let processor = rules_processor().with_analytics(analytics.clone());

        let response = processor.process(QueryRequest::new("list all campaigns")).await;
        assert!(response.success);
        assert_eq!(response.results.unwrap()[0]["name"], "Spring Sale");
        assert_eq!(response.parameters["collaborator"], "getCampaigns");

        let response = processor.process(QueryRequest::new("who opened")).await;
        assert_eq!(response.intent, IntentTag::Events);

        let calls = analytics.calls.lock().unwrap();
        assert_eq!(*calls, vec!["campaigns(50,0)", "events(open)"]);
    }

    #[tokio::test]
    async fn unconfigured_collaborator_returns_call_description() {
        let response = rules_processor().process(QueryRequest::new("show my email lists")).await;
        assert!(response.success);
        assert!(response.results.is_none());
        assert_eq!(response.intent, IntentTag::Lists);
        assert_eq!(response.parameters["description"], "getEmailLists()");
    }

    #[tokio::test]
    async fn collaborator_failure_is_reported_not_raised() {
        let processor = rules_processor().with_analytics(Arc::new(StubAnalytics {
            fail: true,
            ..StubAnalytics::default()
        }));
        let response = processor.process(QueryRequest::new("list campaigns")).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("warehouse offline"));
    }

    #[tokio::test]
    async fn unmatched_query_falls_back_to_recent_campaigns() {
        let response = rules_processor()
            .process(QueryRequest::new("hello there").with_debug_info())
            .await;
        assert!(response.success);
        assert_eq!(response.intent, IntentTag::Campaigns);
        let debug = response.debug_info.unwrap();
        assert_eq!(debug.matched_rule.as_deref(), Some("most_recent_campaigns"));
        assert_eq!(debug.strategy, "rule_based");
        assert!(Uuid::parse_str(&debug.request_id).is_ok());
    }

    #[tokio::test]
    async fn empty_query_is_a_validation_error() {
        let response = rules_processor().process(QueryRequest::new("  ")).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("empty"));
        assert_eq!(response.intent, IntentTag::Campaigns);
    }

    #[tokio::test]
    async fn debug_info_only_when_requested() {
        let response = rules_processor().process(QueryRequest::new("dashboard")).await;
        assert!(response.debug_info.is_none());
    }

    #[tokio::test]
    async fn trigger_report_black_friday_by_rules() {
        let processor = rules_processor().with_trigger_reports(Arc::new(StubReports));
        let response = processor
            .process_trigger_report(
                QueryRequest::new(
                    "Find Black Friday campaigns from last month with more than 1000 emails",
                )
                .with_debug_info(),
            )
            .await;

        assert!(response.success);
        let filters = &response.parameters["filters"];
        assert_eq!(filters["StrategyName"], "Black Friday");
        assert_eq!(filters["MinTotalEmails"], 1000);
        assert_eq!(filters["StartDate"], "2024-11-01");
        assert_eq!(filters["EndDate"], "2024-11-30");
        assert_eq!(response.total_count, Some(42));
        assert_eq!(
            response.trigger_reports.unwrap()[0]["StrategyName"],
            "Black Friday"
        );
        let sql = response.generated_sql.unwrap();
        assert!(sql.contains("FirstEmailSent >= '2024-11-01'"));
        assert_eq!(response.debug_info.unwrap().confidence, Some(0.6));
    }

    #[tokio::test]
    async fn trigger_report_defaults_pagination() {
        let response = rules_processor()
            .process_trigger_report(QueryRequest::new("show campaigns"))
            .await;
        assert!(response.success);
        assert_eq!(response.parameters["filters"]["PageNumber"], 1);
        assert_eq!(response.parameters["filters"]["PageSize"], 50);
        assert!(response.trigger_reports.is_none());
    }

    #[tokio::test]
    async fn trigger_report_rate_filters() {
        let response = rules_processor()
            .process_trigger_report(QueryRequest::new("campaigns with open rate above 25.5%"))
            .await;
        let filters: StructuredFilterSet =
            serde_json::from_value(response.parameters["filters"].clone()).unwrap();
        assert_eq!(filters.min_open_rate_percentage, Some(dec!(25.5)));
    }

    #[tokio::test]
    async fn trigger_report_empty_query() {
        let response = rules_processor()
            .process_trigger_report(QueryRequest::new(""))
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("empty"));
    }
}
