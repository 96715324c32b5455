//! Read-only analytics collaborators.
//!
//! The query core never talks to a database itself. Pattern rules that need
//! live data return a [`CollaboratorCall`], and the processor runs it against
//! whatever [`CampaignAnalytics`] implementation was injected.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::CollaboratorError;
use crate::pipeline::types::StructuredFilterSet;

/// Campaign, recipient and event aggregate queries. All read-only and paginated.
#[async_trait]
pub trait CampaignAnalytics: Send + Sync {
    async fn get_campaigns(&self, page_size: u32, offset: u64)
    -> Result<Vec<Value>, CollaboratorError>;

    async fn get_email_events(
        &self,
        campaign_id: Option<&str>,
        event_type: Option<&str>,
        page_size: u32,
        offset: u64,
    ) -> Result<Vec<Value>, CollaboratorError>;

    async fn get_dashboard_metrics(&self) -> Result<Value, CollaboratorError>;

    async fn get_recipients(&self, page_size: u32, offset: u64)
    -> Result<Vec<Value>, CollaboratorError>;

    async fn get_email_lists(&self) -> Result<Vec<Value>, CollaboratorError>;
}

/// Filtered trigger-report query. Returns the page of rows and the total count.
#[async_trait]
pub trait TriggerReports: Send + Sync {
    async fn get_reports_filtered(
        &self,
        filters: &StructuredFilterSet,
    ) -> Result<(Vec<Value>, u64), CollaboratorError>;
}

/// A delegated read-only query chosen by a pattern rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum CollaboratorCall {
    Campaigns {
        page_size: u32,
        offset: u64,
    },
    EmailEvents {
        #[serde(skip_serializing_if = "Option::is_none")]
        campaign_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        event_type: Option<String>,
        page_size: u32,
        offset: u64,
    },
    DashboardMetrics,
    Recipients {
        page_size: u32,
        offset: u64,
    },
    EmailLists,
}

impl CollaboratorCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Campaigns { .. } => "getCampaigns",
            Self::EmailEvents { .. } => "getEmailEvents",
            Self::DashboardMetrics => "getDashboardMetrics",
            Self::Recipients { .. } => "getRecipients",
            Self::EmailLists => "getEmailLists",
        }
    }

    /// Call arguments as JSON, for the response `parameters`.
    pub fn arguments(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Run the call. Row lists come back as a JSON array.
    pub async fn execute(
        &self,
        analytics: &dyn CampaignAnalytics,
    ) -> Result<Value, CollaboratorError> {
        let rows = match self {
            Self::Campaigns { page_size, offset } => {
                analytics.get_campaigns(*page_size, *offset).await?
            }
            Self::EmailEvents {
                campaign_id,
                event_type,
                page_size,
                offset,
            } => {
                analytics
                    .get_email_events(
                        campaign_id.as_deref(),
                        event_type.as_deref(),
                        *page_size,
                        *offset,
                    )
                    .await?
            }
            Self::DashboardMetrics => return analytics.get_dashboard_metrics().await,
            Self::Recipients { page_size, offset } => {
                analytics.get_recipients(*page_size, *offset).await?
            }
            Self::EmailLists => analytics.get_email_lists().await?,
        };
        Ok(Value::Array(rows))
    }
}

impl std::fmt::Display for CollaboratorCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Campaigns { page_size, offset } => {
                write!(f, "getCampaigns(pageSize={page_size}, offset={offset})")
            }
            Self::EmailEvents {
                campaign_id,
                event_type,
                page_size,
                offset,
            } => write!(
                f,
                "getEmailEvents(campaignId={}, eventType={}, pageSize={page_size}, offset={offset})",
                campaign_id.as_deref().unwrap_or("*"),
                event_type.as_deref().unwrap_or("*"),
            ),
            Self::DashboardMetrics => f.write_str("getDashboardMetrics()"),
            Self::Recipients { page_size, offset } => {
                write!(f, "getRecipients(pageSize={page_size}, offset={offset})")
            }
            Self::EmailLists => f.write_str("getEmailLists()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CampaignAnalytics for Recorder {
        async fn get_campaigns(
            &self,
            page_size: u32,
            offset: u64,
        ) -> Result<Vec<Value>, CollaboratorError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("campaigns {page_size} {offset}"));
            Ok(vec![json!({"name": "Spring Sale"})])
        }

        async fn get_email_events(
            &self,
            campaign_id: Option<&str>,
            event_type: Option<&str>,
            _page_size: u32,
            _offset: u64,
        ) -> Result<Vec<Value>, CollaboratorError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("events {campaign_id:?} {event_type:?}"));
            Ok(vec![])
        }

        async fn get_dashboard_metrics(&self) -> Result<Value, CollaboratorError> {
            Ok(json!({"totalCampaigns": 12}))
        }

        async fn get_recipients(
            &self,
            _page_size: u32,
            _offset: u64,
        ) -> Result<Vec<Value>, CollaboratorError> {
            Err(CollaboratorError::QueryFailed {
                collaborator: "recipients".into(),
                reason: "connection reset".into(),
            })
        }

        async fn get_email_lists(&self) -> Result<Vec<Value>, CollaboratorError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn executes_row_calls_as_arrays() {
        let recorder = Recorder::default();
        let rows = CollaboratorCall::Campaigns {
            page_size: 50,
            offset: 0,
        }
        .execute(&recorder)
        .await
        .unwrap();
        assert_eq!(rows, json!([{"name": "Spring Sale"}]));

        CollaboratorCall::EmailEvents {
            campaign_id: None,
            event_type: Some("click".into()),
            page_size: 50,
            offset: 0,
        }
        .execute(&recorder)
        .await
        .unwrap();

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls[0], "campaigns 50 0");
        assert_eq!(calls[1], "events None Some(\"click\")");
    }

    #[tokio::test]
    async fn dashboard_metrics_pass_through() {
        let value = CollaboratorCall::DashboardMetrics
            .execute(&Recorder::default())
            .await
            .unwrap();
        assert_eq!(value["totalCampaigns"], 12);
    }

    #[tokio::test]
    async fn errors_propagate() {
        let err = CollaboratorCall::Recipients {
            page_size: 10,
            offset: 0,
        }
        .execute(&Recorder::default())
        .await
        .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn display_and_arguments() {
        let call = CollaboratorCall::EmailEvents {
            campaign_id: Some("42".into()),
            event_type: None,
            page_size: 50,
            offset: 100,
        };
        assert_eq!(
            call.to_string(),
            "getEmailEvents(campaignId=42, eventType=*, pageSize=50, offset=100)"
        );
        let args = call.arguments();
        assert_eq!(args["call"], "email_events");
        assert_eq!(args["campaign_id"], "42");
        assert!(args.get("event_type").is_none());
    }
}
