use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use campaign_query::config::StrategyKind;
use campaign_query::llm::default_loader;
use campaign_query::pipeline::types::QueryRequest;
use campaign_query::{QueryConfig, QueryProcessor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries only JSON envelopes.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = QueryConfig::from_env().context("invalid CAMPAIGN_QUERY_* configuration")?;

    eprintln!("Campaign Query v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Strategy: {}", config.strategy);
    if config.strategy == StrategyKind::Model {
        eprintln!("   Model: {}", config.model.model_path.display());
    }
    eprintln!(
        "   Type a question and press Enter. /report <question> for trigger reports, /quit to exit.\n"
    );

    let processor = Arc::new(QueryProcessor::from_config(&config, default_loader()));

    // Warm the model in the background so the first question doesn't pay for the load.
    if let Some(session) = processor.strategy().session() {
        let session = Arc::clone(session);
        tokio::spawn(async move {
            if let Err(e) = session.ensure_ready().await {
                tracing::warn!(error = %e, "Model warm-up failed; rule-based answers only");
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            eprint!("> ");
            continue;
        }
        let response = match Command::parse(line) {
            Command::Quit => break,
            Command::Report(question) => {
                processor
                    .process_trigger_report(QueryRequest::new(question).with_debug_info())
                    .await
            }
            Command::Ask(question) => {
                processor
                    .process(QueryRequest::new(question).with_debug_info())
                    .await
            }
        };

        println!("{}", serde_json::to_string_pretty(&response)?);
        eprint!("> ");
    }

    Ok(())
}

/// One line of REPL input.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Quit,
    Report(&'a str),
    Ask(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let (head, rest) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));
        match head {
            "/quit" => Self::Quit,
            "/report" => Self::Report(rest.trim()),
            _ => Self::Ask(line),
        }
    }
}
