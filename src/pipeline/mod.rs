//! Natural-language query resolution.
//!
//! Every request flows through:
//! 1. `PatternMatcher::evaluate()`: ordered keyword/regex rules (no model)
//! 2. `FilterExtractor::extract()`: model prompt + JSON parsing, or rules
//! 3. `ResponseComposer`: one envelope with intent, SQL/results and timing
//!
//! Which of the model-backed paths run is decided once, at startup, by the
//! [`Strategy`] handed to the [`QueryProcessor`].

pub mod collaborators;
pub mod composer;
pub mod extractor;
pub mod fields;
pub mod heuristics;
pub mod processor;
pub mod rules;
pub mod sql_generator;
pub mod types;

pub use processor::QueryProcessor;

use std::fmt;
use std::sync::Arc;

use crate::config::{QueryConfig, StrategyKind};
use crate::llm::{ModelLoader, ModelSession};

/// How free text is resolved.
#[derive(Clone)]
pub enum Strategy {
    /// Deterministic rules only. No model is ever loaded.
    RuleBased,
    /// Shared model session, with rules as fallback.
    Model(Arc<ModelSession>),
}

impl Strategy {
    pub fn from_config(config: &QueryConfig, loader: Arc<dyn ModelLoader>) -> Self {
        match config.strategy {
            StrategyKind::RuleBased => Self::RuleBased,
            StrategyKind::Model => {
                Self::Model(Arc::new(ModelSession::new(loader, config.model.clone())))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RuleBased => "rule_based",
            Self::Model(_) => "model",
        }
    }

    pub fn session(&self) -> Option<&Arc<ModelSession>> {
        match self {
            Self::RuleBased => None,
            Self::Model(session) => Some(session),
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DisabledLoader;

    #[test]
    fn strategy_follows_config() {
        let loader: Arc<dyn ModelLoader> = Arc::new(DisabledLoader);

        let rules = Strategy::from_config(&QueryConfig::default(), Arc::clone(&loader));
        assert_eq!(rules.name(), "rule_based");
        assert!(rules.session().is_none());

        let config = QueryConfig {
            strategy: StrategyKind::Model,
            ..QueryConfig::default()
        };
        let model = Strategy::from_config(&config, loader);
        assert_eq!(model.name(), "model");
        assert_eq!(model.session().unwrap().load_attempts(), 0);
    }
}
