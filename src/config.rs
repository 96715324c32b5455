//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Model files smaller than this are treated as truncated downloads.
pub const MIN_MODEL_BYTES: u64 = 1024 * 1024;

/// Which resolution strategy the process runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// Keyword/regex rules only; the model is never loaded.
    #[default]
    RuleBased,
    /// Local model first, rules as the fallback.
    Model,
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "rule_based" | "rules" => Ok(Self::RuleBased),
            "model" | "llm" => Ok(Self::Model),
            other => Err(format!("unknown strategy '{other}' (expected rule_based or model)")),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RuleBased => "rule_based",
            Self::Model => "model",
        })
    }
}

/// Local model settings.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Path to the GGUF model file.
    pub model_path: PathBuf,
    /// Budget for a single load attempt.
    pub load_timeout: Duration,
    /// Context window requested at load.
    pub context_size: u32,
    /// Layers offloaded to GPU (0 = CPU only).
    pub gpu_layers: u32,
    /// Token budget per generation.
    pub max_tokens: u32,
    /// Hard cap on generated characters.
    pub max_output_chars: usize,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./models/model.gguf"),
            load_timeout: Duration::from_secs(45),
            context_size: 4096,
            gpu_layers: 0,
            max_tokens: 512,
            max_output_chars: 4000,
            temperature: 0.1,
        }
    }
}

/// Query resolution configuration.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub strategy: StrategyKind,
    pub model: ModelConfig,
    /// Fall back to rules when the model fails.
    pub rule_fallback: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::RuleBased,
            model: ModelConfig::default(),
            rule_fallback: true,
        }
    }
}

impl QueryConfig {
    /// Load configuration from `CAMPAIGN_QUERY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let model_defaults = defaults.model;

        let strategy = parse_or(&lookup, "CAMPAIGN_QUERY_STRATEGY", defaults.strategy)?;
        let model_path = lookup("CAMPAIGN_QUERY_MODEL_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(model_defaults.model_path);
        let load_timeout_secs: u64 = parse_or(
            &lookup,
            "CAMPAIGN_QUERY_LOAD_TIMEOUT_SECS",
            model_defaults.load_timeout.as_secs(),
        )?;
        let context_size = parse_or(
            &lookup,
            "CAMPAIGN_QUERY_CONTEXT_SIZE",
            model_defaults.context_size,
        )?;
        let gpu_layers = parse_or(&lookup, "CAMPAIGN_QUERY_GPU_LAYERS", model_defaults.gpu_layers)?;
        let max_tokens = parse_or(&lookup, "CAMPAIGN_QUERY_MAX_TOKENS", model_defaults.max_tokens)?;
        let max_output_chars = parse_or(
            &lookup,
            "CAMPAIGN_QUERY_MAX_OUTPUT_CHARS",
            model_defaults.max_output_chars,
        )?;
        let temperature: f32 = parse_or(
            &lookup,
            "CAMPAIGN_QUERY_TEMPERATURE",
            model_defaults.temperature,
        )?;
        let rule_fallback = parse_or(
            &lookup,
            "CAMPAIGN_QUERY_RULE_FALLBACK",
            defaults.rule_fallback,
        )?;

        if load_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CAMPAIGN_QUERY_LOAD_TIMEOUT_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue {
                key: "CAMPAIGN_QUERY_TEMPERATURE".into(),
                message: format!("{temperature} is outside 0.0-2.0"),
            });
        }

        Ok(Self {
            strategy,
            model: ModelConfig {
                model_path,
                load_timeout: Duration::from_secs(load_timeout_secs),
                context_size,
                gpu_layers,
                max_tokens,
                max_output_chars,
                temperature,
            },
            rule_fallback,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("'{raw}': {e}"),
                })
        }
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = QueryConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.strategy, StrategyKind::RuleBased);
        assert!(config.rule_fallback);
        assert_eq!(config.model.max_tokens, 512);
        assert_eq!(config.model.load_timeout, Duration::from_secs(45));
    }

    #[test]
    fn reads_model_settings() {
        let config = QueryConfig::from_lookup(lookup(&[
            ("CAMPAIGN_QUERY_STRATEGY", "model"),
            ("CAMPAIGN_QUERY_MODEL_PATH", "/models/qwen.gguf"),
            ("CAMPAIGN_QUERY_LOAD_TIMEOUT_SECS", "30"),
            ("CAMPAIGN_QUERY_TEMPERATURE", "0.0"),
            ("CAMPAIGN_QUERY_RULE_FALLBACK", "false"),
        ]))
        .unwrap();
        assert_eq!(config.strategy, StrategyKind::Model);
        assert_eq!(config.model.model_path, PathBuf::from("/models/qwen.gguf"));
        assert_eq!(config.model.load_timeout, Duration::from_secs(30));
        assert_eq!(config.model.temperature, 0.0);
        assert!(!config.rule_fallback);
    }

    #[test]
    fn invalid_number_is_an_error() {
        let err = QueryConfig::from_lookup(lookup(&[("CAMPAIGN_QUERY_MAX_TOKENS", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "CAMPAIGN_QUERY_MAX_TOKENS"
        ));
    }

    #[test]
    fn unknown_strategy_is_an_error() {
        let err = QueryConfig::from_lookup(lookup(&[("CAMPAIGN_QUERY_STRATEGY", "magic")]))
            .unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let result =
            QueryConfig::from_lookup(lookup(&[("CAMPAIGN_QUERY_LOAD_TIMEOUT_SECS", "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn strategy_parsing_is_lenient_about_case() {
        assert_eq!("Rule-Based".parse::<StrategyKind>().unwrap(), StrategyKind::RuleBased);
        assert_eq!("LLM".parse::<StrategyKind>().unwrap(), StrategyKind::Model);
    }
}
