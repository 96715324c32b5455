//! Local language model integration.
//!
//! - [`ModelLoader`] turns a model file into an [`InferenceEngine`]
//! - [`ModelSession`] owns the lazy, mutex-guarded load and serializes inference
//! - [`GenerationGuard`] bounds every generation (stop sequences, tokens, chars)
//!
//! The llama.cpp backend is compiled in with the `llama` cargo feature. Without
//! it, [`default_loader`] returns a loader that always fails, so the `Model`
//! strategy degrades to rule-based processing.

pub mod generation;
#[cfg(feature = "llama")]
pub mod llamacpp;
pub mod session;

pub use generation::{Generation, GenerationGuard, InferenceRequest, StopReason};
pub use session::{ModelSession, SessionStatus};

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::config::ModelConfig;
use crate::error::LlmError;

/// Options for a single load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub context_size: u32,
    pub gpu_layers: u32,
}

impl LoadOptions {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            context_size: config.context_size,
            gpu_layers: config.gpu_layers,
        }
    }

    /// Settings for the retry after an incompatible-layout failure.
    pub fn conservative(self) -> Self {
        Self {
            context_size: self.context_size.min(2048),
            gpu_layers: 0,
        }
    }
}

/// A loaded model that can generate text.
///
/// Inference is blocking and CPU-bound; the session runs it on a blocking thread.
pub trait InferenceEngine: Send + Sync {
    fn name(&self) -> &str;

    fn infer(&self, request: &InferenceRequest) -> Result<Generation, LlmError>;

    /// Whether concurrent `infer` calls against the same weights are safe.
    fn supports_concurrent_inference(&self) -> bool {
        false
    }
}

/// Loads model files into engines.
pub trait ModelLoader: Send + Sync {
    /// Load the model at `path`. Implementations should poll `cancel` between
    /// expensive steps and give up once it is set.
    fn load(
        &self,
        path: &Path,
        options: LoadOptions,
        cancel: &AtomicBool,
    ) -> Result<Arc<dyn InferenceEngine>, LlmError>;
}

/// Loader used when the crate is built without a model backend.
pub struct DisabledLoader;

impl ModelLoader for DisabledLoader {
    fn load(
        &self,
        _path: &Path,
        _options: LoadOptions,
        _cancel: &AtomicBool,
    ) -> Result<Arc<dyn InferenceEngine>, LlmError> {
        Err(LlmError::LoadFailure {
            reason: "built without a model backend (enable the `llama` feature)".into(),
        })
    }
}

/// Pick the model loader compiled into this build.
pub fn default_loader() -> Arc<dyn ModelLoader> {
    #[cfg(feature = "llama")]
    {
        match llamacpp::LlamaCppLoader::new() {
            Ok(loader) => return Arc::new(loader),
            Err(e) => {
                tracing::error!(error = %e, "llama.cpp backend unavailable");
                return Arc::new(DisabledLoader);
            }
        }
    }

    #[cfg(not(feature = "llama"))]
    {
        tracing::info!("No model backend compiled in; model strategy will use rules");
        Arc::new(DisabledLoader)
    }
}
