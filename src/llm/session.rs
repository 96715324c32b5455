//! Model session: a lazily loaded, process-wide handle to the local model.
//!
//! State machine:
//!
//! ```text
//! Uninitialized ──> Initializing ──> Ready
//!                         └────────> Failed   (terminal for the process)
//! ```
//!
//! `ensure_ready()` is double-checked: a read of the current state answers the
//! common case, and only callers that see `Uninitialized` queue on the init
//! lock. Whoever gets the lock first loads; everyone queued behind it re-reads
//! the state and sees the outcome instead of starting a second load.
//!
//! A failure is permanent. Later calls get the cached cause back without
//! touching the loader, and callers fall back to rule-based processing.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{MIN_MODEL_BYTES, ModelConfig};
use crate::error::LlmError;
use crate::llm::{Generation, InferenceEngine, InferenceRequest, LoadOptions, ModelLoader};

/// Observable session status.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Uninitialized,
    Initializing,
    Ready,
    Failed(LlmError),
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

enum SessionState {
    Uninitialized,
    Initializing,
    Ready(Arc<dyn InferenceEngine>),
    Failed(LlmError),
}

/// Shared handle to the local model. Construct once, wrap in `Arc`, inject.
pub struct ModelSession {
    loader: Arc<dyn ModelLoader>,
    config: ModelConfig,
    state: RwLock<SessionState>,
    init_lock: Mutex<()>,
    infer_lock: Mutex<()>,
    load_attempts: AtomicU32,
}

impl ModelSession {
    pub fn new(loader: Arc<dyn ModelLoader>, config: ModelConfig) -> Self {
        Self {
            loader,
            config,
            state: RwLock::new(SessionState::Uninitialized),
            init_lock: Mutex::new(()),
            infer_lock: Mutex::new(()),
            load_attempts: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Number of times the loader has been invoked (conservative retries included).
    pub fn load_attempts(&self) -> u32 {
        self.load_attempts.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> SessionStatus {
        match &*self.state.read().await {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::Initializing => SessionStatus::Initializing,
            SessionState::Ready(_) => SessionStatus::Ready,
            SessionState::Failed(e) => SessionStatus::Failed(e.clone()),
        }
    }

    /// Load the model if nobody has yet, and return the engine.
    pub async fn ensure_ready(&self) -> Result<Arc<dyn InferenceEngine>, LlmError> {
        if let Some(outcome) = self.settled().await {
            return outcome;
        }

        let _guard = self.init_lock.lock().await;
        if let Some(outcome) = self.settled().await {
            return outcome;
        }

        *self.state.write().await = SessionState::Initializing;
        info!(path = %self.config.model_path.display(), "Initializing model session");
        let started = Instant::now();

        let outcome = self.initialize().await;
        let mut state = self.state.write().await;
        match outcome {
            Ok(engine) => {
                info!(
                    engine = engine.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Model session ready"
                );
                *state = SessionState::Ready(Arc::clone(&engine));
                Ok(engine)
            }
            Err(e) => {
                warn!(error = %e, "Model session failed; rule-based processing will be used");
                *state = SessionState::Failed(e.clone());
                Err(e)
            }
        }
    }

    /// Run one bounded generation against the loaded model.
    pub async fn infer(&self, request: InferenceRequest) -> Result<Generation, LlmError> {
        let engine = self.ensure_ready().await?;

        let _serial = if engine.supports_concurrent_inference() {
            None
        } else {
            Some(self.infer_lock.lock().await)
        };

        let started = Instant::now();
        let generation = tokio::task::spawn_blocking(move || engine.infer(&request))
            .await
            .map_err(|e| LlmError::InferenceFailed {
                reason: format!("inference task panicked: {e}"),
            })??;

        debug!(
            tokens = generation.tokens,
            stop_reason = ?generation.stop_reason,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Inference complete"
        );
        Ok(generation)
    }

    /// `Some` once the session has reached a terminal state.
    async fn settled(&self) -> Option<Result<Arc<dyn InferenceEngine>, LlmError>> {
        match &*self.state.read().await {
            SessionState::Ready(engine) => Some(Ok(Arc::clone(engine))),
            SessionState::Failed(e) => Some(Err(e.clone())),
            SessionState::Uninitialized | SessionState::Initializing => None,
        }
    }

    async fn initialize(&self) -> Result<Arc<dyn InferenceEngine>, LlmError> {
        let path = &self.config.model_path;
        let metadata = std::fs::metadata(path).map_err(|_| LlmError::ModelNotFound {
            path: path.display().to_string(),
        })?;
        if !metadata.is_file() {
            return Err(LlmError::ModelNotFound {
                path: path.display().to_string(),
            });
        }
        if metadata.len() < MIN_MODEL_BYTES {
            return Err(LlmError::LoadFailure {
                reason: format!(
                    "model file {} is only {} bytes",
                    path.display(),
                    metadata.len()
                ),
            });
        }

        let options = LoadOptions::from_config(&self.config);
        match self.load_once(options).await {
            Err(LlmError::IncompatibleLayout { reason }) => {
                let retry = options.conservative();
                warn!(
                    %reason,
                    context_size = retry.context_size,
                    "Incompatible model layout, retrying with conservative settings"
                );
                self.load_once(retry).await
            }
            other => other,
        }
    }

    async fn load_once(&self, options: LoadOptions) -> Result<Arc<dyn InferenceEngine>, LlmError> {
        self.load_attempts.fetch_add(1, Ordering::SeqCst);

        let cancel = Arc::new(AtomicBool::new(false));
        let loader = Arc::clone(&self.loader);
        let path: PathBuf = self.config.model_path.clone();
        let task_cancel = Arc::clone(&cancel);
        let handle =
            tokio::task::spawn_blocking(move || loader.load(&path, options, &task_cancel));

        let timeout = self.config.load_timeout;
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(LlmError::LoadFailure {
                reason: format!("load task panicked: {join_error}"),
            }),
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                Err(LlmError::Timeout { after: timeout })
            }
        }
    }
}
