//! llama.cpp engine: native local inference over GGUF files via llama-cpp-2.
//!
//! The backend is initialized once per process by [`LlamaCppLoader::new`]. A
//! fresh `LlamaContext` is created per inference call and never shared.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;

use crate::error::LlmError;
use crate::llm::{
    Generation, GenerationGuard, InferenceEngine, InferenceRequest, LoadOptions, ModelLoader,
};

/// Prompt tokens are decoded in chunks of this size.
const BATCH_SIZE: usize = 2048;

/// Load error fragments that indicate the file's memory layout does not match
/// what this llama.cpp build expects.
const LAYOUT_MARKERS: &[&str] = &["alignment", "layout", "mmap", "tensor data is not within"];

pub struct LlamaCppLoader {
    backend: Arc<LlamaBackend>,
}

impl LlamaCppLoader {
    pub fn new() -> Result<Self, LlmError> {
        let backend = LlamaBackend::init().map_err(|e| LlmError::LoadFailure {
            reason: format!("failed to initialize llama.cpp backend: {e:?}"),
        })?;
        Ok(Self {
            backend: Arc::new(backend),
        })
    }
}

impl ModelLoader for LlamaCppLoader {
    fn load(
        &self,
        path: &Path,
        options: LoadOptions,
        cancel: &AtomicBool,
    ) -> Result<Arc<dyn InferenceEngine>, LlmError> {
        if cancel.load(Ordering::SeqCst) {
            return Err(LlmError::LoadFailure {
                reason: "load cancelled before start".into(),
            });
        }

        tracing::info!(
            path = %path.display(),
            context_size = options.context_size,
            gpu_layers = options.gpu_layers,
            "Loading GGUF model via llama.cpp"
        );

        let params = LlamaModelParams::default().with_n_gpu_layers(options.gpu_layers);
        let model = LlamaModel::load_from_file(&self.backend, path, &params).map_err(|e| {
            let reason = format!("{e:?}");
            let lower = reason.to_lowercase();
            if LAYOUT_MARKERS.iter().any(|m| lower.contains(m)) {
                LlmError::IncompatibleLayout { reason }
            } else {
                LlmError::LoadFailure { reason }
            }
        })?;

        if cancel.load(Ordering::SeqCst) {
            return Err(LlmError::LoadFailure {
                reason: "load cancelled after timeout".into(),
            });
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "gguf".to_string());

        Ok(Arc::new(LlamaCppEngine {
            model,
            backend: Arc::clone(&self.backend),
            name,
            context_size: options.context_size,
        }))
    }
}

pub struct LlamaCppEngine {
    model: LlamaModel,
    backend: Arc<LlamaBackend>,
    name: String,
    context_size: u32,
}

// SAFETY: the model and backend are only read during inference; the mutable
// LlamaContext is created per call and dropped before returning.
unsafe impl Send for LlamaCppEngine {}
unsafe impl Sync for LlamaCppEngine {}

impl InferenceEngine for LlamaCppEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer(&self, request: &InferenceRequest) -> Result<Generation, LlmError> {
        let failed = |what: &str, e: &dyn std::fmt::Debug| LlmError::InferenceFailed {
            reason: format!("{what}: {e:?}"),
        };

        let ctx_params =
            LlamaContextParams::default().with_n_ctx(NonZeroU32::new(self.context_size));
        let mut ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| failed("failed to create context", &e))?;

        let tokens = self
            .model
            .str_to_token(&request.prompt, AddBos::Always)
            .map_err(|e| failed("tokenization failed", &e))?;
        if tokens.is_empty() {
            return Ok(Generation::text(""));
        }

        let max_prompt = (self.context_size as usize).saturating_sub(request.max_tokens as usize);
        let tokens = if tokens.len() > max_prompt {
            tracing::warn!(
                prompt_tokens = tokens.len(),
                max = max_prompt,
                "Prompt truncated to fit context window"
            );
            tokens[tokens.len() - max_prompt..].to_vec()
        } else {
            tokens
        };
        let n_prompt = tokens.len();

        let mut batch = LlamaBatch::new(BATCH_SIZE, 1);
        let mut processed = 0usize;
        while processed < n_prompt {
            batch.clear();
            let end = (processed + BATCH_SIZE).min(n_prompt);
            for (i, token) in tokens.iter().enumerate().take(end).skip(processed) {
                batch
                    .add(*token, i as i32, &[0], i == n_prompt - 1)
                    .map_err(|e| failed("failed to add prompt token", &e))?;
            }
            ctx.decode(&mut batch)
                .map_err(|e| failed("prompt decode failed", &e))?;
            processed = end;
        }

        let mut sampler = LlamaSampler::chain_simple([
            LlamaSampler::penalties(256, 1.1, 0.0, 0.0),
            LlamaSampler::temp(request.temperature),
            LlamaSampler::top_p(0.9, 1),
            LlamaSampler::dist(0),
        ]);

        let eos = self.model.token_eos();
        let mut guard = GenerationGuard::new(request);
        let mut position = n_prompt as i32;

        loop {
            let token = sampler.sample(&ctx, -1);
            if token == eos {
                break;
            }

            #[allow(deprecated)]
            let piece = self
                .model
                .token_to_str(token, Special::Tokenize)
                .unwrap_or_default();
            if guard.push(&piece).is_some() {
                break;
            }

            batch.clear();
            batch
                .add(token, position, &[0], true)
                .map_err(|e| failed("failed to add generated token", &e))?;
            position += 1;
            ctx.decode(&mut batch)
                .map_err(|e| failed("decode step failed", &e))?;
        }

        Ok(guard.finish())
    }
}
