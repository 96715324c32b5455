//! Bounded generation: stop sequences, token budget and a hard length cap.
//!
//! Engines feed decoded token pieces into a [`GenerationGuard`] and stop as
//! soon as it says so. The character cap bounds runaway output even when a
//! small model never emits one of the stop sequences.

use serde::Serialize;

/// Why generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A stop sequence was produced (and trimmed from the output).
    StopSequence,
    /// The token budget ran out.
    TokenBudget,
    /// The character cap was hit.
    LengthCap,
    /// The engine reported end of stream.
    EndOfStream,
}

/// Parameters for one inference call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub prompt: String,
    pub stop_sequences: Vec<String>,
    pub max_tokens: u32,
    pub max_chars: usize,
    pub temperature: f32,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            stop_sequences: Vec::new(),
            max_tokens: 512,
            max_chars: 4000,
            temperature: 0.1,
        }
    }

    pub fn with_stop_sequences<I, S>(mut self, stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_sequences = stops.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Text produced by an engine plus how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub stop_reason: StopReason,
    pub tokens: usize,
}

impl Generation {
    /// A complete generation that ended naturally.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stop_reason: StopReason::EndOfStream,
            tokens: 0,
        }
    }
}

/// Accumulates token pieces and decides when to stop.
#[derive(Debug)]
pub struct GenerationGuard<'a> {
    stop_sequences: &'a [String],
    max_tokens: usize,
    max_chars: usize,
    output: String,
    tokens: usize,
    stopped: Option<StopReason>,
}

impl<'a> GenerationGuard<'a> {
    pub fn new(request: &'a InferenceRequest) -> Self {
        Self {
            stop_sequences: &request.stop_sequences,
            max_tokens: request.max_tokens as usize,
            max_chars: request.max_chars,
            output: String::new(),
            tokens: 0,
            stopped: None,
        }
    }

    /// Feed one decoded token piece. Returns `Some(reason)` once generation must stop.
    pub fn push(&mut self, piece: &str) -> Option<StopReason> {
        if self.stopped.is_some() {
            return self.stopped;
        }
        self.tokens += 1;
        self.output.push_str(piece);

        if let Some(cut) = self.stop_sequence_position() {
            self.output.truncate(cut);
            return self.stop(StopReason::StopSequence);
        }

        if self.output.chars().count() >= self.max_chars {
            let end = self
                .output
                .char_indices()
                .nth(self.max_chars)
                .map(|(i, _)| i)
                .unwrap_or(self.output.len());
            self.output.truncate(end);
            return self.stop(StopReason::LengthCap);
        }

        if self.tokens >= self.max_tokens {
            return self.stop(StopReason::TokenBudget);
        }

        None
    }

    /// Finish generation, marking end of stream if nothing else stopped it.
    pub fn finish(self) -> Generation {
        Generation {
            stop_reason: self.stopped.unwrap_or(StopReason::EndOfStream),
            text: self.output,
            tokens: self.tokens,
        }
    }

    fn stop(&mut self, reason: StopReason) -> Option<StopReason> {
        self.stopped = Some(reason);
        self.stopped
    }

    /// Earliest position of any stop sequence in the output so far.
    ///
    /// A stop sequence may straddle two pieces, so the whole output is searched.
    fn stop_sequence_position(&self) -> Option<usize> {
        self.stop_sequences
            .iter()
            .filter(|s| !s.is_empty())
            .filter_map(|s| self.output.find(s.as_str()))
            .min()
    }
}
