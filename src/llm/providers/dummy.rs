//! Dummy LLM provider for offline runs and tests.
//!
//! By default it echoes the input back prefixed with `[echo]`. It can also be
//! built with a canned reply or set to fail every call. Every call is counted
//! and the last prompt kept, so callers can observe whether the model was
//! consulted and with what.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use crate::llm::{LlmResponse, ProviderError};

#[derive(Debug, Clone)]
enum Mode {
    Echo,
    Canned(String),
    Fail,
}

#[derive(Debug, Clone)]
pub struct DummyProvider {
    mode: Mode,
    calls: Arc<AtomicUsize>,
    last_prompt: Arc<Mutex<Option<String>>>,
}

impl Default for DummyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyProvider {
    pub fn new() -> Self {
        Self::with_mode(Mode::Echo)
    }

    /// Always answer with `reply`.
    pub fn canned(reply: impl Into<String>) -> Self {
        Self::with_mode(Mode::Canned(reply.into()))
    }

    /// Fail every call with a request error.
    pub fn failing() -> Self {
        Self::with_mode(Mode::Fail)
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            calls: Arc::new(AtomicUsize::new(0)),
            last_prompt: Arc::new(Mutex::new(None)),
        }
    }

    /// Number of `complete` calls so far, shared across clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The user content of the most recent call.
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().ok().and_then(|g| g.clone())
    }

    pub async fn complete(
        &self,
        content: &str,
        _system: Option<&str>,
    ) -> Result<LlmResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.last_prompt.lock() {
            *slot = Some(content.to_string());
        }
        let text = match &self.mode {
            Mode::Echo => format!("[echo] {content}"),
            Mode::Canned(reply) => reply.clone(),
            Mode::Fail => return Err(ProviderError::Request("dummy provider set to fail".into())),
        };
        Ok(LlmResponse { text, usage: None })
    }
}
