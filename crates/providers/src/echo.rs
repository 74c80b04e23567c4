//! Offline backend that repeats the prompt back, word by word.
//!
//! Useful for trying the console and presets without an API key.

use std::sync::{Arc, Mutex};

use {
    async_trait::async_trait,
    parley_service_traits::{BackendError, ChatBackend, TextStream, is_assistant_role},
};

pub const BACKEND_TYPE: &str = "echo";

const MODELS: &[&str] = &["echo", "shout"];

#[derive(Default)]
struct EchoState {
    model: String,
    /// Prompts answered so far, newest last.
    exchanges: Vec<String>,
}

#[derive(Clone)]
pub struct EchoBackend {
    state: Arc<Mutex<EchoState>>,
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(EchoState {
                model: MODELS[0].to_string(),
                exchanges: Vec::new(),
            })),
        }
    }
}

impl EchoBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn exchanges(&self) -> usize {
        self.lock().exchanges.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EchoState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChatBackend for EchoBackend {
    fn ask(&self, prompt: &str) -> TextStream {
        let reply = match self.current_model().as_str() {
            "shout" => prompt.to_uppercase(),
            _ => prompt.to_string(),
        };
        let chunks: Vec<Result<String, BackendError>> = reply
            .split_inclusive(char::is_whitespace)
            .map(|word| Ok(word.to_string()))
            .collect();
        self.lock().exchanges.push(prompt.to_string());
        Box::pin(futures::stream::iter(chunks))
    }

    async fn rollback(&self) -> bool {
        self.lock().exchanges.pop().is_some()
    }

    async fn on_reset(&self) {
        self.lock().exchanges.clear();
    }

    async fn switch_model(&self, model: &str) {
        self.lock().model = model.to_string();
    }

    fn current_model(&self) -> String {
        self.lock().model.clone()
    }

    fn supported_models(&self) -> Vec<String> {
        MODELS.iter().map(|m| m.to_string()).collect()
    }

    async fn preset_ask(&self, role: &str, text: &str) -> Result<Option<String>, BackendError> {
        Ok(is_assistant_role(role).then(|| text.to_string()))
    }
}
