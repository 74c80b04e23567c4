//! Concrete chat backends and their registration.

pub mod echo;
pub mod error;
pub mod openai;
pub mod sse;

use std::sync::Arc;

use {
    parley_chat::BackendRegistry,
    parley_config::OpenAiConfig,
    parley_service_traits::ChatBackend,
    tracing::{info, warn},
};

pub use {
    echo::EchoBackend,
    error::{Error, Result},
    openai::{ChatMessage, OpenAiBackend, OpenAiClient},
};

/// Registry with every backend this crate can build from `openai`.
///
/// The echo backend is always present; the OpenAI-compatible backend only
/// when at least one API key is configured.
#[must_use]
pub fn builtin_registry(openai: &OpenAiConfig) -> BackendRegistry {
    let mut registry = BackendRegistry::new().with(echo::BACKEND_TYPE, |_| {
        Ok(Arc::new(EchoBackend::new()) as Arc<dyn ChatBackend>)
    });

    match OpenAiClient::new(openai.clone()) {
        Ok(client) => {
            let client = Arc::new(client);
            registry.register(openai::BACKEND_TYPE, move |session_id| {
                Ok(Arc::new(client.backend(session_id)) as Arc<dyn ChatBackend>)
            });
        },
        Err(Error::MissingApiKey { backend }) => {
            info!(backend = %backend, "backend skipped: no API key configured");
        },
        Err(e) => {
            warn!(backend = openai::BACKEND_TYPE, error = %e, "backend unavailable");
        },
    }

    registry
}
