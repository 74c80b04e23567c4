//! Backend factories by type name, and construction of conversation contexts.

use std::{collections::BTreeMap, sync::Arc};

use {
    parley_config::TextToSpeechConfig,
    parley_service_traits::{ChatBackend, TtsService},
    tracing::{debug, error},
};

use crate::{
    context::{ConversationContext, RenderFactory},
    directory::ContextSlot,
    error::{Error, Result},
};

/// Creates a backend bound to one session.
pub type BackendFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn ChatBackend>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, backend_type: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Result<Arc<dyn ChatBackend>> + Send + Sync + 'static,
    {
        let backend_type = backend_type.into();
        debug!(backend = %backend_type, "backend type registered");
        self.factories.insert(backend_type, Arc::new(factory));
    }

    #[must_use]
    pub fn with<F>(mut self, backend_type: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn ChatBackend>> + Send + Sync + 'static,
    {
        self.register(backend_type, factory);
        self
    }

    pub fn create(&self, backend_type: &str, session_id: &str) -> Result<Arc<dyn ChatBackend>> {
        let factory = self
            .factories
            .get(backend_type)
            .ok_or_else(|| Error::BackendTypeNotFound(backend_type.to_string()))?;
        factory(session_id)
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    #[must_use]
    pub fn contains(&self, backend_type: &str) -> bool {
        self.factories.contains_key(backend_type)
    }

    /// One line per backend type, for ping replies and unknown-type errors.
    #[must_use]
    pub fn bots_info(&self) -> String {
        if self.factories.is_empty() {
            return "No AI is available.".into();
        }
        self.factories
            .keys()
            .map(|name| format!("* {name}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Builds fully initialised contexts for new (session, backend type) pairs.
#[derive(Clone)]
pub struct ContextFactory {
    registry: Arc<BackendRegistry>,
    render: RenderFactory,
    speech: TextToSpeechConfig,
    tts: Arc<dyn TtsService>,
}

impl ContextFactory {
    #[must_use]
    pub fn new(
        registry: Arc<BackendRegistry>,
        render: RenderFactory,
        speech: TextToSpeechConfig,
        tts: Arc<dyn TtsService>,
    ) -> Self {
        Self {
            registry,
            render,
            speech,
            tts,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    #[must_use]
    pub fn render(&self) -> &RenderFactory {
        &self.render
    }

    pub fn create(&self, session_id: &str, backend_type: &str) -> Result<ContextSlot> {
        let backend = self.registry.create(backend_type, session_id)?;
        let render = self.render.build(None)?;
        let voice = if self.speech.always {
            let voice = self.tts.parse_voice(&self.speech.default);
            if voice.is_none() {
                error!(
                    engine = %self.speech.engine,
                    voice = %self.speech.default,
                    "failed to load default tts voice"
                );
            }
            voice
        } else {
            None
        };
        debug!(session_id, backend = backend_type, "conversation context created");
        Ok(ContextSlot::new(
            backend_type,
            ConversationContext::new(backend_type, backend, render, voice),
        ))
    }
}
