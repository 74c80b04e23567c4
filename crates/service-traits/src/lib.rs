//! Interfaces for the collaborators a conversation turn consumes.
//!
//! Each trait has a `Noop` implementation (or an `Option` slot in
//! [`Services`]) so the orchestrator runs standalone before real backends are
//! wired in.

use std::{pin::Pin, sync::Arc};

use {
    async_trait::async_trait,
    futures::Stream,
    parley_common::{
        queue::QueueInfo,
        types::{AudioClip, AudioFormat, ImageData},
    },
    tracing::debug,
};

/// Error type returned by drawing and speech services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{message}")]
    Message { message: String },
    #[error("{0}")]
    Backend(#[from] BackendError),
}

impl ServiceError {
    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }
}

impl From<String> for ServiceError {
    fn from(value: String) -> Self {
        Self::message(value)
    }
}

impl From<&str> for ServiceError {
    fn from(value: &str) -> Self {
        Self::message(value)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

// ── Chat backend ────────────────────────────────────────────────────────────

/// Coarse classification of an upstream failure, used to decide retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    Connect,
    ConnectTimeout,
    Timeout,
    Status,
    Protocol,
    Other,
}

impl BackendErrorKind {
    /// Connect failures and timeouts; everything else is a hard failure.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Connect | Self::ConnectTimeout | Self::Timeout)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection timed out: {0}")]
    ConnectTimeout(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed upstream response: {0}")]
    Protocol(String),
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    #[must_use]
    pub fn kind(&self) -> BackendErrorKind {
        match self {
            Self::Connect(_) => BackendErrorKind::Connect,
            Self::ConnectTimeout(_) => BackendErrorKind::ConnectTimeout,
            Self::Timeout(_) => BackendErrorKind::Timeout,
            Self::Status { .. } => BackendErrorKind::Status,
            Self::Protocol(_) => BackendErrorKind::Protocol,
            Self::Other(_) => BackendErrorKind::Other,
        }
    }

    #[must_use]
    pub fn other(message: impl std::fmt::Display) -> Self {
        Self::Other(message.to_string())
    }
}

/// Incremental text produced by a backend for one prompt.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Roles whose preset text is shown to the user rather than only seeded.
#[must_use]
pub fn is_assistant_role(role: &str) -> bool {
    role == "assistant" || role == "chatgpt" || role.ends_with("bot")
}

/// A backend that buffers requests itself and exposes its queue.
pub trait QueueAware: Send + Sync {
    fn queue_info(&self) -> Arc<QueueInfo>;
}

/// A conversational backend bound to one session.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send `prompt` and stream the reply as text increments.
    ///
    /// The returned stream owns everything it needs; calling `ask` again
    /// starts an independent request.
    fn ask(&self, prompt: &str) -> TextStream;

    /// Undo the last exchange. Returns `false` when there is nothing to undo.
    async fn rollback(&self) -> bool;

    /// Drop all conversation state.
    async fn on_reset(&self);

    async fn switch_model(&self, model: &str);

    fn current_model(&self) -> String;

    fn supported_models(&self) -> Vec<String>;

    /// Seed one scripted preset line. Returns the text to show the user, if any.
    async fn preset_ask(&self, role: &str, text: &str) -> Result<Option<String>, BackendError> {
        if is_assistant_role(role) {
            Ok(Some(text.to_string()))
        } else {
            debug!(role, "preset line ignored by backend without history");
            Ok(None)
        }
    }

    /// Present when the backend queues requests internally.
    fn as_queue_aware(&self) -> Option<&dyn QueueAware> {
        None
    }
}

// ── Drawing ─────────────────────────────────────────────────────────────────

#[async_trait]
pub trait DrawingBackend: Send + Sync {
    async fn text_to_img(&self, prompt: &str) -> ServiceResult<Vec<ImageData>>;
    async fn img_to_img(&self, init: &ImageData, prompt: &str) -> ServiceResult<Vec<ImageData>>;
}

// ── Presets ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("preset '{0}' not found")]
    NotFound(String),
    #[error("failed to read preset '{keyword}': {source}")]
    Io {
        keyword: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait PresetStore: Send + Sync {
    /// Ordered `role: text` entries for `keyword`.
    async fn load_preset(&self, keyword: &str) -> Result<Vec<String>, PresetError>;

    /// Known keywords, sorted.
    fn keywords(&self) -> Vec<String>;
}

pub struct NoopPresetStore;

#[async_trait]
impl PresetStore for NoopPresetStore {
    async fn load_preset(&self, keyword: &str) -> Result<Vec<String>, PresetError> {
        Err(PresetError::NotFound(keyword.to_string()))
    }

    fn keywords(&self) -> Vec<String> {
        Vec::new()
    }
}

// ── TTS ─────────────────────────────────────────────────────────────────────

/// A speech voice, e.g. `en-US-JennyNeural` (alias `jenny`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtsVoice {
    pub engine: String,
    pub full_name: String,
    pub lang: String,
    pub region: Option<String>,
    pub sub_region: Option<String>,
    pub name: String,
    pub alias: String,
    pub gender: Option<String>,
}

impl TtsVoice {
    /// Parse a voice name for `engine`.
    ///
    /// Azure and Edge names follow `lang-REGION[-sub]-Name`; anything shorter
    /// is rejected. Other engines use the raw name as language and alias.
    #[must_use]
    pub fn parse(engine: &str, voice: &str) -> Option<Self> {
        if !matches!(engine, "azure" | "edge") {
            return Some(Self {
                engine: engine.to_string(),
                full_name: voice.to_string(),
                lang: voice.to_string(),
                region: None,
                sub_region: None,
                name: voice.to_string(),
                alias: voice.to_string(),
                gender: None,
            });
        }

        let parts: Vec<&str> = voice.split('-').collect();
        let (lang, region, sub_region, name) = match parts.as_slice() {
            [lang, region, sub, name] => (*lang, *region, Some(*sub), *name),
            [lang, region, name, ..] => (*lang, *region, None, *name),
            _ => return None,
        };
        Some(Self {
            engine: engine.to_string(),
            full_name: voice.to_string(),
            lang: lang.to_string(),
            region: Some(region.to_string()),
            sub_region: sub_region.map(str::to_string),
            name: name.to_string(),
            alias: name.replace("Neural", "").to_lowercase(),
            gender: None,
        })
    }

    #[must_use]
    pub fn description(&self) -> String {
        match &self.gender {
            Some(gender) => format!("{}: {} - {gender}", self.alias, self.full_name),
            None => format!("{}: {}", self.alias, self.full_name),
        }
    }
}

#[async_trait]
pub trait TtsService: Send + Sync {
    /// Engine name (`azure`, `edge`, ...), used for voice parsing.
    fn engine(&self) -> &str;

    /// Whether credentials are present and synthesis can be attempted.
    fn is_configured(&self) -> bool;

    async fn synthesize(
        &self,
        text: &str,
        voice: &TtsVoice,
        format: AudioFormat,
    ) -> ServiceResult<AudioClip>;

    /// Voices whose full name starts with one of `prefixes`.
    async fn list_voices(&self, prefixes: &[String]) -> Vec<TtsVoice>;

    fn parse_voice(&self, name: &str) -> Option<TtsVoice> {
        TtsVoice::parse(self.engine(), name)
    }
}

pub struct NoopTtsService {
    engine: String,
}

impl NoopTtsService {
    #[must_use]
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
        }
    }
}

impl Default for NoopTtsService {
    fn default() -> Self {
        Self::new("azure")
    }
}

#[async_trait]
impl TtsService for NoopTtsService {
    fn engine(&self) -> &str {
        &self.engine
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn synthesize(
        &self,
        _text: &str,
        _voice: &TtsVoice,
        _format: AudioFormat,
    ) -> ServiceResult<AudioClip> {
        Err("tts not available".into())
    }

    async fn list_voices(&self, _prefixes: &[String]) -> Vec<TtsVoice> {
        Vec::new()
    }
}

// ── Bundle ──────────────────────────────────────────────────────────────────

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct Services {
    pub drawing: Option<Arc<dyn DrawingBackend>>,
    pub presets: Arc<dyn PresetStore>,
    pub tts: Arc<dyn TtsService>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            drawing: None,
            presets: Arc::new(NoopPresetStore),
            tts: Arc::new(NoopTtsService::default()),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("en-US-JennyNeural", "jenny", None)]
    #[case("en-US-JennyMultilingualNeural", "jennymultilingual", None)]
    #[case("es-MX-la-DaliaNeural", "dalia", Some("la"))]
    fn parses_azure_voices(
        #[case] name: &str,
        #[case] alias: &str,
        #[case] sub_region: Option<&str>,
    ) {
        let voice = TtsVoice::parse("azure", name).unwrap();
        assert_eq!(voice.alias, alias);
        assert_eq!(voice.sub_region.as_deref(), sub_region);
        assert_eq!(voice.full_name, name);
    }

    #[test]
    fn short_azure_voice_is_rejected() {
        assert!(TtsVoice::parse("edge", "en-US").is_none());
    }

    #[test]
    fn other_engines_use_raw_name() {
        let voice = TtsVoice::parse("vits", "paimon").unwrap();
        assert_eq!(voice.alias, "paimon");
        assert_eq!(voice.lang, "paimon");
    }

    #[rstest]
    #[case("assistant", true)]
    #[case("chatgpt", true)]
    #[case("catbot", true)]
    #[case("user", false)]
    #[case("system", false)]
    fn assistant_roles(#[case] role: &str, #[case] expected: bool) {
        assert_eq!(is_assistant_role(role), expected);
    }

    #[test]
    fn transient_kinds() {
        assert!(BackendError::Connect("refused".into()).kind().is_transient());
        assert!(BackendError::Timeout("read".into()).kind().is_transient());
        assert!(
            !BackendError::Status {
                status: 500,
                body: String::new()
            }
            .kind()
            .is_transient()
        );
    }

    #[tokio::test]
    async fn noop_preset_store_reports_not_found() {
        let err = NoopPresetStore.load_preset("default").await.unwrap_err();
        assert!(matches!(err, PresetError::NotFound(k) if k == "default"));
    }
}
