use {
    parley_common::FromMessage,
    parley_service_traits::{BackendError, PresetError, ServiceError},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("preset '{0}' was not found")]
    PresetNotFound(String),

    #[error("AI type '{0}' is not available")]
    BackendTypeNotFound(String),

    /// Refused with a message meant for the caller as-is.
    #[error("{0}")]
    CommandRefused(String),

    #[error("drawing failed: {0}")]
    DrawingFailed(#[source] ServiceError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Preset(PresetError),

    #[error(transparent)]
    Render(#[from] parley_render::Error),

    #[error("turn cancelled after {seconds}s")]
    TurnTimedOut { seconds: f64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl std::fmt::Display) -> Self {
        Self::Message {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Connect failures and timeouts from the backend.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(e) if e.kind().is_transient())
    }
}

impl From<PresetError> for Error {
    fn from(value: PresetError) -> Self {
        match value {
            PresetError::NotFound(keyword) => Self::PresetNotFound(keyword),
            other => Self::Preset(other),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

parley_common::impl_context!();
