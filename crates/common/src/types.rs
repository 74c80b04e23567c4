//! Rendered fragments and inbound message types shared by every stage.

use {
    bytes::Bytes,
    serde::{Deserialize, Serialize},
};

/// Platform a turn originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Discord,
    Http,
    #[default]
    Console,
}

impl Platform {
    /// Audio container preferred when delivering synthesized speech.
    #[must_use]
    pub fn voice_format(self) -> AudioFormat {
        match self {
            Self::Http => AudioFormat::Mp3,
            _ => AudioFormat::Wav,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::Http => "http",
            Self::Console => "console",
        };
        f.write_str(name)
    }
}

/// Audio output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Mp3,
}

impl AudioFormat {
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
        }
    }
}

/// Where the bytes of an image live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Image data already in memory (decoded data URI, rasterized text, drawing output).
    Bytes(Bytes),
    /// Remote image the platform adapter should fetch or link.
    Url(String),
}

/// An image fragment with an optional sniffed MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub source: ImageSource,
    pub mime_type: Option<String>,
}

impl ImageData {
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>, mime_type: Option<String>) -> Self {
        Self {
            source: ImageSource::Bytes(data.into()),
            mime_type,
        }
    }

    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            source: ImageSource::Url(url.into()),
            mime_type: None,
        }
    }
}

/// Synthesized speech.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub data: Bytes,
    pub format: AudioFormat,
}

/// One deliverable unit produced for the caller. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedFragment {
    Text(String),
    Image(ImageData),
    Voice(AudioClip),
}

impl RenderedFragment {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Text payload, if this is a text fragment.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Whitespace-only text carries nothing worth delivering.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Text(text) if text.trim().is_empty())
    }
}

/// Media attached to an inbound message (currently images only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Image(ImageData),
}

impl Attachment {
    #[must_use]
    pub fn image(&self) -> Option<&ImageData> {
        match self {
            Self::Image(image) => Some(image),
        }
    }
}
