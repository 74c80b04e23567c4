/// Config schema types (triggers, responses, quotas, presets, speech, backends).
use std::collections::HashMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub trigger: TriggerConfig,
    pub response: ResponseConfig,
    pub system: SystemConfig,
    pub presets: PresetConfig,
    pub ratelimit: RatelimitConfig,
    pub text_to_image: TextToImageConfig,
    pub text_to_speech: TextToSpeechConfig,
    pub openai: OpenAiConfig,
}

// ── Triggers ────────────────────────────────────────────────────────────────

/// Which messages are treated as commands, and who may run them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Backend type → message prefixes that route straight to that backend.
    pub prefix_ai: HashMap<String, Vec<String>>,
    pub reset_command: Vec<String>,
    pub rollback_command: Vec<String>,
    pub ping_command: Vec<String>,
    /// Messages starting with one of these are drawing requests.
    pub prefix_image: Vec<String>,
    /// Regex with one capture group: the model name.
    pub switch_model: String,
    /// Regex with one capture group: the backend type.
    pub switch_command: String,
    /// Regex with one capture group: the voice name (`None` turns speech off).
    pub switch_voice: String,
    pub mixed_only_command: Vec<String>,
    pub image_only_command: Vec<String>,
    pub text_only_command: Vec<String>,
    /// Messages matching any of these are dropped without a reply.
    pub ignore_regex: Vec<String>,
    /// Models non-administrators may switch to.
    pub allowed_models: Vec<String>,
    pub allow_switching_ai: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            prefix_ai: HashMap::new(),
            reset_command: vec!["reset".into()],
            rollback_command: vec!["rollback".into()],
            ping_command: vec!["ping".into()],
            prefix_image: vec!["draw".into(), "нарисуй".into()],
            switch_model: r"switch_model (.+)".into(),
            switch_command: r"switch_command (.+)".into(),
            switch_voice: r"switch_voice (.+)".into(),
            mixed_only_command: vec!["mixed_".into()],
            image_only_command: vec!["image".into()],
            text_only_command: vec!["text_".into()],
            ignore_regex: Vec::new(),
            allowed_models: vec![
                "gpt-3.5-turbo-16k-0613".into(),
                "gpt-3.5-turbo-1106".into(),
            ],
            allow_switching_ai: true,
        }
    }
}

// ── Responses ───────────────────────────────────────────────────────────────

/// How backend output is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Mixed,
    Image,
    Text,
}

impl RenderMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mixed => "mixed",
            Self::Image => "image",
            Self::Text => "text",
        }
    }
}

impl std::str::FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mixed" => Ok(Self::Mixed),
            "image" => Ok(Self::Image),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown render mode '{other}'")),
        }
    }
}

impl std::fmt::Display for RenderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendering, timing, queueing and the user-facing message templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// `mixed`, `image` or `text`. Kept as a string so `validate` can report typos.
    pub mode: String,
    /// Seconds the buffered merger waits before flushing; `0` selects the length merger.
    pub buffer_delay: f64,
    /// Characters the length merger accumulates before flushing.
    pub length_threshold: usize,
    /// Longest single text segment the splitter emits.
    pub segment_max_len: usize,
    /// Backend type used when a session has no current context.
    pub default_ai: String,

    pub placeholder: String,
    pub reset: String,
    pub rollback_success: String,
    /// `{reset}` is replaced with the reset command.
    pub rollback_fail: String,
    /// `{exc}` is replaced with the error text.
    pub error_format: String,
    pub error_network_failure: String,
    pub error_request_concurrent_error: String,
    pub error_drawing: String,

    /// Seconds without output before `timeout_format` is sent.
    pub timeout: f64,
    pub timeout_format: String,
    /// Seconds after which the turn is cancelled.
    pub max_timeout: f64,
    pub cancel_wait_too_long: String,

    /// Waiters allowed per session; `0` disables rejection.
    pub max_queue_size: usize,
    pub queue_full: String,
    /// Queue depth above which the caller is told how many turns are ahead.
    pub queued_notice_size: usize,
    /// `{queue_size}` is replaced with the number of turns ahead.
    pub queued_notice: String,

    /// `{current_ai}`, `{current_voice}`, `{supported_ai}`.
    pub ping_response: String,
    /// `{supported_tts}`.
    pub ping_tts_response: String,
}

impl ResponseConfig {
    /// Parsed render mode, falling back to mixed for unknown values.
    #[must_use]
    pub fn render_mode(&self) -> RenderMode {
        self.mode.parse().unwrap_or_default()
    }
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            mode: "mixed".into(),
            buffer_delay: 15.0,
            length_threshold: 500,
            segment_max_len: 4000,
            default_ai: "openai-api".into(),
            placeholder: "Hello! I'm Assistant, a large language model. I'm not a real person, but a \
                          program that can help you through text chat. Ask me anything.\n\
                          If you need to reset our session, please reply `reset`."
                .into(),
            reset: "The session has been reset.".into(),
            rollback_success: "I have rolled back to the previous conversation, and I forgot what \
                               you just sent."
                .into(),
            rollback_fail: "The rollback failed, and there was no earlier record! If you want to \
                            start over, please send: {reset}"
                .into(),
            error_format: "There is a failure! If this problem persists, please tell me to \
                           `reset` to start a new session, or send `rollback`, and I will forget \
                           what you said last.\nThe reason: {exc}"
                .into(),
            error_network_failure: "Network failure, please try again later.\n{exc}".into(),
            error_request_concurrent_error: "Too many requests at once, please try again later."
                .into(),
            error_drawing: "Drawing failed: {exc}".into(),
            timeout: 30.0,
            timeout_format: "I'm still thinking. Please wait a little longer~".into(),
            max_timeout: 600.0,
            cancel_wait_too_long: "Ah, this question is a little difficult. I haven't figured it \
                                   out for a long time. Try to ask another question?"
                .into(),
            max_queue_size: 10,
            queue_full: "Sorry! There are a lot of people waiting for a reply now, and I can't \
                         receive new messages at this time. Please send it to me later!"
                .into(),
            queued_notice_size: 3,
            queued_notice: "The message has been received! At present, I still have {queue_size} \
                            messages to reply to. Please wait a moment."
                .into(),
            ping_response: "Current AI: {current_ai} / current voice: {current_voice}\nSupported \
                            AI:\n{supported_ai}"
                .into(),
            ping_tts_response: "\nAvailable voices:\n{supported_tts}".into(),
        }
    }
}

// ── System ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Idle seconds after which a context is silently reset; `-1` disables.
    pub auto_reset_timeout_seconds: i64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            auto_reset_timeout_seconds: 8 * 3600,
        }
    }
}

// ── Presets ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetConfig {
    /// Regex with one capture group: the preset keyword.
    pub command: String,
    /// Keyword → preset file path. Wins over files found in `scan_dir`.
    pub keywords: HashMap<String, String>,
    /// Every `*.txt` in this directory is registered under its file stem.
    pub scan_dir: String,
    pub loaded_successful: String,
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            command: r"Load (\w+)".into(),
            keywords: HashMap::new(),
            scan_dir: "./presets".into(),
            loaded_successful: "The preset is loaded successfully!".into(),
        }
    }
}

// ── Rate limits ─────────────────────────────────────────────────────────────

/// A seeded hourly limit for a quota category and identity (`default` is the fallback).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitEntry {
    pub category: String,
    pub id: String,
    pub rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatelimitConfig {
    /// Usage ratio at which the caller is warned.
    pub warning_rate: f64,
    /// `{usage}`, `{limit}`, `{current_time}`.
    pub warning_msg: String,
    pub exceed: String,
    pub draw_warning_msg: String,
    pub draw_exceed: String,
    /// Chat limits loaded at startup.
    pub limits: Vec<LimitEntry>,
    /// Drawing limits loaded at startup.
    pub draw_limits: Vec<LimitEntry>,
}

impl Default for RatelimitConfig {
    fn default() -> Self {
        Self {
            warning_rate: 0.8,
            warning_msg: "\n\nWarning: The quota is about to run out!\nCurrently sent: {usage} \
                          messages, the maximum limit is {limit} messages/hour, please adjust \
                          your rhythm.\nThe quota limit is reset at the hour, current server \
                          time: {current_time}"
                .into(),
            exceed: "The quota limit has been reached. Please wait for the next hour to continue \
                     talking to me."
                .into(),
            draw_warning_msg: "\n\nWarning: The quota is about to run out!\nAt present, it has \
                               drawn: {usage} pictures, the maximum limit is {limit} \
                               pictures/hour, please adjust your rhythm.\nThe quota limit is \
                               reset at the hour, current server time: {current_time}"
                .into(),
            draw_exceed: "The quota limit has been reached. Please wait for the next hour before \
                          using the drawing function."
                .into(),
            limits: Vec::new(),
            draw_limits: Vec::new(),
        }
    }
}

// ── Text to image / speech ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextToImageConfig {
    /// Force image rendering; other modes are refused.
    pub always: bool,
    /// Start new contexts in image mode.
    pub default: bool,
    /// Path to `wkhtmltoimage`; without it image rendering falls back to text.
    pub wkhtmltoimage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextToSpeechConfig {
    /// Give every new context the default voice.
    pub always: bool,
    /// `azure`, `edge`, or another engine name.
    pub engine: String,
    pub default: String,
    /// Voice-name prefixes listed by the ping command.
    pub default_voice_prefix: Vec<String>,
}

impl Default for TextToSpeechConfig {
    fn default() -> Self {
        Self {
            always: false,
            engine: "azure".into(),
            default: "en-US-JennyNeural".into(),
            default_voice_prefix: vec!["en-US".into()],
        }
    }
}

// ── OpenAI-compatible backend ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_endpoint: String,
    /// Used round-robin, one per request.
    #[serde(serialize_with = "serialize_secret_list")]
    pub api_keys: Vec<Secret<String>>,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    /// Messages kept per session; the oldest non-system entries are dropped first.
    pub max_history: usize,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "https://api.openai.com/v1".into(),
            api_keys: Vec::new(),
            model: "gpt-3.5-turbo".into(),
            temperature: 0.5,
            top_p: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            max_tokens: None,
            stream: true,
            max_history: 40,
            request_timeout: 600,
        }
    }
}

impl OpenAiConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_keys.iter().any(|k| !k.expose_secret().is_empty())
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_secret_list<S: serde::Serializer>(
    secrets: &[Secret<String>],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;

    let mut seq = serializer.serialize_seq(Some(secrets.len()))?;
    for secret in secrets {
        seq.serialize_element(secret.expose_secret())?;
    }
    seq.end()
}
