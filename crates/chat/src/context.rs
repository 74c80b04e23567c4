//! Per-(session, backend type) conversation state.

use std::sync::Arc;

use {
    chrono::{DateTime, Local},
    parley_config::{RenderMode, ResponseConfig, TextToImageConfig},
    parley_render::{Rasterizer, RenderStack},
    parley_service_traits::{
        ChatBackend, PresetError, PresetStore, TtsService, TtsVoice, is_assistant_role,
    },
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    presets::PresetEntry,
};

/// The preset every context falls back to when none was loaded.
pub const DEFAULT_PRESET: &str = "default";

const FORCED_IMAGE_REFUSAL: &str =
    "Image rendering is forced on by the configuration, so the mode cannot be changed.";

/// Builds render stacks from the response settings.
#[derive(Clone)]
pub struct RenderFactory {
    response: ResponseConfig,
    text_to_image: TextToImageConfig,
    rasterizer: Option<Arc<dyn Rasterizer>>,
}

impl RenderFactory {
    #[must_use]
    pub fn new(
        response: ResponseConfig,
        text_to_image: TextToImageConfig,
        rasterizer: Option<Arc<dyn Rasterizer>>,
    ) -> Self {
        Self {
            response,
            text_to_image,
            rasterizer,
        }
    }

    /// Mode used when none is requested.
    #[must_use]
    pub fn default_mode(&self) -> RenderMode {
        if self.text_to_image.default || self.text_to_image.always {
            RenderMode::Image
        } else {
            self.response.render_mode()
        }
    }

    /// Stack for `requested`, or the default mode.
    ///
    /// Refuses anything but image mode while image rendering is forced.
    pub fn build(&self, requested: Option<RenderMode>) -> Result<RenderStack> {
        let mode = requested.unwrap_or_else(|| self.default_mode());
        if self.text_to_image.always && mode != RenderMode::Image {
            return Err(Error::CommandRefused(FORCED_IMAGE_REFUSAL.into()));
        }
        Ok(RenderStack::new(mode, &self.response, self.rasterizer.clone()))
    }
}

pub struct ConversationContext {
    backend_type: String,
    backend: Arc<dyn ChatBackend>,
    preset: Option<String>,
    /// Prompt wrapper with `{prompt}`, `{nickname}`, `{last_resp}`, `{date}`.
    decoration: Option<String>,
    voice: Option<TtsVoice>,
    last_resp: String,
    /// Unix seconds of the last reply; `None` until the first one.
    last_resp_time: Option<i64>,
    render: RenderStack,
}

impl ConversationContext {
    #[must_use]
    pub fn new(
        backend_type: impl Into<String>,
        backend: Arc<dyn ChatBackend>,
        render: RenderStack,
        voice: Option<TtsVoice>,
    ) -> Self {
        Self {
            backend_type: backend_type.into(),
            backend,
            preset: None,
            decoration: Some("{prompt}".into()),
            voice,
            last_resp: String::new(),
            last_resp_time: None,
            render,
        }
    }

    #[must_use]
    pub fn backend_type(&self) -> &str {
        &self.backend_type
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    #[must_use]
    pub fn preset(&self) -> Option<&str> {
        self.preset.as_deref()
    }

    #[must_use]
    pub fn voice(&self) -> Option<&TtsVoice> {
        self.voice.as_ref()
    }

    pub fn set_voice(&mut self, voice: Option<TtsVoice>) {
        self.voice = voice;
    }

    #[must_use]
    pub fn last_resp(&self) -> &str {
        &self.last_resp
    }

    #[must_use]
    pub fn last_resp_time(&self) -> Option<i64> {
        self.last_resp_time
    }

    #[must_use]
    pub fn render(&self) -> &RenderStack {
        &self.render
    }

    /// Replace the render stack. Only later turns are affected.
    pub fn switch_renderer(&mut self, factory: &RenderFactory, mode: RenderMode) -> Result<()> {
        self.render = factory.build(Some(mode))?;
        debug!(backend = %self.backend_type, mode = %mode, "renderer switched");
        Ok(())
    }

    pub async fn reset(&mut self) {
        self.backend.on_reset().await;
        self.last_resp.clear();
        self.last_resp_time = None;
    }

    pub async fn rollback(&self) -> bool {
        self.backend.rollback().await
    }

    pub async fn switch_model(&self, model: &str) {
        self.backend.switch_model(model).await;
    }

    /// Reset when the last reply is older than `timeout_secs`; `-1` disables.
    ///
    /// Returns whether a reset happened.
    pub async fn check_and_reset(&mut self, timeout_secs: i64, now: i64) -> bool {
        let Some(last) = self.last_resp_time else {
            return false;
        };
        if timeout_secs == -1 || now - last < timeout_secs {
            return false;
        }
        debug!(backend = %self.backend_type, idle_secs = now - last, "idle context reset");
        self.reset().await;
        true
    }

    /// Load `keyword` and replay its script into the backend.
    ///
    /// Returns the assistant lines to show the caller. A missing `default`
    /// preset is not an error.
    pub async fn load_preset(
        &mut self,
        keyword: &str,
        store: &dyn PresetStore,
        tts: &dyn TtsService,
    ) -> Result<Vec<String>> {
        self.decoration = None;
        let entries = match store.load_preset(keyword).await {
            Ok(entries) => entries,
            Err(PresetError::NotFound(_)) if keyword == DEFAULT_PRESET => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut shown = Vec::new();
        for entry in entries.iter().filter_map(|raw| PresetEntry::parse(raw)) {
            match entry.role.as_str() {
                "user_send" => self.decoration = Some(entry.text),
                "voice" => {
                    self.voice = tts.parse_voice(&entry.text);
                    if self.voice.is_none() {
                        warn!(keyword, voice = %entry.text, "preset voice could not be parsed");
                    }
                },
                role => {
                    if let Some(text) = self.backend.preset_ask(role, &entry.text).await? {
                        shown.push(text);
                    } else if is_assistant_role(role) {
                        debug!(keyword, role, "assistant line produced no output");
                    }
                },
            }
        }
        self.preset = Some(keyword.to_string());
        debug!(backend = %self.backend_type, keyword, shown = shown.len(), "preset loaded");
        Ok(shown)
    }

    /// Apply the preset's prompt decoration.
    #[must_use]
    pub fn decorate(&self, prompt: &str, nickname: &str, now: DateTime<Local>) -> String {
        match &self.decoration {
            Some(template) => template
                .replace("{prompt}", prompt)
                .replace("{nickname}", nickname)
                .replace("{last_resp}", &self.last_resp)
                .replace("{date}", &now.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => prompt.to_string(),
        }
    }

    pub fn record_response(&mut self, text: &str, now: i64) {
        self.last_resp = text.to_string();
        self.last_resp_time = Some(now);
    }
}
