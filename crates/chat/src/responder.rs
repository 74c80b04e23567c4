//! The respond path: middleware post-processing, delivery and speech.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use {
    async_trait::async_trait,
    parley_common::types::RenderedFragment,
    parley_render::FragmentSink,
    parley_service_traits::{TtsService, TtsVoice},
    tracing::{debug, warn},
};

use crate::{
    error::Result,
    middleware::Middleware,
    turn::Turn,
};

/// Where a platform adapter receives a turn's output.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Called once per deliverable fragment, in order.
    async fn deliver(&self, fragment: RenderedFragment) -> Result<()>;

    /// Called once after the turn, whatever its outcome.
    async fn complete(&self) {}
}

/// Delivers a turn's fragments to the caller.
///
/// Business output goes through [`Responder::deliver`], which lets each
/// middleware transform it. Notices from the chain itself use
/// [`Responder::notify`] and are sent unchanged.
pub struct Responder<'a> {
    turn: &'a Turn,
    sink: &'a dyn ReplySink,
    layers: &'a [Arc<dyn Middleware>],
    tts: Arc<dyn TtsService>,
    voice: Mutex<Option<TtsVoice>>,
    delivered: AtomicUsize,
}

impl<'a> Responder<'a> {
    #[must_use]
    pub fn new(
        turn: &'a Turn,
        sink: &'a dyn ReplySink,
        layers: &'a [Arc<dyn Middleware>],
        tts: Arc<dyn TtsService>,
    ) -> Self {
        Self {
            turn,
            sink,
            layers,
            tts,
            voice: Mutex::new(None),
            delivered: AtomicUsize::new(0),
        }
    }

    /// Voice used to speak every delivered text fragment; `None` disables speech.
    pub fn set_voice(&self, voice: Option<TtsVoice>) {
        *self.voice.lock().unwrap_or_else(|e| e.into_inner()) = voice;
    }

    /// Fragments handed to the sink so far, speech included.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Deliver business output through every middleware's respond hook.
    pub async fn deliver(&self, fragment: RenderedFragment) -> Result<()> {
        if fragment.is_blank() {
            debug!(turn_id = %self.turn.id, "blank output ignored");
            return Ok(());
        }
        let fragment = self
            .layers
            .iter()
            .fold(fragment, |fragment, layer| layer.handle_respond(self.turn, fragment));
        self.send(fragment).await
    }

    /// Deliver a notice as-is.
    pub async fn notify(&self, text: impl Into<String>) -> Result<()> {
        let fragment = RenderedFragment::text(text);
        if fragment.is_blank() {
            return Ok(());
        }
        self.send(fragment).await
    }

    async fn send(&self, fragment: RenderedFragment) -> Result<()> {
        let spoken = fragment.as_text().map(str::to_string);
        self.sink.deliver(fragment.clone()).await?;
        self.delivered.fetch_add(1, Ordering::SeqCst);
        for layer in self.layers {
            layer.on_respond(self.turn, &fragment).await;
        }
        if let Some(text) = spoken {
            self.speak(&text).await?;
        }
        Ok(())
    }

    async fn speak(&self, text: &str) -> Result<()> {
        let voice = self.voice.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let Some(voice) = voice else {
            return Ok(());
        };
        if !self.tts.is_configured() {
            return Ok(());
        }
        match self
            .tts
            .synthesize(text, &voice, self.turn.platform.voice_format())
            .await
        {
            Ok(clip) => {
                self.sink.deliver(RenderedFragment::Voice(clip)).await?;
                self.delivered.fetch_add(1, Ordering::SeqCst);
            },
            Err(e) => {
                warn!(
                    turn_id = %self.turn.id,
                    voice = %voice.full_name,
                    error = %e,
                    "speech synthesis failed"
                );
            },
        }
        Ok(())
    }
}

#[async_trait]
impl FragmentSink for Responder<'_> {
    async fn deliver(&self, fragment: RenderedFragment) -> parley_render::Result<()> {
        Responder::deliver(self, fragment)
            .await
            .map_err(parley_render::Error::sink)
    }
}
