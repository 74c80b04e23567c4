//! Business logic at the bottom of the middleware chain.

use std::sync::Arc;

use {
    async_trait::async_trait,
    parley_common::{clock::Clock, template, types::RenderedFragment},
    parley_config::{ParleyConfig, RenderMode},
    parley_quota::{QuotaAxis, QuotaTracker},
    parley_render::DriveError,
    parley_service_traits::Services,
    tracing::{debug, info, warn},
};

use crate::{
    commands::{Command, Triggers},
    context::{ConversationContext, DEFAULT_PRESET},
    directory::ContextSlot,
    error::{Error, Result},
    middleware::TurnHandler,
    registry::ContextFactory,
    responder::Responder,
    retry::Backoff,
    turn::{RejectReason, Turn, TurnOutcome},
};

const ADMIN_ONLY_SWITCH: &str = "Sorry, only administrators can switch AI!";
const TTS_NOT_CONFIGURED: &str =
    "The text-to-speech engine is not configured and voice switching cannot be performed!";
const INVALID_VOICE: &str = "The provided voice ID is invalid. Please enter a valid voice ID.";
const VOICE_OFF: &str = "Voice is turned off, let's continue chatting";
const DRAWING_NOT_CONFIGURED: &str =
    "The drawing engine is not configured and the drawing function cannot be used!";

fn renderer_switched(mode: RenderMode) -> &'static str {
    match mode {
        RenderMode::Mixed => "Switched to mixed mode, my next reply will mix images and text!",
        RenderMode::Image => "Switched to picture-only mode, my next reply will be pictures!",
        RenderMode::Text => "Switched to text-only mode, my next reply will be plain text!",
    }
}

/// Executes the command or chat request carried by a turn.
pub struct Dispatcher {
    config: Arc<ParleyConfig>,
    triggers: Arc<Triggers>,
    contexts: ContextFactory,
    services: Services,
    tracker: Arc<QuotaTracker>,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: Arc<ParleyConfig>,
        triggers: Arc<Triggers>,
        contexts: ContextFactory,
        services: Services,
        tracker: Arc<QuotaTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            triggers,
            contexts,
            services,
            tracker,
            clock,
            backoff: Backoff::default(),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    async fn switch_backend(
        &self,
        turn: &Turn,
        responder: &Responder<'_>,
        backend_type: &str,
    ) -> Result<TurnOutcome> {
        if !(self.triggers.config().allow_switching_ai || turn.is_admin) {
            info!(session_id = %turn.session_id, backend = backend_type, "backend switch refused");
            responder.deliver(RenderedFragment::text(ADMIN_ONLY_SWITCH)).await?;
            return Ok(TurnOutcome::Rejected(RejectReason::AdminOnly));
        }
        turn.session
            .switch_to(backend_type, || {
                self.contexts.create(&turn.session_id, backend_type)
            })
            .await?;
        info!(session_id = %turn.session_id, backend = backend_type, "backend switched");
        responder
            .deliver(RenderedFragment::text(format!(
                "Switched to {backend_type} AI, start chatting with me now"
            )))
            .await?;
        Ok(TurnOutcome::Switched)
    }

    async fn reset_if_idle(&self, ctx: &mut ConversationContext) {
        ctx.check_and_reset(
            self.config.system.auto_reset_timeout_seconds,
            self.clock.now().timestamp(),
        )
        .await;
    }

    async fn target(&self, turn: &Turn) -> Result<Arc<ContextSlot>> {
        if let Some(slot) = turn.target().await {
            return Ok(slot);
        }
        let default_ai = &self.config.response.default_ai;
        turn.session
            .current_or_create(default_ai, || self.contexts.create(&turn.session_id, default_ai))
            .await
    }

    async fn ping(&self, ctx: &ConversationContext) -> String {
        let response = &self.config.response;
        let voice = ctx.voice().map_or("None", |v| v.alias.as_str());
        let mut text = template::fill(&response.ping_response, &[
            ("current_ai", ctx.backend_type()),
            ("current_voice", voice),
            ("supported_ai", &self.contexts.registry().bots_info()),
        ]);
        let voices = self
            .services
            .tts
            .list_voices(&self.config.text_to_speech.default_voice_prefix)
            .await;
        if !voices.is_empty() {
            let supported = voices
                .iter()
                .map(|v| v.alias.as_str())
                .collect::<Vec<_>>()
                .join(",");
            text.push_str(&template::fill(&response.ping_tts_response, &[(
                "supported_tts",
                &supported,
            )]));
        }
        text
    }

    async fn switch_voice(
        &self,
        ctx: &mut ConversationContext,
        responder: &Responder<'_>,
        name: &str,
    ) -> Result<TurnOutcome> {
        if name == "None" {
            ctx.set_voice(None);
            responder.set_voice(None);
            responder.deliver(RenderedFragment::text(VOICE_OFF)).await?;
            return Ok(TurnOutcome::Switched);
        }
        let tts = &self.services.tts;
        if !tts.is_configured() {
            responder.deliver(RenderedFragment::text(TTS_NOT_CONFIGURED)).await?;
            return Ok(TurnOutcome::Answered);
        }
        let Some(voice) = tts.parse_voice(name) else {
            responder.deliver(RenderedFragment::text(INVALID_VOICE)).await?;
            return Ok(TurnOutcome::Answered);
        };
        let reply = format!("Switched to {} Voice, let's keep chatting!", voice.full_name);
        ctx.set_voice(Some(voice.clone()));
        responder.set_voice(Some(voice));
        responder.deliver(RenderedFragment::text(reply)).await?;
        Ok(TurnOutcome::Switched)
    }

    async fn switch_model(
        &self,
        turn: &Turn,
        ctx: &ConversationContext,
        responder: &Responder<'_>,
        model: &str,
    ) -> Result<TurnOutcome> {
        let allowed = &self.triggers.config().allowed_models;
        if !turn.is_admin && !allowed.iter().any(|m| m == model) {
            info!(session_id = %turn.session_id, model, "model switch refused");
            responder
                .deliver(RenderedFragment::text(format!(
                    "Sorry, only administrators can switch to {model}"
                )))
                .await?;
            return Ok(TurnOutcome::Rejected(RejectReason::AdminOnly));
        }

        let supported = ctx.backend().supported_models();
        ctx.switch_model(model).await;
        let reply = if supported.iter().any(|m| m == model) {
            format!("Switched to {model} Model, let's chat")
        } else {
            warn!(
                backend = %ctx.backend_type(),
                model,
                "model is not in the supported list, trying it anyway"
            );
            format!(
                "Model {model} is not in the support list. We will try to use this model to \
                 create a conversation next time. Currently, AI only supports {}",
                supported.join(", ")
            )
        };
        responder.deliver(RenderedFragment::text(reply)).await?;
        Ok(TurnOutcome::Switched)
    }

    async fn load_preset(
        &self,
        ctx: &mut ConversationContext,
        responder: &Responder<'_>,
        keyword: &str,
    ) -> Result<TurnOutcome> {
        ctx.reset().await;
        let shown = ctx
            .load_preset(keyword, self.services.presets.as_ref(), self.services.tts.as_ref())
            .await?;
        responder.set_voice(ctx.voice().cloned());
        if shown.is_empty() {
            responder
                .deliver(RenderedFragment::text(
                    self.config.presets.loaded_successful.as_str(),
                ))
                .await?;
        }
        for text in shown {
            responder.deliver(RenderedFragment::text(text)).await?;
        }
        Ok(TurnOutcome::Answered)
    }

    async fn draw(
        &self,
        turn: &Turn,
        responder: &Responder<'_>,
        prompt: &str,
    ) -> Result<TurnOutcome> {
        let ratelimit = &self.config.ratelimit;
        if self.tracker.ratio(QuotaAxis::Draw, &turn.key) >= 1.0 {
            info!(session_id = %turn.session_id, "drawing quota exceeded");
            responder
                .deliver(RenderedFragment::text(ratelimit.draw_exceed.as_str()))
                .await?;
            return Ok(TurnOutcome::Rejected(RejectReason::DrawQuotaExceeded));
        }
        let Some(drawing) = &self.services.drawing else {
            responder
                .deliver(RenderedFragment::text(DRAWING_NOT_CONFIGURED))
                .await?;
            return Ok(TurnOutcome::Answered);
        };

        let init = turn.attachment.as_ref().and_then(|a| a.image());
        debug!(session_id = %turn.session_id, img2img = init.is_some(), "drawing");
        let images = match init {
            Some(init) => drawing.img_to_img(init, prompt).await,
            None => drawing.text_to_img(prompt).await,
        }
        .map_err(Error::DrawingFailed)?;
        for image in images {
            responder.deliver(RenderedFragment::Image(image)).await?;
        }

        self.tracker.record(QuotaAxis::Draw, &turn.key);
        if self.tracker.ratio(QuotaAxis::Draw, &turn.key) >= ratelimit.warning_rate
            && let Some(warning) =
                self.tracker
                    .warning_text(QuotaAxis::Draw, &turn.key, &ratelimit.draw_warning_msg)
        {
            responder
                .deliver(RenderedFragment::text(warning.trim()))
                .await?;
        }
        Ok(TurnOutcome::Answered)
    }

    async fn chat(
        &self,
        turn: &Turn,
        ctx: &mut ConversationContext,
        responder: &Responder<'_>,
    ) -> Result<TurnOutcome> {
        turn.mark_forwarded();
        let prompt = ctx.decorate(&turn.prompt, &turn.nickname, self.clock.now());
        let backend = Arc::clone(ctx.backend());
        let stream = self.backoff.stream(move || backend.ask(&prompt));
        let render = ctx.render().clone();

        let result = render.begin(responder).drive(stream).await;
        let now = self.clock.now().timestamp();
        match result {
            Ok(full) => {
                ctx.record_response(&full, now);
                debug!(turn_id = %turn.id, chars = full.len(), "turn answered");
                Ok(TurnOutcome::Forwarded)
            },
            Err(DriveError::Upstream { partial, error }) => {
                if !partial.is_empty() {
                    ctx.record_response(&partial, now);
                }
                Err(error.into())
            },
            Err(DriveError::Render(e)) => Err(e.into()),
        }
    }
}

#[async_trait]
impl TurnHandler for Dispatcher {
    async fn handle(&self, turn: &Turn, responder: &Responder<'_>) -> Result<TurnOutcome> {
        let command = self.triggers.parse(&turn.prompt);
        if let Command::SwitchBackend(backend_type) = &command {
            if let Some(slot) = turn.session.current().await {
                self.reset_if_idle(&mut *slot.context().lock().await).await;
            }
            return self.switch_backend(turn, responder, backend_type).await;
        }

        let slot = self.target(turn).await?;
        let mut ctx = slot.context().lock().await;
        responder.set_voice(ctx.voice().cloned());
        self.reset_if_idle(&mut ctx).await;
        debug!(turn_id = %turn.id, backend = %ctx.backend_type(), ?command, "dispatching");

        match command {
            Command::Reset => {
                ctx.reset().await;
                responder
                    .deliver(RenderedFragment::text(self.config.response.reset.as_str()))
                    .await?;
                return Ok(TurnOutcome::Answered);
            },
            Command::Rollback => {
                let response = &self.config.response;
                let reply = if ctx.rollback().await {
                    response.rollback_success.clone()
                } else {
                    template::fill(&response.rollback_fail, &[(
                        "reset",
                        self.triggers.reset_hint(),
                    )])
                };
                responder.deliver(RenderedFragment::text(reply)).await?;
                return Ok(TurnOutcome::Answered);
            },
            Command::Ping => {
                let reply = self.ping(&ctx).await;
                responder.deliver(RenderedFragment::text(reply)).await?;
                return Ok(TurnOutcome::Answered);
            },
            Command::SwitchVoice(name) => {
                return self.switch_voice(&mut ctx, responder, &name).await;
            },
            Command::SwitchRenderer(mode) => {
                ctx.switch_renderer(self.contexts.render(), mode)?;
                responder
                    .deliver(RenderedFragment::text(renderer_switched(mode)))
                    .await?;
                return Ok(TurnOutcome::Switched);
            },
            Command::SwitchModel(model) => {
                return self.switch_model(turn, &ctx, responder, &model).await;
            },
            Command::LoadPreset(keyword) => {
                return self.load_preset(&mut ctx, responder, &keyword).await;
            },
            Command::SwitchBackend(_) | Command::Draw { .. } | Command::Chat => {},
        }

        if ctx.preset().is_none() {
            debug!(turn_id = %turn.id, "loading default preset");
            ctx.load_preset(
                DEFAULT_PRESET,
                self.services.presets.as_ref(),
                self.services.tts.as_ref(),
            )
            .await?;
            responder.set_voice(ctx.voice().cloned());
        }

        match command {
            Command::Draw { prompt } => self.draw(turn, responder, &prompt).await,
            _ => self.chat(turn, &mut ctx, responder).await,
        }
    }
}
