//! Process-wide entry point: owns every session and runs turns through the chain.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use {
    async_trait::async_trait,
    parley_common::{
        clock::{Clock, SystemClock},
        template,
        types::RenderedFragment,
    },
    parley_config::ParleyConfig,
    parley_quota::QuotaTracker,
    parley_render::{Rasterizer, WkhtmlRasterizer},
    parley_service_traits::{Services, TtsService},
    tracing::{debug, error, info, warn},
};

use crate::{
    commands::Triggers,
    context::RenderFactory,
    directory::{ContextSlot, SessionDirectory, SessionHandle},
    dispatch::Dispatcher,
    error::{Error, Result},
    gate::ConcurrencyGate,
    middleware::{ConcurrencyLimiter, MiddlewareChain, RateLimiter, TimeoutGuard},
    registry::{BackendRegistry, ContextFactory},
    responder::{ReplySink, Responder},
    retry::Backoff,
    turn::{InboundMessage, RejectReason, Turn, TurnOutcome},
};

// ── Builder ─────────────────────────────────────────────────────────────────

pub struct OrchestratorBuilder {
    config: ParleyConfig,
    registry: BackendRegistry,
    services: Services,
    clock: Option<Arc<dyn Clock>>,
    tracker: Option<Arc<QuotaTracker>>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    backoff: Backoff,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use an existing tracker instead of one seeded from config.
    #[must_use]
    pub fn tracker(mut self, tracker: Arc<QuotaTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Rasterizer for image rendering; defaults to `wkhtmltoimage` when configured.
    #[must_use]
    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Compile triggers and assemble the middleware chain.
    pub fn build(self) -> Result<Orchestrator> {
        let config = Arc::new(self.config);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let tracker = self.tracker.unwrap_or_else(|| {
            Arc::new(QuotaTracker::from_config(&config.ratelimit, Arc::clone(&clock)))
        });
        let rasterizer = self.rasterizer.or_else(|| {
            config
                .text_to_image
                .wkhtmltoimage
                .as_deref()
                .map(|binary| Arc::new(WkhtmlRasterizer::new(binary)) as Arc<dyn Rasterizer>)
        });

        let triggers = Arc::new(Triggers::compile(&config.trigger, &config.presets)?);
        let render = RenderFactory::new(
            config.response.clone(),
            config.text_to_image.clone(),
            rasterizer,
        );
        let contexts = ContextFactory::new(
            Arc::new(self.registry),
            render,
            config.text_to_speech.clone(),
            Arc::clone(&self.services.tts),
        );

        let response = &config.response;
        let gate = Arc::new(ConcurrencyGate::new(
            response.max_queue_size,
            response.queued_notice_size,
        ));
        let chain = MiddlewareChain::standard(
            TimeoutGuard::from_secs(
                response.timeout,
                response.max_timeout,
                response.timeout_format.as_str(),
                response.cancel_wait_too_long.as_str(),
            ),
            RateLimiter::new(Arc::clone(&tracker), config.ratelimit.clone()),
            ConcurrencyLimiter::new(
                Arc::clone(&gate),
                response.queue_full.as_str(),
                response.queued_notice.as_str(),
            ),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&config),
            Arc::clone(&triggers),
            contexts.clone(),
            self.services.clone(),
            Arc::clone(&tracker),
            clock,
        )
        .with_backoff(self.backoff);

        info!(
            backends = ?contexts.registry().types(),
            default_ai = %config.response.default_ai,
            drawing = self.services.drawing.is_some(),
            tts = self.services.tts.is_configured(),
            "orchestrator ready"
        );
        Ok(Orchestrator {
            tts: self.services.tts,
            config,
            triggers,
            contexts,
            directory: SessionDirectory::new(),
            gate,
            tracker,
            chain,
            dispatcher,
        })
    }
}

// ── Orchestrator ────────────────────────────────────────────────────────────

/// Owns sessions, quotas and queues for the lifetime of the process.
pub struct Orchestrator {
    config: Arc<ParleyConfig>,
    triggers: Arc<Triggers>,
    contexts: ContextFactory,
    directory: SessionDirectory,
    gate: Arc<ConcurrencyGate>,
    tracker: Arc<QuotaTracker>,
    tts: Arc<dyn TtsService>,
    chain: MiddlewareChain,
    dispatcher: Dispatcher,
}

impl Orchestrator {
    #[must_use]
    pub fn builder(config: ParleyConfig, registry: BackendRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            registry,
            services: Services::default(),
            clock: None,
            tracker: None,
            rasterizer: None,
            backoff: Backoff::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ParleyConfig {
        &self.config
    }

    #[must_use]
    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    #[must_use]
    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Quota ledgers, for limit administration.
    #[must_use]
    pub fn tracker(&self) -> &Arc<QuotaTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn registry(&self) -> &BackendRegistry {
        self.contexts.registry()
    }

    /// Run one inbound message to completion, delivering output to `sink`.
    ///
    /// Failures are reported to the caller as a message. An unexpected error
    /// is also returned, unless some output had already been delivered.
    pub async fn handle_message(
        &self,
        message: InboundMessage,
        sink: &dyn ReplySink,
    ) -> Result<TurnOutcome> {
        let counted = Counted::new(sink);
        let session_id = message.session_id.clone();
        let result = match self.process(message, &counted).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let delivered_before = counted.delivered();
                let unexpected = self.report(&counted, &session_id, &e).await;
                if unexpected && delivered_before == 0 {
                    Err(e)
                } else {
                    Ok(TurnOutcome::Failed)
                }
            },
        };
        sink.complete().await;
        result
    }

    async fn process(&self, message: InboundMessage, sink: &dyn ReplySink) -> Result<TurnOutcome> {
        if message.text.trim().is_empty() {
            sink.deliver(RenderedFragment::text(self.config.response.placeholder.as_str()))
                .await?;
            return Ok(TurnOutcome::Answered);
        }
        if self.triggers.is_ignored(&message.text) {
            debug!(session_id = %message.session_id, "message ignored");
            return Ok(TurnOutcome::Rejected(RejectReason::Ignored));
        }

        let session = self.directory.get_or_create(&message.session_id);
        let (prompt, routed) = self.route(&message, &session).await?;
        let default_ai = &self.config.response.default_ai;
        session
            .current_or_create(default_ai, || {
                self.contexts.create(&message.session_id, default_ai)
            })
            .await?;

        let turn = Turn::new(message, prompt, session, routed);
        debug!(
            turn_id = %turn.id,
            session_id = %turn.session_id,
            platform = %turn.platform,
            admin = turn.is_admin,
            "turn started"
        );
        let responder = Responder::new(&turn, sink, self.chain.layers(), Arc::clone(&self.tts));
        let outcome = self.chain.run(&turn, &responder, &self.dispatcher).await?;
        debug!(turn_id = %turn.id, ?outcome, delivered = responder.delivered(), "turn finished");
        Ok(outcome)
    }

    /// Pick the context named by a routing prefix, stripping the prefix.
    async fn route(
        &self,
        message: &InboundMessage,
        session: &SessionHandle,
    ) -> Result<(String, Option<Arc<ContextSlot>>)> {
        let trigger = self.triggers.config();
        let text = message.text.as_str();
        if !text.contains(' ') || !(trigger.allow_switching_ai || message.is_admin) {
            return Ok((text.trim().to_string(), None));
        }

        let mut routes: Vec<_> = trigger.prefix_ai.iter().collect();
        routes.sort_by(|a, b| a.0.cmp(b.0));
        for (backend_type, prefixes) in routes {
            for prefix in prefixes {
                let marker = format!("{prefix} ");
                if !text.contains(&marker) {
                    continue;
                }
                let slot = session
                    .first_or_create(backend_type, || {
                        self.contexts.create(&message.session_id, backend_type)
                    })
                    .await?;
                debug!(
                    session_id = %message.session_id,
                    backend = %backend_type,
                    "routed by prefix"
                );
                let prompt = text.strip_prefix(marker.as_str()).unwrap_or(text);
                return Ok((prompt.trim().to_string(), Some(slot)));
            }
        }
        Ok((text.trim().to_string(), None))
    }

    /// Tell the caller what went wrong. Returns whether the error was unexpected.
    async fn report(&self, sink: &dyn ReplySink, session_id: &str, e: &Error) -> bool {
        let response = &self.config.response;
        let (reply, unexpected) = match e {
            Error::TurnTimedOut { .. } => (None, false),
            Error::DrawingFailed(source) => {
                warn!(session_id, error = %source, "drawing failed");
                let exc = source.to_string();
                (Some(template::fill(&response.error_drawing, &[("exc", &exc)])), false)
            },
            Error::CommandRefused(message) => (Some(message.clone()), false),
            Error::BackendTypeNotFound(backend_type) => {
                info!(session_id, backend = %backend_type, "unknown backend type requested");
                let reply = format!(
                    "AI type '{backend_type}' is not available. Available AI:\n{}",
                    self.contexts.registry().bots_info()
                );
                (Some(reply), false)
            },
            Error::PresetNotFound(keyword) => {
                (Some(format!("Preset '{keyword}' was not found.")), false)
            },
            e if e.is_transient() => {
                warn!(session_id, error = %e, "upstream unavailable after retries");
                let exc = e.to_string();
                (
                    Some(template::fill(&response.error_network_failure, &[("exc", &exc)])),
                    false,
                )
            },
            e => {
                error!(session_id, error = ?e, "turn failed");
                let exc = e.to_string();
                (Some(template::fill(&response.error_format, &[("exc", &exc)])), true)
            },
        };

        if let Some(reply) = reply
            && let Err(delivery) = sink.deliver(RenderedFragment::text(reply)).await
        {
            warn!(session_id, error = %delivery, "failed to deliver error reply");
        }
        unexpected
    }
}

/// Counts what reaches the caller's sink.
struct Counted<'a> {
    inner: &'a dyn ReplySink,
    delivered: AtomicUsize,
}

impl<'a> Counted<'a> {
    fn new(inner: &'a dyn ReplySink) -> Self {
        Self {
            inner,
            delivered: AtomicUsize::new(0),
        }
    }

    fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplySink for Counted<'_> {
    async fn deliver(&self, fragment: RenderedFragment) -> Result<()> {
        self.inner.deliver(fragment).await?;
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
