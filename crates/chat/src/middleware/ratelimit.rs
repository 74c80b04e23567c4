use std::sync::Arc;

use {
    async_trait::async_trait,
    parley_common::types::RenderedFragment,
    parley_config::RatelimitConfig,
    parley_quota::{QuotaAxis, QuotaTracker},
    tracing::{debug, info},
};

use crate::{
    error::Result,
    middleware::{Middleware, Next},
    responder::Responder,
    turn::{RejectReason, Turn, TurnOutcome},
};

/// Hourly chat quota: rejects over-limit callers and warns those close to it.
///
/// Usage is recorded only for turns that reached the chat backend.
pub struct RateLimiter {
    tracker: Arc<QuotaTracker>,
    config: RatelimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(tracker: Arc<QuotaTracker>, config: RatelimitConfig) -> Self {
        Self { tracker, config }
    }
}

#[async_trait]
impl Middleware for RateLimiter {
    fn name(&self) -> &'static str {
        "ratelimit"
    }

    async fn handle_request(
        &self,
        turn: &Turn,
        responder: &Responder<'_>,
        next: Next<'_>,
    ) -> Result<TurnOutcome> {
        let ratio = self.tracker.ratio(QuotaAxis::Chat, &turn.key);
        if ratio >= 1.0 {
            info!(session_id = %turn.session_id, "chat quota exceeded");
            responder.notify(self.config.exceed.as_str()).await?;
            return Ok(TurnOutcome::Rejected(RejectReason::QuotaExceeded));
        }
        if ratio >= self.config.warning_rate
            && let Some(warning) =
                self.tracker
                    .warning_text(QuotaAxis::Chat, &turn.key, &self.config.warning_msg)
        {
            debug!(session_id = %turn.session_id, ratio, "chat quota warning armed");
            turn.set_quota_warning(warning);
        }
        next.run(turn, responder).await
    }

    fn handle_respond(&self, turn: &Turn, fragment: RenderedFragment) -> RenderedFragment {
        if !turn.is_forwarded() {
            return fragment;
        }
        match fragment {
            RenderedFragment::Text(text) => match turn.take_quota_warning() {
                Some(warning) => RenderedFragment::text(format!("{}\n\n{text}", warning.trim())),
                None => RenderedFragment::Text(text),
            },
            other => other,
        }
    }

    async fn handle_respond_completed(
        &self,
        turn: &Turn,
        outcome: Option<&TurnOutcome>,
        responder: &Responder<'_>,
    ) {
        if outcome != Some(&TurnOutcome::Forwarded) {
            return;
        }
        self.tracker.record(QuotaAxis::Chat, &turn.key);
        if let Some(warning) = turn.take_quota_warning()
            && let Err(e) = responder.notify(warning.trim()).await
        {
            debug!(turn_id = %turn.id, error = %e, "quota warning not delivered");
        }
    }
}
