use std::sync::Arc;

use {
    async_trait::async_trait,
    parley_common::template,
    tracing::{debug, info},
};

use crate::{
    error::Result,
    gate::{Admission, ConcurrencyGate},
    middleware::{Middleware, Next},
    responder::Responder,
    turn::{RejectReason, Turn, TurnOutcome},
};

/// Queues turns per session and rejects them once the queue is full.
pub struct ConcurrencyLimiter {
    gate: Arc<ConcurrencyGate>,
    queue_full: String,
    queued_notice: String,
}

impl ConcurrencyLimiter {
    #[must_use]
    pub fn new(
        gate: Arc<ConcurrencyGate>,
        queue_full: impl Into<String>,
        queued_notice: impl Into<String>,
    ) -> Self {
        Self {
            gate,
            queue_full: queue_full.into(),
            queued_notice: queued_notice.into(),
        }
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }
}

#[async_trait]
impl Middleware for ConcurrencyLimiter {
    fn name(&self) -> &'static str {
        "concurrency"
    }

    async fn handle_request(
        &self,
        turn: &Turn,
        responder: &Responder<'_>,
        next: Next<'_>,
    ) -> Result<TurnOutcome> {
        let internal = turn.target().await.and_then(|slot| slot.internal_queue());
        let (ticket, ahead) = match self.gate.admit(&turn.session_id, internal).await {
            Admission::Rejected { depth } => {
                info!(session_id = %turn.session_id, depth, "turn rejected, queue full");
                responder.notify(self.queue_full.as_str()).await?;
                return Ok(TurnOutcome::Rejected(RejectReason::QueueFull));
            },
            Admission::Admitted { ticket, ahead } => (ticket, ahead),
        };

        if self.gate.should_notify(ahead) {
            let notice = template::fill(&self.queued_notice, &[(
                "queue_size",
                &ahead.to_string(),
            )]);
            responder.notify(notice).await?;
        }
        debug!(turn_id = %turn.id, ahead, "turn queued");
        self.gate
            .serialize(&ticket, next.run(turn, responder))
            .await
    }
}
