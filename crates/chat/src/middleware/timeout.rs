use std::time::Duration;

use {async_trait::async_trait, tracing::warn};

use crate::{
    error::{Error, Result},
    middleware::{Middleware, Next},
    responder::Responder,
    turn::{Turn, TurnOutcome},
};

/// Soft notice and hard cancellation for slow turns.
///
/// After `soft` without any delivered output the caller is told to wait;
/// after `hard` the turn is dropped, discarding anything still buffered.
pub struct TimeoutGuard {
    soft: Duration,
    hard: Duration,
    soft_notice: String,
    cancel_notice: String,
}

impl TimeoutGuard {
    #[must_use]
    pub fn new(
        soft: Duration,
        hard: Duration,
        soft_notice: impl Into<String>,
        cancel_notice: impl Into<String>,
    ) -> Self {
        Self {
            soft,
            hard,
            soft_notice: soft_notice.into(),
            cancel_notice: cancel_notice.into(),
        }
    }

    /// Durations in seconds; negative or non-finite values count as zero.
    #[must_use]
    pub fn from_secs(
        soft: f64,
        hard: f64,
        soft_notice: impl Into<String>,
        cancel_notice: impl Into<String>,
    ) -> Self {
        Self::new(secs(soft), secs(hard), soft_notice, cancel_notice)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

#[async_trait]
impl Middleware for TimeoutGuard {
    fn name(&self) -> &'static str {
        "timeout"
    }

    async fn handle_request(
        &self,
        turn: &Turn,
        responder: &Responder<'_>,
        next: Next<'_>,
    ) -> Result<TurnOutcome> {
        let work = next.run(turn, responder);
        tokio::pin!(work);

        let soft = tokio::time::sleep(self.soft);
        tokio::pin!(soft);
        let hard = tokio::time::sleep(self.hard);
        tokio::pin!(hard);
        let mut soft_fired = false;

        loop {
            tokio::select! {
                outcome = &mut work => return outcome,
                () = &mut soft, if !soft_fired => {
                    soft_fired = true;
                    if responder.delivered() == 0 {
                        warn!(turn_id = %turn.id, secs = self.soft.as_secs_f64(), "turn is slow");
                        responder.notify(self.soft_notice.as_str()).await?;
                    }
                },
                () = &mut hard => {
                    warn!(turn_id = %turn.id, secs = self.hard.as_secs_f64(), "turn cancelled");
                    responder.notify(self.cancel_notice.as_str()).await?;
                    return Err(Error::TurnTimedOut {
                        seconds: self.hard.as_secs_f64(),
                    });
                },
            }
        }
    }
}
