//! Per-session FIFO serialization with queue-depth backpressure.

use std::sync::Arc;

use {
    dashmap::DashMap,
    parley_common::queue::{QueueInfo, QueueTicket},
    tracing::debug,
};

/// Result of asking the gate for a place in a session's queue.
#[derive(Debug)]
pub enum Admission {
    /// The queue is saturated; the turn must not run.
    Rejected { depth: usize },
    /// The turn holds a place. `ahead` counts the turns in front of it.
    Admitted { ticket: QueueTicket, ahead: usize },
}

/// Owns one [`QueueInfo`] per session.
#[derive(Debug)]
pub struct ConcurrencyGate {
    queues: DashMap<String, Arc<QueueInfo>>,
    /// Reject when the depth including the new turn exceeds this; `0` never rejects.
    max_queue_size: usize,
    /// Tell the caller its position when more than this many turns are ahead.
    notice_size: usize,
}

impl ConcurrencyGate {
    #[must_use]
    pub fn new(max_queue_size: usize, notice_size: usize) -> Self {
        Self {
            queues: DashMap::new(),
            max_queue_size,
            notice_size,
        }
    }

    /// The session's own queue, created on first use.
    #[must_use]
    pub fn queue(&self, session_id: &str) -> Arc<QueueInfo> {
        Arc::clone(
            self.queues
                .entry(session_id.to_string())
                .or_insert_with(QueueInfo::new)
                .value(),
        )
    }

    /// Join the effective queue for `session_id`.
    ///
    /// When the backend queues requests itself (`internal`), the turn first
    /// passes through the session's own queue and then counts against the
    /// backend's queue instead.
    pub async fn admit(
        &self,
        session_id: &str,
        internal: Option<Arc<QueueInfo>>,
    ) -> Admission {
        let own = self.queue(session_id);
        let effective = match internal {
            Some(internal) => {
                let ticket = own.register();
                debug!(
                    session_id,
                    ahead = ticket.depth() - 1,
                    "waiting on session queue before backend queue"
                );
                let _guard = ticket.queue().lock().await;
                internal
            },
            None => own,
        };

        let ticket = effective.register();
        let depth = ticket.depth();
        if self.max_queue_size > 0 && depth > self.max_queue_size {
            debug!(session_id, depth, max = self.max_queue_size, "queue full, rejecting turn");
            return Admission::Rejected { depth };
        }
        Admission::Admitted {
            ticket,
            ahead: depth - 1,
        }
    }

    /// Whether a turn with `ahead` turns in front of it should be told so.
    #[must_use]
    pub fn should_notify(&self, ahead: usize) -> bool {
        ahead > self.notice_size
    }

    /// Run `work` once every turn ahead of `ticket` has finished.
    pub async fn serialize<F: Future>(&self, ticket: &QueueTicket, work: F) -> F::Output {
        let _guard = ticket.queue().lock().await;
        work.await
    }

    /// Sessions with a queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
