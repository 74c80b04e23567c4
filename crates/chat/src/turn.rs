//! One request/response exchange and how it ended.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use {
    parley_common::types::{Attachment, Platform},
    parley_quota::SessionKey,
};

use crate::directory::{ContextSlot, SessionHandle};

/// A message as handed over by a platform adapter.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub session_id: String,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub nickname: String,
    pub is_admin: bool,
    pub platform: Platform,
}

impl InboundMessage {
    #[must_use]
    pub fn new(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            text: text.into(),
            nickname: "Someone".into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = nickname.into();
        self
    }

    #[must_use]
    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Why a turn was stopped before doing its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    QueueFull,
    QuotaExceeded,
    DrawQuotaExceeded,
    AdminOnly,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Rejected(RejectReason),
    /// Backend, model, voice or renderer changed.
    Switched,
    /// Answered locally: commands, presets, drawings.
    Answered,
    /// Reached the live chat backend.
    Forwarded,
    /// Ended by an error that was reported to the caller.
    Failed,
}

/// A turn in flight through the middleware chain.
pub struct Turn {
    pub id: String,
    pub session_id: String,
    pub key: SessionKey,
    /// Trimmed message text, with any routing prefix removed.
    pub prompt: String,
    pub attachment: Option<Attachment>,
    pub nickname: String,
    pub is_admin: bool,
    pub platform: Platform,
    pub session: Arc<SessionHandle>,
    /// Context picked by a routing prefix, overriding the session's current one.
    pub routed: Option<Arc<ContextSlot>>,
    forwarded: AtomicBool,
    quota_warning: Mutex<Option<String>>,
}

impl Turn {
    #[must_use]
    pub fn new(
        message: InboundMessage,
        prompt: String,
        session: Arc<SessionHandle>,
        routed: Option<Arc<ContextSlot>>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: SessionKey::parse(&message.session_id),
            session_id: message.session_id,
            prompt,
            attachment: message.attachment,
            nickname: message.nickname,
            is_admin: message.is_admin,
            platform: message.platform,
            session,
            routed,
            forwarded: AtomicBool::new(false),
            quota_warning: Mutex::new(None),
        }
    }

    /// The context this turn acts on.
    pub async fn target(&self) -> Option<Arc<ContextSlot>> {
        match &self.routed {
            Some(slot) => Some(Arc::clone(slot)),
            None => self.session.current().await,
        }
    }

    /// Mark that the live backend is about to be asked.
    pub fn mark_forwarded(&self) {
        self.forwarded.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_forwarded(&self) -> bool {
        self.forwarded.load(Ordering::SeqCst)
    }

    pub fn set_quota_warning(&self, warning: String) {
        *self.quota_warning.lock().unwrap_or_else(|e| e.into_inner()) = Some(warning);
    }

    /// Take the pending quota warning, leaving none behind.
    #[must_use]
    pub fn take_quota_warning(&self) -> Option<String> {
        self.quota_warning
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}
