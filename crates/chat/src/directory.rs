//! Session identity → conversation contexts, created lazily.

use std::{collections::HashMap, sync::Arc};

use {
    dashmap::DashMap,
    parley_common::queue::QueueInfo,
    parley_service_traits::ChatBackend,
    tokio::sync::{Mutex, RwLock},
};

use crate::{context::ConversationContext, error::Result};

/// A conversation context plus what the gate needs without locking it.
pub struct ContextSlot {
    backend_type: String,
    backend: Arc<dyn ChatBackend>,
    context: Mutex<ConversationContext>,
}

impl ContextSlot {
    #[must_use]
    pub fn new(backend_type: impl Into<String>, context: ConversationContext) -> Self {
        Self {
            backend_type: backend_type.into(),
            backend: Arc::clone(context.backend()),
            context: Mutex::new(context),
        }
    }

    #[must_use]
    pub fn backend_type(&self) -> &str {
        &self.backend_type
    }

    /// The backend's own request queue, if it keeps one.
    #[must_use]
    pub fn internal_queue(&self) -> Option<Arc<QueueInfo>> {
        self.backend.as_queue_aware().map(|q| q.queue_info())
    }

    #[must_use]
    pub fn context(&self) -> &Mutex<ConversationContext> {
        &self.context
    }
}

#[derive(Default)]
struct Conversations {
    by_type: HashMap<String, Arc<ContextSlot>>,
    current: Option<Arc<ContextSlot>>,
}

/// Every conversation context of one session.
pub struct SessionHandle {
    session_id: String,
    conversations: RwLock<Conversations>,
}

impl SessionHandle {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            conversations: RwLock::new(Conversations::default()),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn current(&self) -> Option<Arc<ContextSlot>> {
        self.conversations.read().await.current.clone()
    }

    pub async fn get(&self, backend_type: &str) -> Option<Arc<ContextSlot>> {
        self.conversations.read().await.by_type.get(backend_type).cloned()
    }

    /// The context for `backend_type`, built with `make` if missing.
    pub async fn first_or_create<F>(&self, backend_type: &str, make: F) -> Result<Arc<ContextSlot>>
    where
        F: FnOnce() -> Result<ContextSlot>,
    {
        let mut conversations = self.conversations.write().await;
        if let Some(slot) = conversations.by_type.get(backend_type) {
            return Ok(Arc::clone(slot));
        }
        let slot = Arc::new(make()?);
        conversations
            .by_type
            .insert(backend_type.to_string(), Arc::clone(&slot));
        Ok(slot)
    }

    /// Like [`Self::first_or_create`], and make the result current.
    pub async fn switch_to<F>(&self, backend_type: &str, make: F) -> Result<Arc<ContextSlot>>
    where
        F: FnOnce() -> Result<ContextSlot>,
    {
        let slot = self.first_or_create(backend_type, make).await?;
        self.conversations.write().await.current = Some(Arc::clone(&slot));
        Ok(slot)
    }

    /// The current context, creating `default_type` when there is none yet.
    pub async fn current_or_create<F>(
        &self,
        default_type: &str,
        make: F,
    ) -> Result<Arc<ContextSlot>>
    where
        F: FnOnce() -> Result<ContextSlot>,
    {
        if let Some(slot) = self.current().await {
            return Ok(slot);
        }
        self.switch_to(default_type, make).await
    }

    /// Backend types with a context in this session.
    pub async fn backend_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self
            .conversations
            .read()
            .await
            .by_type
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }
}

/// Process-wide map of sessions, owned by the orchestrator.
#[derive(Default)]
pub struct SessionDirectory {
    sessions: DashMap<String, Arc<SessionHandle>>,
}

impl SessionDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get_or_create(&self, session_id: &str) -> Arc<SessionHandle> {
        Arc::clone(
            self.sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(SessionHandle::new(session_id)))
                .value(),
        )
    }

    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::context::RenderFactory,
        async_trait::async_trait,
        futures::stream,
        parley_config::{ResponseConfig, TextToImageConfig},
        parley_service_traits::{QueueAware, TextStream},
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    struct Queued(Arc<QueueInfo>);

    impl QueueAware for Queued {
        fn queue_info(&self) -> Arc<QueueInfo> {
            Arc::clone(&self.0)
        }
    }

    #[async_trait]
    impl ChatBackend for Queued {
        fn ask(&self, _prompt: &str) -> TextStream {
            Box::pin(stream::empty())
        }

        async fn rollback(&self) -> bool {
            false
        }

        async fn on_reset(&self) {}

        async fn switch_model(&self, _model: &str) {}

        fn current_model(&self) -> String {
            String::new()
        }

        fn supported_models(&self) -> Vec<String> {
            Vec::new()
        }

        fn as_queue_aware(&self) -> Option<&dyn QueueAware> {
            Some(self)
        }
    }

    fn slot(backend_type: &str, queue: Arc<QueueInfo>) -> ContextSlot {
        let factory =
            RenderFactory::new(ResponseConfig::default(), TextToImageConfig::default(), None);
        let render = factory.build(None).unwrap();
        ContextSlot::new(
            backend_type,
            ConversationContext::new(backend_type, Arc::new(Queued(queue)), render, None),
        )
    }

    #[test]
    fn directory_creates_each_session_once() {
        let directory = SessionDirectory::new();
        let a = directory.get_or_create("friend-1");
        let b = directory.get_or_create("friend-1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(directory.len(), 1);
        assert!(directory.get("group-2").is_none());
    }

    #[tokio::test]
    async fn contexts_are_created_lazily_per_type() {
        let session = SessionHandle::new("friend-1");
        let built = AtomicUsize::new(0);
        let make = || {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(slot("a", QueueInfo::new()))
        };

        let first = session.current_or_create("a", make).await.unwrap();
        let again = session.current_or_create("a", make).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(built.load(Ordering::SeqCst), 1);

        let routed = session
            .first_or_create("b", || Ok(slot("b", QueueInfo::new())))
            .await
            .unwrap();
        assert_eq!(routed.backend_type(), "b");
        assert_eq!(session.current().await.unwrap().backend_type(), "a");

        session.switch_to("b", || unreachable!()).await.unwrap();
        assert_eq!(session.current().await.unwrap().backend_type(), "b");
        assert_eq!(session.backend_types().await, vec!["a", "b"]);
    }

    #[test]
    fn slot_exposes_backend_queue() {
        let queue = QueueInfo::new();
        let slot = slot("a", Arc::clone(&queue));
        assert!(Arc::ptr_eq(&slot.internal_queue().unwrap(), &queue));
    }
}
