//! Per-session waiter counter paired with a FIFO exclusive-access lock.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::{Mutex, MutexGuard};

/// Waiter count and exclusive-access primitive for one session.
///
/// Backends that buffer requests internally hand one of these out so the
/// concurrency gate can read their depth instead of stacking a second limit.
#[derive(Debug, Default)]
pub struct QueueInfo {
    size: AtomicUsize,
    lock: Mutex<()>,
}

impl QueueInfo {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of registered waiters, including the one currently running.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Join the queue. The returned ticket reports this waiter's depth and
    /// leaves the queue when dropped.
    #[must_use]
    pub fn register(self: &Arc<Self>) -> QueueTicket {
        let depth = self.size.fetch_add(1, Ordering::SeqCst) + 1;
        QueueTicket {
            queue: Arc::clone(self),
            depth,
        }
    }

    /// Wait for exclusive access. tokio's mutex admits waiters in arrival order.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

/// Membership in a [`QueueInfo`]. Depth decrements when dropped.
#[derive(Debug)]
pub struct QueueTicket {
    queue: Arc<QueueInfo>,
    depth: usize,
}

impl QueueTicket {
    /// Depth at registration time (1 = nobody ahead).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<QueueInfo> {
        &self.queue
    }
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        self.queue.size.fetch_sub(1, Ordering::SeqCst);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    #[test]
    fn tickets_track_depth_and_release() {
        let queue = QueueInfo::new();
        let first = queue.register();
        let second = queue.register();
        assert_eq!(first.depth(), 1);
        assert_eq!(second.depth(), 2);
        assert_eq!(queue.size(), 2);
        drop(first);
        drop(second);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_is_fifo() {
        let queue = QueueInfo::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let guard = queue.lock().await;

        let mut handles = Vec::new();
        for i in 0..3 {
            let queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _g = queue.lock().await;
                order.lock().unwrap().push(i);
            }));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        drop(guard);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
