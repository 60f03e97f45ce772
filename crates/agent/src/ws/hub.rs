//! Session hub
//!
//! One hub per process. Each streaming session registers a bounded
//! outbound queue; broadcasts fan a payload out to every session. A
//! session whose queue is full is severed rather than ever blocking the
//! producer path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, Notify};
use tracing::warn;

/// Outbound queue capacity per session
pub const SESSION_QUEUE_CAPACITY: usize = 256;

struct SessionHandle {
    sender: mpsc::Sender<String>,
    closer: Arc<Notify>,
}

/// Registry of live streaming sessions
pub struct Hub {
    sessions: RwLock<HashMap<u64, SessionHandle>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl Hub {
    /// Create the hub
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register a session. Returns its id, the receiving end of its
    /// outbound queue, and the notifier used to sever it.
    pub fn register(&self) -> (u64, mpsc::Receiver<String>, Arc<Notify>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(SESSION_QUEUE_CAPACITY);
        let closer = Arc::new(Notify::new());
        self.sessions
            .write()
            .expect("session map poisoned")
            .insert(
                id,
                SessionHandle {
                    sender,
                    closer: Arc::clone(&closer),
                },
            );
        (id, receiver, closer)
    }

    /// Remove a session from the registry.
    pub fn unregister(&self, id: u64) {
        self.sessions
            .write()
            .expect("session map poisoned")
            .remove(&id);
    }

    /// The sender for a session's outbound queue.
    pub fn sender(&self, id: u64) -> Option<mpsc::Sender<String>> {
        self.sessions
            .read()
            .expect("session map poisoned")
            .get(&id)
            .map(|handle| handle.sender.clone())
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.read().expect("session map poisoned").len()
    }

    /// Fan a serialized message out to every session. Sessions whose
    /// queue is full are severed.
    pub fn broadcast(&self, payload: &str) {
        let mut overflowed = Vec::new();
        {
            let sessions = self.sessions.read().expect("session map poisoned");
            for (&id, handle) in sessions.iter() {
                match handle.sender.try_send(payload.to_string()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(session = id, "outbound queue full, severing session");
                        // notify_one stores a permit, so the session loop
                        // sees the severing even if it is mid-request.
                        handle.closer.notify_one();
                        overflowed.push(id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        overflowed.push(id);
                    }
                }
            }
        }
        if !overflowed.is_empty() {
            let mut sessions = self.sessions.write().expect("session map poisoned");
            for id in overflowed {
                sessions.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_broadcast_unregister() {
        let hub = Hub::new();
        let (id_a, mut rx_a, _closer_a) = hub.register();
        let (_id_b, mut rx_b, _closer_b) = hub.register();
        assert_eq!(hub.session_count(), 2);

        hub.broadcast(r#"{"type":"test"}"#);
        assert_eq!(rx_a.recv().await.unwrap(), r#"{"type":"test"}"#);
        assert_eq!(rx_b.recv().await.unwrap(), r#"{"type":"test"}"#);

        hub.unregister(id_a);
        assert_eq!(hub.session_count(), 1);
    }

    #[tokio::test]
    async fn overflowing_session_is_severed() {
        let hub = Hub::new();
        let (id, _rx, closer) = hub.register();

        let severed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&severed);
        let closer_clone = Arc::clone(&closer);
        let watcher = tokio::spawn(async move {
            closer_clone.notified().await;
            flag.store(true, Ordering::SeqCst);
        });
        tokio::task::yield_now().await;

        // Fill the queue without draining, then one more to overflow.
        for _ in 0..=SESSION_QUEUE_CAPACITY {
            hub.broadcast("x");
        }

        watcher.await.unwrap();
        assert!(severed.load(Ordering::SeqCst));
        assert_eq!(hub.session_count(), 0);
        assert!(hub.sender(id).is_none());
    }
}
