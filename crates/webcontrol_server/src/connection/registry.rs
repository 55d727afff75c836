//! Registry of live WebSocket sessions.
//!
//! Sessions register themselves after a successful upgrade and deregister
//! when their task ends, whatever the reason. The tick thread walks a
//! snapshot of the registry so it never holds a map shard lock while the
//! dispatcher runs.

use super::task_queue::TaskQueue;
use super::SessionId;
use crate::messaging::CommandDispatcher;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// State shared between a WebSocket session task and the tick thread.
#[derive(Debug)]
pub struct WsSessionShared {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub queue: TaskQueue,
    /// Wakes the session task when staged results are ready to send
    pub flush: Notify,
}

impl WsSessionShared {
    pub fn new(id: SessionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            queue: TaskQueue::new(),
            flush: Notify::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<WsSessionShared>>,
    next_id: AtomicUsize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers the shared state for a freshly upgraded session.
    pub fn register(&self, peer: SocketAddr) -> Arc<WsSessionShared> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(WsSessionShared::new(id, peer));
        self.sessions.insert(id, shared.clone());
        debug!("Registered WebSocket session {} from {}", id, peer);
        shared
    }

    pub fn deregister(&self, id: SessionId) {
        if self.sessions.remove(&id).is_some() {
            debug!("Deregistered WebSocket session {}", id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }

    /// Drains every registered session through `dispatcher`.
    ///
    /// Sessions that dispatched at least one task are woken to flush their
    /// results. Returns the total number of tasks dispatched.
    pub fn drain_all(&self, dispatcher: &dyn CommandDispatcher) -> usize {
        let snapshot: Vec<Arc<WsSessionShared>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut total = 0;
        for session in snapshot {
            let dispatched = session.queue.drain(dispatcher);
            if dispatched > 0 {
                session.flush.notify_one();
                total += dispatched;
            }
        }
        total
    }
}
