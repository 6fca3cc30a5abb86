use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

/// Control side of one running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Unique identifier for the session.
    pub id: Uuid,
    /// Socket address of the peer.
    pub addr: SocketAddr,
    pub started_at: Instant,
    tls: bool,
    stop: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn new(addr: SocketAddr, tls: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            addr,
            started_at: Instant::now(),
            tls,
            stop: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Asks the session to finish after its current request.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    ///
    /// A stop requested before this future is polled is not lost.
    pub async fn stopped(&self) {
        self.stop.notified().await
    }

    /// Flags the session as closed. Returns `true` only for the first call.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Registry of the sessions currently running.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<DashMap<Uuid, SessionHandle>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handle: SessionHandle) {
        debug!(session = %handle.id, peer = %handle.addr, "Session registered");
        self.sessions.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, handle)| handle)
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stops one session. Returns `false` if no such session is running.
    pub fn stop(&self, id: &Uuid) -> bool {
        match self.sessions.get(id) {
            Some(entry) => {
                entry.value().stop();
                true
            }
            None => false,
        }
    }

    /// Stops every running session.
    pub fn stop_all(&self) {
        self.sessions.iter().for_each(|entry| {
            debug!(session = %entry.key(), "Stopping session");
            entry.value().stop();
        });
    }
}
