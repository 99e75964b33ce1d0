//! Connection registry (component C3).
//!
//! Tracks which peer 4-tuples currently have a live session at the server.
//! The only state shared across tasks at the server; touched only at
//! session-open and session-close (§5 Shared state).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

/// Soft limit on concurrently tracked sessions (§3, `MAX_CONNECTIONS`).
pub use crate::constants::MAX_CONNECTIONS;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    active: Mutex<HashMap<SocketAddr, u64>>,
    total: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            total: AtomicU64::new(0),
        }
    }

    pub async fn is_open(&self, peer: SocketAddr) -> bool {
        self.active.lock().await.contains_key(&peer)
    }

    /// Records `peer` with a fresh monotonic session ID. Does not check
    /// for an existing entry — callers are expected to call `is_open`
    /// first (§4.3: "idempotency is not required of the caller").
    pub async fn open(&self, peer: SocketAddr) -> u64 {
        let id = self.total.fetch_add(1, Ordering::SeqCst) + 1;
        self.active.lock().await.insert(peer, id);
        id
    }

    /// Removes `peer`. The design assumes a session calls this exactly
    /// once on termination (§4.3); a caller that double-closes a peer
    /// simply finds nothing to remove.
    pub async fn close(&self, peer: SocketAddr) {
        self.active.lock().await.remove(&peer);
    }

    pub async fn len(&self) -> usize {
        self.active.lock().await.len()
    }
}
