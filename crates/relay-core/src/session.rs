//! ============================================================================
//! Session Store - Pending Authorizations Keyed by State
//! ============================================================================
//! The initiator puts a session, the callback takes it. `take` is the only
//! read: lookup and removal happen under one write lock, so a state value is
//! honoured at most once. Entries older than the TTL are never returned.
//! ============================================================================

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::types::AuthSession;

/// Maximum number of pending sessions kept in memory
const MAX_SESSIONS: usize = 10_000;

/// Storage capability for pending authorizations.
///
/// The in-memory implementation lives for the process; an implementation
/// backed by an external cache with TTL can replace it without touching the
/// relay.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, session: AuthSession);

    /// Remove and return the session for `state`, if present and unexpired
    async fn take(&self, state: &str) -> Option<AuthSession>;

    /// Drop every expired session, returning how many were removed
    async fn purge_expired(&self) -> usize;

    async fn len(&self) -> usize;
}

/// Process-local session store with TTL and a capacity bound
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, AuthSession>>>,
    ttl_secs: i64,
    capacity: usize,
}

impl MemorySessionStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self::with_capacity(ttl_secs, MAX_SESSIONS)
    }

    pub fn with_capacity(ttl_secs: i64, capacity: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl_secs,
            capacity: capacity.max(1),
        }
    }

    fn is_live(&self, session: &AuthSession, now: i64) -> bool {
        now - session.created_at < self.ttl_secs
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session: AuthSession) {
        let now = chrono::Utc::now().timestamp();
        let mut sessions = self.sessions.write().await;

        sessions.retain(|_, s| now - s.created_at < self.ttl_secs);

        // Evict oldest entry if store is at capacity
        if sessions.len() >= self.capacity {
            if let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, s)| s.created_at)
                .map(|(k, _)| k.clone())
            {
                warn!("Session store full, evicting oldest pending login");
                sessions.remove(&oldest);
            }
        }

        debug!("Stored session for state {}", session.state);
        sessions.insert(session.state.clone(), session);
    }

    async fn take(&self, state: &str) -> Option<AuthSession> {
        let now = chrono::Utc::now().timestamp();
        let session = self.sessions.write().await.remove(state)?;

        if self.is_live(&session, now) {
            debug!("Consumed session for state {}", state);
            Some(session)
        } else {
            info!(
                "Session for state {} expired {}s ago",
                state,
                now - session.created_at - self.ttl_secs
            );
            None
        }
    }

    async fn purge_expired(&self) -> usize {
        let now = chrono::Utc::now().timestamp();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| now - s.created_at < self.ttl_secs);
        let purged = before - sessions.len();
        if purged > 0 {
            info!("Purged {} expired sessions", purged);
        }
        purged
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
