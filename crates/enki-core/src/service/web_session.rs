//! Server-side state for browser visitors.
//!
//! Each visitor gets a random token (kept in a signed cookie) mapped to their
//! own [`SessionGate`]. Sessions live in memory only and are dropped after a
//! period of inactivity or on logout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::gate::SessionGate;

/// Session token (UUID stored in the cookie).
pub type SessionToken = String;

const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// One visitor's gate plus bookkeeping.
pub struct WebSession {
    gate: Arc<Mutex<SessionGate>>,
    last_seen: AtomicI64,
    replying: Arc<AtomicBool>,
}

impl WebSession {
    fn new(gate: SessionGate) -> Self {
        Self {
            gate: Arc::new(Mutex::new(gate)),
            last_seen: AtomicI64::new(now()),
            replying: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn gate(&self) -> &Arc<Mutex<SessionGate>> {
        &self.gate
    }

    /// Claim the visitor's single reply slot. `None` while another reply runs.
    pub fn try_begin_reply(&self) -> Option<ReplyPermit> {
        self.replying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ReplyPermit(self.replying.clone()))
    }

    pub fn is_replying(&self) -> bool {
        self.replying.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.last_seen.store(now(), Ordering::Relaxed);
    }

    fn idle_for(&self) -> i64 {
        now() - self.last_seen.load(Ordering::Relaxed)
    }
}

/// Held for the lifetime of one streamed reply; frees the slot on drop.
pub struct ReplyPermit(Arc<AtomicBool>);

impl Drop for ReplyPermit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// In-memory map of session tokens to visitor sessions.
#[derive(Clone)]
pub struct WebSessions {
    sessions: Arc<RwLock<HashMap<SessionToken, Arc<WebSession>>>>,
    idle_ttl: Duration,
}

impl Default for WebSessions {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TTL)
    }
}

impl WebSessions {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl,
        }
    }

    /// Start a session for a fresh visitor, dropping idle ones first.
    pub async fn create(&self, gate: SessionGate) -> (SessionToken, Arc<WebSession>) {
        let token = Uuid::new_v4().to_string();
        let session = Arc::new(WebSession::new(gate));
        let mut sessions = self.sessions.write().await;
        let ttl = self.idle_ttl.as_secs() as i64;
        let before = sessions.len();
        sessions.retain(|_, s| s.idle_for() < ttl);
        if sessions.len() < before {
            debug!("Pruned {} idle web session(s)", before - sessions.len());
        }
        sessions.insert(token.clone(), session.clone());
        (token, session)
    }

    /// Look up a live session and mark it as used.
    pub async fn get(&self, token: &str) -> Option<Arc<WebSession>> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(token)?;
        if session.idle_for() >= self.idle_ttl.as_secs() as i64 {
            return None;
        }
        session.touch();
        Some(session.clone())
    }

    pub async fn destroy(&self, token: &str) {
        self.sessions.write().await.remove(token);
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
