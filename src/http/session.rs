//! Session tracking for the Streamable HTTP transport.
//!
//! One session per successful `initialize`, identified by the opaque id the
//! core manager minted. Sessions expire after 30 minutes of inactivity and
//! are reaped inline during validation and on table overflow.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Inactivity window after which a session expires.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Upper bound on concurrently tracked sessions.
pub const MAX_SESSIONS: usize = 10_000;

/// One tracked session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub protocol_version: String,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub initialized: bool,
}

impl Session {
    fn new(id: String, protocol_version: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            protocol_version,
            created_at: now,
            last_activity: now,
            initialized: false,
        }
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }
}

/// Outcome of validating a session id from a request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Known and fresh; `last_activity` has been updated.
    Valid,
    /// Never seen (or already removed).
    Unknown,
    /// Known but idle past the timeout; the entry has been removed and the
    /// caller must prune its SSE connections.
    Expired,
}

/// The session table (`sessionLock` in the concurrency model).
pub struct SessionTable {
    inner: Mutex<HashMap<String, Session>>,
    timeout: Duration,
    capacity: usize,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::with_limits(SESSION_TIMEOUT, MAX_SESSIONS)
    }

    /// Table with custom timeout/capacity, for tests.
    pub fn with_limits(timeout: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            timeout,
            capacity,
        }
    }

    /// Track a freshly initialised session. At capacity, expired entries
    /// are reaped first; returns `false` when the table is still full.
    pub fn insert(&self, id: String, protocol_version: String) -> bool {
        let mut inner = self.inner.lock().expect("session lock poisoned");

        if inner.len() >= self.capacity {
            let timeout = self.timeout;
            inner.retain(|_, s| !s.is_expired(timeout));
            if inner.len() >= self.capacity {
                warn!("Session table full ({} entries)", inner.len());
                return false;
            }
        }

        debug!("Tracking session {id} (protocol {protocol_version})");
        inner.insert(id.clone(), Session::new(id, protocol_version));
        true
    }

    /// Validate a session id, updating `last_activity` when it is live.
    pub fn validate(&self, id: &str) -> SessionStatus {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        match inner.get_mut(id) {
            None => SessionStatus::Unknown,
            Some(session) if session.is_expired(self.timeout) => {
                info!("Session {id} expired");
                inner.remove(id);
                SessionStatus::Expired
            }
            Some(session) => {
                session.last_activity = Instant::now();
                SessionStatus::Valid
            }
        }
    }

    /// Flag a session as fully initialised. Returns `false` for unknown ids.
    pub fn mark_initialized(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        match inner.get_mut(id) {
            Some(session) => {
                session.initialized = true;
                true
            }
            None => false,
        }
    }

    pub fn is_initialized(&self, id: &str) -> bool {
        let inner = self.inner.lock().expect("session lock poisoned");
        inner.get(id).map(|s| s.initialized).unwrap_or(false)
    }

    /// Remove a session. Returns `false` when it was not present.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner.remove(id).is_some()
    }

    /// Remove every expired session, returning the removed ids so the
    /// caller can prune their SSE connections.
    pub fn reap_expired(&self) -> Vec<String> {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        let timeout = self.timeout;
        let expired: Vec<String> = inner
            .iter()
            .filter(|(_, s)| s.is_expired(timeout))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            inner.remove(id);
        }
        if !expired.is_empty() {
            info!("Reaped {} expired session(s)", expired.len());
        }
        expired
    }

    pub fn clear(&self) {
        self.inner.lock().expect("session lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .contains_key(id)
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}
