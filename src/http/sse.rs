//! SSE connection tracking and fan-out for the Streamable HTTP transport.
//!
//! Each GET upgrade registers a connection backed by a bounded channel; the
//! HTTP response body drains it. Writes go through `send_timeout` so one
//! slow client cannot stall the broadcast: a connection that misses the
//! 1 s budget (or whose body stream is gone) is dropped from the table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Upper bound on concurrently tracked SSE connections.
pub const MAX_SSE_CONNECTIONS: usize = 1000;

/// Per-connection write budget.
pub const SSE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default keepalive period in milliseconds. Zero disables keepalive.
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 30_000;

/// Comment frame greeting every accepted stream.
pub const SSE_ACCEPTED_FRAME: &str = ": sse accepted\r\n\r\n";

/// Comment frame keeping idle connections alive.
pub const SSE_KEEPALIVE_FRAME: &str = ": keepalive\r\n\r\n";

/// Frames written per connection before backpressure kicks in.
const CONNECTION_BUFFER: usize = 32;

/// Frame a single-line JSON payload as an SSE data event.
pub fn data_frame(json: &str) -> String {
    format!("data: {json}\r\n\r\n")
}

struct SseConnection {
    session_id: String,
    established_at: Instant,
    last_sent: Instant,
    tx: mpsc::Sender<String>,
}

/// The connection table (`sseLock` in the concurrency model). Writes are
/// never made while the table lock is held.
pub struct SseRegistry {
    connections: Mutex<HashMap<u64, SseConnection>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl SseRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_SSE_CONNECTIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    /// Register a connection bound to a session id (possibly empty when the
    /// client sent no session header). Returns the connection handle and
    /// the frame receiver backing the response body, or `None` at capacity.
    /// The accepted-greeting is already queued on the channel.
    pub fn register(&self, session_id: &str) -> Option<(u64, mpsc::Receiver<String>)> {
        let mut connections = self.connections.lock().expect("sse lock poisoned");
        if connections.len() >= self.capacity {
            warn!(
                "SSE connection limit reached ({}), rejecting",
                self.capacity
            );
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
        tx.try_send(SSE_ACCEPTED_FRAME.to_string())
            .expect("fresh sse channel cannot be full");

        let now = Instant::now();
        connections.insert(
            id,
            SseConnection {
                session_id: session_id.to_string(),
                established_at: now,
                last_sent: now,
                tx,
            },
        );
        debug!(
            "SSE connection {id} registered (session: {})",
            if session_id.is_empty() { "<none>" } else { session_id }
        );
        Some((id, rx))
    }

    /// Drop one connection. Returns `false` when it was not present.
    pub fn remove(&self, conn_id: u64) -> bool {
        let mut connections = self.connections.lock().expect("sse lock poisoned");
        connections.remove(&conn_id).is_some()
    }

    /// Drop every connection bound to a session. Returns how many went.
    pub fn remove_session(&self, session_id: &str) -> usize {
        let mut connections = self.connections.lock().expect("sse lock poisoned");
        let before = connections.len();
        connections.retain(|_, c| c.session_id != session_id);
        let removed = before - connections.len();
        if removed > 0 {
            debug!("Removed {removed} SSE connection(s) for session {session_id}");
        }
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().expect("sse lock poisoned").len()
    }

    /// Age of a connection, for observability.
    pub fn connection_age(&self, conn_id: u64) -> Option<Duration> {
        let connections = self.connections.lock().expect("sse lock poisoned");
        connections.get(&conn_id).map(|c| c.established_at.elapsed())
    }

    pub fn clear(&self) {
        self.connections.lock().expect("sse lock poisoned").clear();
    }

    /// Write a frame to every active connection, best-effort per
    /// connection. Failing or timed-out writes remove the connection.
    /// Returns the number of deliveries.
    pub async fn broadcast(&self, frame: &str) -> usize {
        let targets: Vec<(u64, mpsc::Sender<String>)> = {
            let connections = self.connections.lock().expect("sse lock poisoned");
            connections
                .iter()
                .map(|(&id, c)| (id, c.tx.clone()))
                .collect()
        };
        if targets.is_empty() {
            return 0;
        }
        trace!("Broadcasting to {} SSE connection(s)", targets.len());
        self.write_to(targets, frame).await
    }

    /// Send a keepalive to every connection idle for at least `interval`.
    pub async fn keepalive_sweep(&self, interval: Duration) -> usize {
        let now = Instant::now();
        let idle: Vec<(u64, mpsc::Sender<String>)> = {
            let connections = self.connections.lock().expect("sse lock poisoned");
            connections
                .iter()
                .filter(|(_, c)| now.duration_since(c.last_sent) >= interval)
                .map(|(&id, c)| (id, c.tx.clone()))
                .collect()
        };
        if idle.is_empty() {
            return 0;
        }
        self.write_to(idle, SSE_KEEPALIVE_FRAME).await
    }

    async fn write_to(&self, targets: Vec<(u64, mpsc::Sender<String>)>, frame: &str) -> usize {
        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for (id, tx) in targets {
            match tx.send_timeout(frame.to_string(), SSE_WRITE_TIMEOUT).await {
                Ok(()) => delivered.push(id),
                Err(e) => {
                    debug!("SSE write to connection {id} failed: {e}");
                    failed.push(id);
                }
            }
        }

        let mut connections = self.connections.lock().expect("sse lock poisoned");
        let now = Instant::now();
        for id in &delivered {
            if let Some(c) = connections.get_mut(id) {
                c.last_sent = now;
            }
        }
        for id in &failed {
            connections.remove(id);
        }
        delivered.len()
    }
}

impl Default for SseRegistry {
    fn default() -> Self {
        Self::new()
    }
}
