//! Transport plumbing shared by stdio and HTTP: in-flight request tracking
//! and the bounded graceful-shutdown drain.

pub mod stdio;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::Error;
use crate::mcp::protocol::{JsonRpcResponse, RequestId};

/// Total time budget for draining in-flight requests at shutdown.
pub const GRACEFUL_SHUTDOWN_TIMEOUT_MS: u64 = 5000;

/// Poll interval while draining.
pub const GRACEFUL_SHUTDOWN_POLL_MS: u64 = 50;

/// Shared transport state: pending-request count and the shutting-down flag.
#[derive(Default)]
pub struct TransportState {
    pending: AtomicUsize,
    shutting_down: AtomicBool,
}

impl TransportState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Begin tracking a request. Returns `None` once shutdown has started;
    /// the caller then refuses the request with a shutdown error.
    pub fn begin_request(self: &Arc<Self>) -> Option<RequestGuard> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return None;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        // Shutdown may have raced us between the check and the increment;
        // the drain loop still sees this request, so it is counted either
        // way and completes normally.
        Some(RequestGuard {
            state: self.clone(),
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Flip the shutting-down flag. New requests are refused from here on.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Wait for in-flight requests to complete, polling every
    /// [`GRACEFUL_SHUTDOWN_POLL_MS`]. Returns `false` when requests were
    /// still pending after [`GRACEFUL_SHUTDOWN_TIMEOUT_MS`].
    pub async fn drain(&self) -> bool {
        let deadline = Duration::from_millis(GRACEFUL_SHUTDOWN_TIMEOUT_MS);
        let poll = Duration::from_millis(GRACEFUL_SHUTDOWN_POLL_MS);
        let start = tokio::time::Instant::now();

        loop {
            let pending = self.pending_count();
            if pending == 0 {
                info!("All in-flight requests drained");
                return true;
            }
            if start.elapsed() >= deadline {
                warn!("Shutdown timed out with {pending} request(s) still pending");
                return false;
            }
            sleep(poll).await;
        }
    }
}

/// RAII guard for one in-flight request.
pub struct RequestGuard {
    state: Arc<TransportState>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.state.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Build the `-32000 Server is shutting down` reply for a raw frame,
/// echoing its id when one can still be extracted.
pub fn shutdown_refusal(raw: &str) -> String {
    let id: Option<RequestId> = serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get("id").cloned())
        .and_then(|v| serde_json::from_value(v).ok());

    let refusal = Error::ShuttingDown;
    let response = JsonRpcResponse::error(id, refusal.jsonrpc_code(), refusal.to_string());
    serde_json::to_string(&response).unwrap_or_else(|_| {
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32000,"message":"Server is shutting down"}}"#
            .to_string()
    })
}
