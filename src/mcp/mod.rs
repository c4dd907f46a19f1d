//! MCP protocol engine: capability managers, dispatch registry, and the
//! request processor shared by both transports.

pub mod completion;
pub mod core;
pub mod logging;
pub mod processor;
pub mod prompts;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod tools;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use self::protocol::RequestId;

/// A capability manager owns one MCP namespace of JSON-RPC methods.
#[async_trait]
pub trait CapabilityManager: Send + Sync {
    /// Capability name, e.g. `tools`.
    fn name(&self) -> &'static str;

    /// Whether this manager handles the given method string.
    fn claims(&self, method: &str) -> bool;

    /// Execute a claimed method. `Ok(None)` means the request was a
    /// notification and no response is emitted.
    async fn execute(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: &RequestContext,
    ) -> Result<Option<Value>>;
}

/// Requests the client has asked to cancel, keyed by request id.
///
/// Membership is add-only until explicit removal so an in-flight handler can
/// still observe the cancellation after the notification was processed.
#[derive(Default)]
pub struct CancellationRegistry {
    inner: Mutex<HashMap<RequestId, Option<String>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cancellation with an optional client-supplied reason.
    pub fn cancel(&self, id: RequestId, reason: Option<String>) {
        self.inner
            .lock()
            .expect("cancellation lock poisoned")
            .insert(id, reason);
    }

    pub fn is_cancelled(&self, id: &RequestId) -> bool {
        self.inner
            .lock()
            .expect("cancellation lock poisoned")
            .contains_key(id)
    }

    /// The reason supplied with the cancellation, when there was one.
    pub fn reason(&self, id: &RequestId) -> Option<String> {
        self.inner
            .lock()
            .expect("cancellation lock poisoned")
            .get(id)
            .cloned()
            .flatten()
    }

    /// Forget a cancellation record.
    pub fn remove(&self, id: &RequestId) {
        self.inner
            .lock()
            .expect("cancellation lock poisoned")
            .remove(id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cancellation lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-request execution context handed to capability managers.
///
/// Carries the transport-level session identity (absent on stdio), the
/// request id, and the cancelled-request set so handlers can cooperatively
/// abort.
#[derive(Clone)]
pub struct RequestContext {
    pub session_id: Option<String>,
    pub request_id: Option<RequestId>,
    cancelled: Arc<CancellationRegistry>,
}

impl RequestContext {
    pub fn new(
        session_id: Option<String>,
        request_id: Option<RequestId>,
        cancelled: Arc<CancellationRegistry>,
    ) -> Self {
        Self {
            session_id,
            request_id,
            cancelled,
        }
    }

    /// Whether the client has cancelled this request.
    pub fn is_cancelled(&self) -> bool {
        self.request_id
            .as_ref()
            .map(|id| self.cancelled.is_cancelled(id))
            .unwrap_or(false)
    }

    /// Shared cancellation registry, for managers that record cancellations.
    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancelled
    }
}
