//! Request processor: parses JSON-RPC frames, dispatches to capability
//! managers, and formats replies.
//!
//! Both transports funnel every inbound frame through here; an absent reply
//! travels upstream as HTTP 204 or stdio silence.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use crate::error::Error;
use crate::mcp::protocol::{error_codes, JsonRpcResponse, RequestId};
use crate::mcp::registry::CapabilityRegistry;
use crate::mcp::{CancellationRegistry, RequestContext};

pub struct RequestProcessor {
    registry: Arc<CapabilityRegistry>,
    cancelled: Arc<CancellationRegistry>,
}

impl RequestProcessor {
    pub fn new(registry: Arc<CapabilityRegistry>, cancelled: Arc<CancellationRegistry>) -> Self {
        Self {
            registry,
            cancelled,
        }
    }

    /// Shared cancellation registry for transports that need it.
    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancelled
    }

    /// Process a raw JSON frame. Returns the serialised reply, or `None`
    /// when the frame was a notification.
    pub async fn process(&self, raw: &str, session_id: Option<&str>) -> Option<String> {
        let envelope: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                let error = Error::Parse(e.to_string());
                return serialise(JsonRpcResponse::error(
                    None,
                    error.jsonrpc_code(),
                    error.to_string(),
                ));
            }
        };
        self.process_value(envelope, session_id).await
    }

    /// Process an already-parsed JSON-RPC envelope.
    pub async fn process_value(&self, envelope: Value, session_id: Option<&str>) -> Option<String> {
        let id: Option<RequestId> = envelope
            .get("id")
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        let method = match envelope.get("method").and_then(Value::as_str) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => {
                return serialise(JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_REQUEST,
                    "Invalid request: method is required",
                ));
            }
        };
        let params = envelope.get("params").cloned();

        debug!("Dispatching {method} (id: {id:?})");

        let Some(manager) = self.registry.lookup(&method) else {
            return serialise(JsonRpcResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method [{method}] not found"),
            ));
        };

        let ctx = RequestContext::new(
            session_id.map(String::from),
            id.clone(),
            self.cancelled.clone(),
        );

        match manager.execute(&method, params, &ctx).await {
            // A handler with no value means a notification: no reply. A
            // value for a request without an id is likewise swallowed.
            Ok(None) => None,
            Ok(Some(_)) if id.is_none() => None,
            Ok(Some(result)) => serialise(JsonRpcResponse::success(id, result)),
            Err(e) => serialise(JsonRpcResponse::error(id, e.jsonrpc_code(), e.to_string())),
        }
    }
}

fn serialise(response: JsonRpcResponse) -> Option<String> {
    match serde_json::to_string(&response) {
        Ok(s) => Some(s),
        Err(e) => {
            error!("Failed to serialise response: {e}");
            None
        }
    }
}
