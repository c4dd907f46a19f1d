//! Core capability manager: session establishment, liveness, and
//! client-side lifecycle notifications.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::{EventBus, EVENT_CANCELLED};
use crate::mcp::protocol::{
    is_supported_protocol_version, CompletionsCapability, InitializeResult, LoggingCapability,
    PromptsCapability, RequestId, ResourcesCapability, ServerCapabilities, ServerInfo, SessionId,
    ToolsCapability, PROTOCOL_VERSION_LATEST,
};
use crate::mcp::{CapabilityManager, RequestContext};

/// Handles `initialize`, `ping`, and the client lifecycle notifications.
pub struct CoreManager {
    server_name: String,
    server_version: String,
    bus: Arc<EventBus>,
}

impl CoreManager {
    pub fn new(
        server_name: impl Into<String>,
        server_version: impl Into<String>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            server_version: server_version.into(),
            bus,
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value> {
        #[derive(serde::Deserialize, Default)]
        #[serde(rename_all = "camelCase")]
        struct InitializeParams {
            #[serde(default)]
            protocol_version: Option<String>,
            #[serde(default)]
            client_info: Option<Value>,
        }

        let params: InitializeParams = params
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();

        if let Some(ref client) = params.client_info {
            debug!("Client info: {client}");
        }

        // Echo a supported requested version; otherwise answer with ours.
        let protocol_version = match params.protocol_version.as_deref() {
            Some(v) if is_supported_protocol_version(v) => v.to_string(),
            _ => PROTOCOL_VERSION_LATEST.to_string(),
        };

        let session_id = SessionId::generate();
        info!("Session initialised: {session_id} (protocol {protocol_version})");

        let result = InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: true }),
                resources: Some(ResourcesCapability {
                    subscribe: true,
                    list_changed: true,
                }),
                prompts: Some(PromptsCapability { list_changed: true }),
                logging: Some(LoggingCapability {}),
                completions: Some(CompletionsCapability {}),
            },
            session_id,
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: self.server_version.clone(),
            },
        };

        Ok(serde_json::to_value(result)?)
    }

    fn handle_cancelled(&self, params: Option<Value>, ctx: &RequestContext) -> Result<()> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CancelledParams {
            request_id: RequestId,
            #[serde(default)]
            reason: Option<String>,
        }

        let Some(raw) = params else {
            return Ok(());
        };
        let Ok(cancel) = serde_json::from_value::<CancelledParams>(raw.clone()) else {
            debug!("Ignoring malformed cancellation: {raw}");
            return Ok(());
        };

        info!(
            "Request {} cancelled{}",
            cancel.request_id,
            cancel
                .reason
                .as_deref()
                .map(|r| format!(": {r}"))
                .unwrap_or_default()
        );
        ctx.cancellations().cancel(cancel.request_id, cancel.reason);

        // Republish for local observers (the transports forward it onward).
        self.bus.publish(EVENT_CANCELLED, raw);
        Ok(())
    }
}

#[async_trait]
impl CapabilityManager for CoreManager {
    fn name(&self) -> &'static str {
        "core"
    }

    fn claims(&self, method: &str) -> bool {
        matches!(
            method,
            "initialize" | "ping" | "notifications/initialized" | "notifications/cancelled"
        )
    }

    async fn execute(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: &RequestContext,
    ) -> Result<Option<Value>> {
        match method {
            "initialize" => self.handle_initialize(params).map(Some),
            "ping" => Ok(Some(json!({}))),
            "notifications/initialized" => {
                info!("Client initialised");
                Ok(None)
            }
            "notifications/cancelled" => {
                self.handle_cancelled(params, ctx)?;
                Ok(None)
            }
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::CancellationRegistry;

    fn test_ctx() -> (RequestContext, Arc<CancellationRegistry>) {
        let cancelled = Arc::new(CancellationRegistry::new());
        (
            RequestContext::new(None, Some(RequestId::Number(1)), cancelled.clone()),
            cancelled,
        )
    }

    fn manager() -> CoreManager {
        CoreManager::new("mcp-relay", "0.4.1", Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn test_initialize_shape() {
        let (ctx, _) = test_ctx();
        let result = manager()
            .execute(
                "initialize",
                Some(json!({
                    "protocolVersion": "2025-06-18",
                    "clientInfo": {"name": "t", "version": "1"}
                })),
                &ctx,
            )
            .await
            .unwrap()
            .unwrap();

        let session_id = result["sessionId"].as_str().unwrap();
        assert_eq!(session_id.len(), 32);
        assert!(session_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(result["protocolVersion"], "2025-06-18");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
        assert_eq!(result["capabilities"]["resources"]["subscribe"], true);
        assert_eq!(result["capabilities"]["prompts"]["listChanged"], true);
        assert!(result["capabilities"]["logging"].is_object());
        assert!(result["capabilities"]["completions"].is_object());
        assert_eq!(result["serverInfo"]["name"], "mcp-relay");
    }

    #[tokio::test]
    async fn test_initialize_negotiates_older_version() {
        let (ctx, _) = test_ctx();
        let result = manager()
            .execute(
                "initialize",
                Some(json!({"protocolVersion": "2025-03-26"})),
                &ctx,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
    }

    #[tokio::test]
    async fn test_initialize_unknown_version_answers_latest() {
        let (ctx, _) = test_ctx();
        let result = manager()
            .execute(
                "initialize",
                Some(json!({"protocolVersion": "2024-11-05"})),
                &ctx,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION_LATEST);
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let (ctx, _) = test_ctx();
        let m = manager();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let result = m.execute("initialize", None, &ctx).await.unwrap().unwrap();
            assert!(seen.insert(result["sessionId"].as_str().unwrap().to_string()));
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let (ctx, _) = test_ctx();
        let result = manager().execute("ping", None, &ctx).await.unwrap();
        assert_eq!(result, Some(json!({})));
    }

    #[tokio::test]
    async fn test_initialized_notification_is_silent() {
        let (ctx, _) = test_ctx();
        let result = manager()
            .execute("notifications/initialized", None, &ctx)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_records_and_republishes() {
        let bus = Arc::new(EventBus::new());
        let m = CoreManager::new("mcp-relay", "0.4.1", bus.clone());
        let (ctx, cancelled) = test_ctx();

        let result = m
            .execute(
                "notifications/cancelled",
                Some(json!({"requestId": 42, "reason": "timeout"})),
                &ctx,
            )
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(cancelled.is_cancelled(&RequestId::Number(42)));
        assert_eq!(
            cancelled.reason(&RequestId::Number(42)),
            Some("timeout".to_string())
        );
        // Republished on the bus; no subscriber, so it queues.
        assert_eq!(bus.pending_count(EVENT_CANCELLED), 1);
    }

    #[tokio::test]
    async fn test_cancelled_accepts_string_ids() {
        let (ctx, cancelled) = test_ctx();
        manager()
            .execute(
                "notifications/cancelled",
                Some(json!({"requestId": "req-9"})),
                &ctx,
            )
            .await
            .unwrap();
        assert!(cancelled.is_cancelled(&RequestId::String("req-9".to_string())));
    }

    #[test]
    fn test_claims() {
        let m = manager();
        assert!(m.claims("initialize"));
        assert!(m.claims("ping"));
        assert!(m.claims("notifications/initialized"));
        assert!(m.claims("notifications/cancelled"));
        assert!(!m.claims("tools/list"));
    }
}
