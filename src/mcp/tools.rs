//! Tools capability manager.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::events::{EventBus, EVENT_TOOLS_LIST_CHANGED};
use crate::mcp::protocol::ContentBlock;
use crate::mcp::{CapabilityManager, RequestContext};

/// Tool definition advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Optional human-readable title for display purposes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ToolDef {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Result envelope returned by `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    /// A successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    /// An error result carrying the message as text so the model sees it.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: true,
        }
    }
}

/// Handler for a single tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The tool definition.
    fn definition(&self) -> ToolDef;

    /// Execute the tool. Arguments arrive as the raw JSON the client sent;
    /// the handler does its own extraction.
    async fn call(&self, arguments: Value) -> Result<ToolOutput>;
}

/// Claims `tools/list` and `tools/call`.
pub struct ToolsManager {
    bus: Arc<EventBus>,
    tools: Mutex<Vec<Arc<dyn ToolHandler>>>,
}

impl ToolsManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            tools: Mutex::new(Vec::new()),
        }
    }

    /// Register a tool. Re-registering an existing name is a silent no-op
    /// and does not publish a change event.
    pub fn register(&self, tool: Arc<dyn ToolHandler>) {
        let name = tool.definition().name;
        {
            let mut tools = self.tools.lock().expect("tools lock poisoned");
            if tools.iter().any(|t| t.definition().name == name) {
                debug!("Tool {name} already registered, ignoring");
                return;
            }
            tools.push(tool);
        }
        debug!("Registered tool: {name}");
        self.bus.publish(EVENT_TOOLS_LIST_CHANGED, json!({}));
    }

    /// Remove a tool by name. Unknown names are ignored.
    pub fn unregister(&self, name: &str) {
        let removed = {
            let mut tools = self.tools.lock().expect("tools lock poisoned");
            let before = tools.len();
            tools.retain(|t| t.definition().name != name);
            tools.len() != before
        };
        if removed {
            debug!("Unregistered tool: {name}");
            self.bus.publish(EVENT_TOOLS_LIST_CHANGED, json!({}));
        }
    }

    /// Tool definitions in registration order.
    pub fn list(&self) -> Vec<ToolDef> {
        self.tools
            .lock()
            .expect("tools lock poisoned")
            .iter()
            .map(|t| t.definition())
            .collect()
    }

    fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools
            .lock()
            .expect("tools lock poisoned")
            .iter()
            .find(|t| t.definition().name == name)
            .cloned()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.lock().expect("tools lock poisoned").len()
    }

    async fn handle_call(&self, params: Option<Value>) -> Result<Value> {
        #[derive(Deserialize)]
        struct CallParams {
            name: String,
            #[serde(default)]
            arguments: Option<Value>,
        }

        let params: CallParams = params
            .ok_or_else(|| Error::InvalidParams("missing params".to_string()))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| Error::InvalidParams(e.to_string()))
            })?;

        let tool = self
            .get(&params.name)
            .ok_or_else(|| Error::ToolNotFound(params.name.clone()))?;

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let output = match tool.call(arguments).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Tool {} failed: {e}", params.name);
                ToolOutput::error(e.to_string())
            }
        };
        Ok(serde_json::to_value(output)?)
    }
}

#[async_trait]
impl CapabilityManager for ToolsManager {
    fn name(&self) -> &'static str {
        "tools"
    }

    fn claims(&self, method: &str) -> bool {
        matches!(method, "tools/list" | "tools/call")
    }

    async fn execute(
        &self,
        method: &str,
        params: Option<Value>,
        _ctx: &RequestContext,
    ) -> Result<Option<Value>> {
        match method {
            "tools/list" => Ok(Some(json!({ "tools": self.list() }))),
            "tools/call" => self.handle_call(params).await.map(Some),
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::CancellationRegistry;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new(
                "echo",
                "Echo the message back",
                json!({
                    "type": "object",
                    "properties": { "message": { "type": "string" } },
                    "required": ["message"]
                }),
            )
        }

        async fn call(&self, arguments: Value) -> Result<ToolOutput> {
            let message = arguments
                .get("message")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidParams("message is required".to_string()))?;
            Ok(ToolOutput::text(format!("Echo: {message}")))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new("broken", "Always fails", json!({"type": "object"}))
        }

        async fn call(&self, _arguments: Value) -> Result<ToolOutput> {
            Err(Error::Internal("boom".to_string()))
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(None, None, Arc::new(CancellationRegistry::new()))
    }

    fn manager() -> ToolsManager {
        ToolsManager::new(Arc::new(EventBus::new()))
    }

    #[tokio::test]
    async fn test_list_in_registration_order() {
        let m = manager();
        m.register(Arc::new(FailingTool));
        m.register(Arc::new(EchoTool));

        let result = m.execute("tools/list", None, &ctx()).await.unwrap().unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "broken");
        assert_eq!(tools[1]["name"], "echo");
        assert!(tools[1]["inputSchema"]["properties"]["message"].is_object());
    }

    #[tokio::test]
    async fn test_call_echo() {
        let m = manager();
        m.register(Arc::new(EchoTool));

        let result = m
            .execute(
                "tools/call",
                Some(json!({"name": "echo", "arguments": {"message": "hi"}})),
                &ctx(),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["content"], json!([{"type": "text", "text": "Echo: hi"}]));
        assert_eq!(result["isError"], false);
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let m = manager();
        let err = m
            .execute("tools/call", Some(json!({"name": "nope"})), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Tool not found: nope");
        assert_eq!(err.jsonrpc_code(), -32603);
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_error_result() {
        let m = manager();
        m.register(Arc::new(FailingTool));

        let result = m
            .execute("tools/call", Some(json!({"name": "broken"})), &ctx())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("boom"));
    }

    #[test]
    fn test_register_publishes_and_is_idempotent() {
        let bus = Arc::new(EventBus::new());
        let m = ToolsManager::new(bus.clone());

        m.register(Arc::new(EchoTool));
        assert_eq!(bus.pending_count(EVENT_TOOLS_LIST_CHANGED), 1);

        // Same name again: no-op, no event.
        m.register(Arc::new(EchoTool));
        assert_eq!(m.tool_count(), 1);
        assert_eq!(bus.pending_count(EVENT_TOOLS_LIST_CHANGED), 1);

        m.unregister("echo");
        assert_eq!(m.tool_count(), 0);
        assert_eq!(bus.pending_count(EVENT_TOOLS_LIST_CHANGED), 2);

        // Unregistering an unknown tool publishes nothing.
        m.unregister("echo");
        assert_eq!(bus.pending_count(EVENT_TOOLS_LIST_CHANGED), 2);
    }
}
