//! Built-in tools, resources, and prompts.
//!
//! Small example registrations so a fresh server has something to list and
//! call; real deployments register their own handlers alongside these.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::mcp::completion::{CompletionManager, CompletionRef};
use crate::mcp::prompts::{
    PromptArgument, PromptDef, PromptHandler, PromptMessage, PromptsManager,
};
use crate::mcp::protocol::{ContentBlock, EmbeddedResource};
use crate::mcp::resources::{
    ResourceContent, ResourceDef, ResourceHandler, ResourceTemplateDef, ResourcesManager,
};
use crate::mcp::tools::{ToolDef, ToolHandler, ToolOutput, ToolsManager};

// ===== Tools =====

/// Echoes the `message` argument back, prefixed.
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "echo",
            "Echo a message back",
            json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "Message to echo" }
                },
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

/// Reports the current UTC time.
pub struct TimeTool;

#[async_trait]
impl ToolHandler for TimeTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "time",
            "Current UTC time in RFC 3339 format",
            json!({ "type": "object", "properties": {} }),
        )
    }

    async fn call(&self, _arguments: Value) -> Result<ToolOutput> {
        Ok(ToolOutput::text(Utc::now().to_rfc3339()))
    }
}

/// Sleeps for `ms` milliseconds before answering. Handy for exercising
/// cancellation and shutdown draining against a live server.
pub struct SleepTool;

#[async_trait]
impl ToolHandler for SleepTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "sleep",
            "Wait the given number of milliseconds, then return",
            json!({
                "type": "object",
                "properties": {
                    "ms": { "type": "integer", "minimum": 0, "maximum": 60000 }
                },
                "required": ["ms"]
            }),
        )
    }

    async fn call(&self, arguments: Value) -> Result<ToolOutput> {
        let ms = arguments
            .get("ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::InvalidParams("ms is required".to_string()))?
            .min(60_000);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ToolOutput::text(format!("Slept {ms} ms")))
    }
}

// ===== Resources =====

const ABOUT_TEXT: &str = "mcp-relay: a dual-transport MCP server.\n\
Speaks JSON-RPC 2.0 over stdio and Streamable HTTP with SSE push.\n";

// 1x1 transparent PNG.
const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

struct AboutResource;

#[async_trait]
impl ResourceHandler for AboutResource {
    fn definition(&self) -> ResourceDef {
        ResourceDef {
            uri: "mcp://relay/about".to_string(),
            name: "about".to_string(),
            description: Some("What this server is".to_string()),
            mime_type: Some("text/plain".to_string()),
        }
    }

    async fn read(&self) -> Result<ResourceContent> {
        Ok(ResourceContent::Text(ABOUT_TEXT.to_string()))
    }
}

struct PixelResource;

#[async_trait]
impl ResourceHandler for PixelResource {
    fn definition(&self) -> ResourceDef {
        ResourceDef {
            uri: "mcp://relay/pixel.png".to_string(),
            name: "pixel".to_string(),
            description: Some("A one-pixel PNG".to_string()),
            mime_type: Some("image/png".to_string()),
        }
    }

    async fn read(&self) -> Result<ResourceContent> {
        Ok(ResourceContent::Blob(PIXEL_PNG.to_vec()))
    }
}

// ===== Prompts =====

struct SummarizePrompt;

#[async_trait]
impl PromptHandler for SummarizePrompt {
    fn definition(&self) -> PromptDef {
        PromptDef {
            name: "summarize".to_string(),
            description: Some("Summarise a piece of text".to_string()),
            arguments: vec![
                PromptArgument {
                    name: "text".to_string(),
                    description: Some("Text to summarise".to_string()),
                    required: true,
                },
                PromptArgument {
                    name: "length".to_string(),
                    description: Some("Target length, e.g. 'one sentence'".to_string()),
                    required: false,
                },
            ],
        }
    }

    async fn build(&self, arguments: Value) -> Result<Vec<PromptMessage>> {
        let text = arguments
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidParams("text is required".to_string()))?;
        let length = arguments
            .get("length")
            .and_then(Value::as_str)
            .unwrap_or("a short paragraph");
        Ok(vec![PromptMessage::user(vec![ContentBlock::text(format!(
            "Summarise the following in {length}:\n\n{text}"
        ))])])
    }
}

struct ExplainServerPrompt;

#[async_trait]
impl PromptHandler for ExplainServerPrompt {
    fn definition(&self) -> PromptDef {
        PromptDef {
            name: "explain_server".to_string(),
            description: Some("Explain this server using its about resource".to_string()),
            arguments: Vec::new(),
        }
    }

    async fn build(&self, _arguments: Value) -> Result<Vec<PromptMessage>> {
        Ok(vec![PromptMessage::user(vec![
            ContentBlock::text("Explain what this server does, based on:"),
            ContentBlock::Resource {
                resource: EmbeddedResource {
                    uri: "mcp://relay/about".to_string(),
                    mime_type: Some("text/plain".to_string()),
                    text: Some(ABOUT_TEXT.to_string()),
                },
            },
        ])])
    }
}

/// Register every built-in handler and wire the default completion
/// provider (prompt names and resource URIs by prefix).
pub fn register_builtins(
    tools: &ToolsManager,
    resources: &Arc<ResourcesManager>,
    prompts: &Arc<PromptsManager>,
    completion: &CompletionManager,
) {
    tools.register(Arc::new(EchoTool));
    tools.register(Arc::new(TimeTool));
    tools.register(Arc::new(SleepTool));

    resources.register(Arc::new(AboutResource));
    resources.register(Arc::new(PixelResource));
    resources.register_template(ResourceTemplateDef {
        uri_template: "mcp://relay/echo/{message}".to_string(),
        name: "echoed message".to_string(),
        description: Some("A message echoed back as a resource".to_string()),
        mime_type: Some("text/plain".to_string()),
    });

    prompts.register(Arc::new(SummarizePrompt));
    prompts.register(Arc::new(ExplainServerPrompt));

    let prompts = prompts.clone();
    let resources = resources.clone();
    completion.set_provider(Arc::new(move |reference, argument, _context| {
        match reference {
            CompletionRef::Prompt { .. } => prompts
                .list()
                .into_iter()
                .map(|p| p.name)
                .filter(|name| name.starts_with(&argument.value))
                .collect(),
            // Full registered list; the manager caps the reply.
            CompletionRef::Resource { .. } => resources
                .list()
                .into_iter()
                .map(|r| r.uri)
                .filter(|uri| uri.starts_with(&argument.value))
                .collect(),
        }
    }));
}
