//! Prompts capability manager.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::{EventBus, EVENT_PROMPTS_LIST_CHANGED};
use crate::mcp::protocol::ContentBlock;
use crate::mcp::{CapabilityManager, RequestContext};

/// A prompt argument declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Prompt descriptor advertised by `prompts/list`. Arguments appear in
/// declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message produced by a prompt builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl PromptMessage {
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }
}

/// Handler for a single prompt template.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// The prompt descriptor.
    fn definition(&self) -> PromptDef;

    /// Build the message sequence from the client-supplied arguments
    /// (free-form JSON; the handler does its own extraction).
    async fn build(&self, arguments: Value) -> Result<Vec<PromptMessage>>;
}

/// Claims `prompts/list` and `prompts/get`.
pub struct PromptsManager {
    bus: Arc<EventBus>,
    prompts: Mutex<Vec<Arc<dyn PromptHandler>>>,
}

impl PromptsManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Register a prompt. Re-registering an existing name is a silent
    /// no-op and does not publish a change event.
    pub fn register(&self, prompt: Arc<dyn PromptHandler>) {
        let name = prompt.definition().name;
        {
            let mut prompts = self.prompts.lock().expect("prompts lock poisoned");
            if prompts.iter().any(|p| p.definition().name == name) {
                debug!("Prompt {name} already registered, ignoring");
                return;
            }
            prompts.push(prompt);
        }
        debug!("Registered prompt: {name}");
        self.bus.publish(EVENT_PROMPTS_LIST_CHANGED, json!({}));
    }

    /// Remove a prompt by name. Unknown names are ignored.
    pub fn unregister(&self, name: &str) {
        let removed = {
            let mut prompts = self.prompts.lock().expect("prompts lock poisoned");
            let before = prompts.len();
            prompts.retain(|p| p.definition().name != name);
            prompts.len() != before
        };
        if removed {
            self.bus.publish(EVENT_PROMPTS_LIST_CHANGED, json!({}));
        }
    }

    /// Prompt descriptors in registration order.
    pub fn list(&self) -> Vec<PromptDef> {
        self.prompts
            .lock()
            .expect("prompts lock poisoned")
            .iter()
            .map(|p| p.definition())
            .collect()
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().expect("prompts lock poisoned").len()
    }

    async fn handle_get(&self, params: Option<Value>) -> Result<Value> {
        #[derive(Deserialize)]
        struct GetParams {
            name: String,
            #[serde(default)]
            arguments: Option<Value>,
        }

        let params: GetParams = params
            .ok_or_else(|| Error::InvalidParams("missing params".to_string()))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| Error::InvalidParams(e.to_string()))
            })?;

        let prompt = {
            let prompts = self.prompts.lock().expect("prompts lock poisoned");
            prompts
                .iter()
                .find(|p| p.definition().name == params.name)
                .cloned()
        }
        .ok_or_else(|| Error::PromptNotFound(params.name.clone()))?;

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let messages = prompt.build(arguments).await?;

        let mut result = json!({ "messages": messages });
        if let Some(description) = prompt.definition().description {
            result["description"] = json!(description);
        }
        Ok(result)
    }
}

#[async_trait]
impl CapabilityManager for PromptsManager {
    fn name(&self) -> &'static str {
        "prompts"
    }

    fn claims(&self, method: &str) -> bool {
        matches!(method, "prompts/list" | "prompts/get")
    }

    async fn execute(
        &self,
        method: &str,
        params: Option<Value>,
        _ctx: &RequestContext,
    ) -> Result<Option<Value>> {
        match method {
            "prompts/list" => Ok(Some(json!({ "prompts": self.list() }))),
            "prompts/get" => self.handle_get(params).await.map(Some),
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }
}
