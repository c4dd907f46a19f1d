//! Completion capability manager.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::mcp::{CapabilityManager, RequestContext};

/// Largest number of values returned in a single completion reply.
pub const MAX_COMPLETION_VALUES: usize = 100;

/// What the completion request refers to.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum CompletionRef {
    /// `ref/prompt`: completing an argument of a named prompt.
    #[serde(rename = "ref/prompt")]
    Prompt {
        #[serde(default)]
        name: Option<String>,
    },
    /// `ref/resource`: completing within a resource URI (template).
    #[serde(rename = "ref/resource")]
    Resource {
        #[serde(default)]
        uri: Option<String>,
    },
}

/// The argument being completed.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionArgument {
    pub name: String,
    pub value: String,
}

/// Pluggable completion source. Receives the reference, the argument under
/// completion, and the raw request context value; returns candidate values.
/// The manager applies the reply cap.
pub type CompletionProvider =
    Arc<dyn Fn(&CompletionRef, &CompletionArgument, Option<&Value>) -> Vec<String> + Send + Sync>;

/// Claims `completion/complete`.
pub struct CompletionManager {
    provider: Mutex<Option<CompletionProvider>>,
}

impl CompletionManager {
    pub fn new() -> Self {
        Self {
            provider: Mutex::new(None),
        }
    }

    /// Install the completion provider, replacing any previous one.
    pub fn set_provider(&self, provider: CompletionProvider) {
        *self.provider.lock().expect("provider lock poisoned") = Some(provider);
    }

    fn handle_complete(&self, params: Option<Value>) -> Result<Value> {
        #[derive(Deserialize)]
        struct CompleteParams {
            r#ref: Value,
            argument: CompletionArgument,
            #[serde(default)]
            context: Option<Value>,
        }

        let params: CompleteParams = params
            .ok_or_else(|| Error::InvalidParams("missing params".to_string()))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| Error::InvalidParams(e.to_string()))
            })?;

        // An unknown ref type is an error, not an empty reply.
        let reference: CompletionRef =
            serde_json::from_value(params.r#ref.clone()).map_err(|_| {
                let kind = params
                    .r#ref
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("<missing>");
                Error::InvalidCompletionRef(kind.to_string())
            })?;

        let provider = self.provider.lock().expect("provider lock poisoned").clone();
        let produced = match provider {
            Some(provider) => provider(&reference, &params.argument, params.context.as_ref()),
            None => Vec::new(),
        };

        let total = produced.len();
        let has_more = total > MAX_COMPLETION_VALUES;
        let values: Vec<String> = produced.into_iter().take(MAX_COMPLETION_VALUES).collect();

        Ok(json!({
            "completion": {
                "values": values,
                "total": total,
                "hasMore": has_more,
            }
        }))
    }
}

impl Default for CompletionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityManager for CompletionManager {
    fn name(&self) -> &'static str {
        "completion"
    }

    fn claims(&self, method: &str) -> bool {
        method == "completion/complete"
    }

    async fn execute(
        &self,
        method: &str,
        params: Option<Value>,
        _ctx: &RequestContext,
    ) -> Result<Option<Value>> {
        match method {
            "completion/complete" => self.handle_complete(params).map(Some),
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }
}
