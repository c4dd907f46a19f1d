//! Resources capability manager.
//!
//! Registration-ordered resource list with cursor pagination, RFC 6570
//! template advertisement, and reference-counted update subscriptions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::events::{EventBus, EVENT_RESOURCES_LIST_CHANGED, EVENT_RESOURCES_UPDATED};
use crate::mcp::{CapabilityManager, RequestContext};

/// Default page size for `resources/list`.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Resource descriptor advertised by `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDef {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Resource template descriptor advertised by `resources/templates/list`.
///
/// The template string is opaque RFC 6570 syntax; the server never expands
/// it. Clients expand and then call `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateDef {
    pub uri_template: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Content produced by reading a resource.
#[derive(Debug, Clone)]
pub enum ResourceContent {
    /// UTF-8 text, emitted as `text`.
    Text(String),
    /// Raw bytes, emitted base64-encoded as `blob`.
    Blob(Vec<u8>),
}

/// Handler for a single resource.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// The resource descriptor.
    fn definition(&self) -> ResourceDef;

    /// Produce the current content.
    async fn read(&self) -> Result<ResourceContent>;
}

struct ResourcesInner {
    resources: Vec<Arc<dyn ResourceHandler>>,
    templates: Vec<ResourceTemplateDef>,
    /// Reference-counted subscriptions by URI. Count is always >= 1 while
    /// the entry is present.
    subscriptions: HashMap<String, usize>,
}

/// Claims `resources/list`, `resources/read`, `resources/templates/list`,
/// `resources/subscribe`, and `resources/unsubscribe`.
pub struct ResourcesManager {
    bus: Arc<EventBus>,
    inner: Mutex<ResourcesInner>,
}

impl ResourcesManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            inner: Mutex::new(ResourcesInner {
                resources: Vec::new(),
                templates: Vec::new(),
                subscriptions: HashMap::new(),
            }),
        }
    }

    /// Register a resource. Re-registering an existing URI is a silent
    /// no-op and does not publish a change event.
    pub fn register(&self, resource: Arc<dyn ResourceHandler>) {
        let uri = resource.definition().uri;
        {
            let mut inner = self.inner.lock().expect("resources lock poisoned");
            if inner.resources.iter().any(|r| r.definition().uri == uri) {
                debug!("Resource {uri} already registered, ignoring");
                return;
            }
            inner.resources.push(resource);
        }
        debug!("Registered resource: {uri}");
        self.bus.publish(EVENT_RESOURCES_LIST_CHANGED, json!({}));
    }

    /// Remove a resource by URI. Unknown URIs are ignored.
    pub fn unregister(&self, uri: &str) {
        let removed = {
            let mut inner = self.inner.lock().expect("resources lock poisoned");
            let before = inner.resources.len();
            inner.resources.retain(|r| r.definition().uri != uri);
            inner.resources.len() != before
        };
        if removed {
            debug!("Unregistered resource: {uri}");
            self.bus.publish(EVENT_RESOURCES_LIST_CHANGED, json!({}));
        }
    }

    /// Register a template. Re-registering an existing template string is a
    /// silent no-op.
    pub fn register_template(&self, template: ResourceTemplateDef) {
        let added = {
            let mut inner = self.inner.lock().expect("resources lock poisoned");
            if inner
                .templates
                .iter()
                .any(|t| t.uri_template == template.uri_template)
            {
                false
            } else {
                inner.templates.push(template);
                true
            }
        };
        if added {
            self.bus.publish(EVENT_RESOURCES_LIST_CHANGED, json!({}));
        }
    }

    /// Remove a template by its template string.
    pub fn unregister_template(&self, uri_template: &str) {
        let removed = {
            let mut inner = self.inner.lock().expect("resources lock poisoned");
            let before = inner.templates.len();
            inner.templates.retain(|t| t.uri_template != uri_template);
            inner.templates.len() != before
        };
        if removed {
            self.bus.publish(EVENT_RESOURCES_LIST_CHANGED, json!({}));
        }
    }

    /// Publish `notifications/resources/updated` for a URI, but only while
    /// at least one subscription is active for it.
    pub fn notify_updated(&self, uri: &str) {
        let subscribed = {
            let inner = self.inner.lock().expect("resources lock poisoned");
            inner.subscriptions.contains_key(uri)
        };
        if subscribed {
            self.bus.publish(EVENT_RESOURCES_UPDATED, json!({ "uri": uri }));
        } else {
            trace!("No subscription for {uri}, update suppressed");
        }
    }

    /// Active subscription count for a URI.
    pub fn subscription_count(&self, uri: &str) -> usize {
        let inner = self.inner.lock().expect("resources lock poisoned");
        inner.subscriptions.get(uri).copied().unwrap_or(0)
    }

    pub fn resource_count(&self) -> usize {
        self.inner
            .lock()
            .expect("resources lock poisoned")
            .resources
            .len()
    }

    /// Full descriptor snapshot in registration order (in-process callers;
    /// the wire listing goes through `resources/list` pagination).
    pub fn list(&self) -> Vec<ResourceDef> {
        self.inner
            .lock()
            .expect("resources lock poisoned")
            .resources
            .iter()
            .map(|r| r.definition())
            .collect()
    }

    fn handle_list(&self, params: Option<Value>) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct ListParams {
            #[serde(default)]
            cursor: Option<String>,
            #[serde(default)]
            limit: Option<i64>,
        }

        let params: ListParams = params
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();

        let inner = self.inner.lock().expect("resources lock poisoned");
        let total = inner.resources.len();

        // The cursor is opaque to clients; internally it is a decimal index
        // into the registration-order array. Invalid values clamp.
        let start = params
            .cursor
            .as_deref()
            .filter(|c| !c.is_empty())
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0)
            .min(total);

        let limit = match params.limit {
            Some(n) if n > 0 => n as usize,
            _ => DEFAULT_PAGE_LIMIT,
        };

        let end = start.saturating_add(limit).min(total);
        let page: Vec<ResourceDef> = inner.resources[start..end]
            .iter()
            .map(|r| r.definition())
            .collect();

        let mut result = json!({ "resources": page });
        if end < total {
            result["nextCursor"] = json!(end.to_string());
        }
        Ok(result)
    }

    async fn handle_read(&self, params: Option<Value>) -> Result<Value> {
        let uri = required_uri(params)?;

        let resource = {
            let inner = self.inner.lock().expect("resources lock poisoned");
            inner
                .resources
                .iter()
                .find(|r| r.definition().uri == uri)
                .cloned()
        }
        .ok_or_else(|| Error::ResourceNotFound(uri.clone()))?;

        let def = resource.definition();
        let mut entry = json!({ "uri": def.uri });
        if let Some(mime) = def.mime_type {
            entry["mimeType"] = json!(mime);
        }
        match resource.read().await? {
            ResourceContent::Text(text) => entry["text"] = json!(text),
            ResourceContent::Blob(bytes) => {
                entry["blob"] = json!(BASE64_STANDARD.encode(bytes));
            }
        }

        Ok(json!({ "contents": [entry] }))
    }

    fn handle_templates_list(&self) -> Result<Value> {
        let inner = self.inner.lock().expect("resources lock poisoned");
        Ok(json!({ "resourceTemplates": &inner.templates }))
    }

    fn handle_subscribe(&self, params: Option<Value>) -> Result<Value> {
        let uri = required_uri(params)?;

        let mut inner = self.inner.lock().expect("resources lock poisoned");
        if !inner.resources.iter().any(|r| r.definition().uri == uri) {
            return Err(Error::ResourceNotFound(uri));
        }
        *inner.subscriptions.entry(uri.clone()).or_insert(0) += 1;
        debug!(
            "Subscribed to {uri} (count {})",
            inner.subscriptions[&uri]
        );
        Ok(json!({}))
    }

    fn handle_unsubscribe(&self, params: Option<Value>) -> Result<Value> {
        let uri = required_uri(params)?;

        let mut inner = self.inner.lock().expect("resources lock poisoned");
        if let Some(count) = inner.subscriptions.get_mut(&uri) {
            *count -= 1;
            if *count == 0 {
                inner.subscriptions.remove(&uri);
            }
        }
        // Unsubscribing an unknown URI is a silent success.
        Ok(json!({}))
    }
}

fn required_uri(params: Option<Value>) -> Result<String> {
    params
        .as_ref()
        .and_then(|v| v.get("uri"))
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| Error::InvalidParams("uri is required".to_string()))
}

#[async_trait]
impl CapabilityManager for ResourcesManager {
    fn name(&self) -> &'static str {
        "resources"
    }

    fn claims(&self, method: &str) -> bool {
        matches!(
            method,
            "resources/list"
                | "resources/read"
                | "resources/templates/list"
                | "resources/subscribe"
                | "resources/unsubscribe"
        )
    }

    async fn execute(
        &self,
        method: &str,
        params: Option<Value>,
        _ctx: &RequestContext,
    ) -> Result<Option<Value>> {
        match method {
            "resources/list" => self.handle_list(params).map(Some),
            "resources/read" => self.handle_read(params).await.map(Some),
            "resources/templates/list" => self.handle_templates_list().map(Some),
            "resources/subscribe" => self.handle_subscribe(params).map(Some),
            "resources/unsubscribe" => self.handle_unsubscribe(params).map(Some),
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }
}
