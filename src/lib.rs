//! mcp-relay: a dual-transport Model Context Protocol server.
//!
//! A JSON-RPC 2.0 endpoint exposing tool invocation, resource reading,
//! prompt templates, logging control, and argument completion over two
//! transports: newline-delimited stdio and Streamable HTTP with SSE push.
//!
//! # Architecture
//!
//! - **`mcp`**: the protocol engine. Envelope types, capability managers
//!   (core/tools/resources/prompts/logging/completion), the dispatch
//!   registry, and the request processor both transports share.
//! - **`events`**: the pub/sub bus decoupling managers from transports;
//!   events published before a transport attaches are queued and drained on
//!   subscribe.
//! - **`transport`**: shared in-flight tracking and the stdio transport.
//! - **`http`**: the Streamable HTTP transport. Session table, SSE
//!   connection registry, keepalive, graceful shutdown.
//! - **`builtins`**: example tools/resources/prompts registered at startup.

pub mod builtins;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod mcp;
pub mod transport;

pub use error::{Error, Result};

use std::sync::Arc;

use events::EventBus;
use mcp::completion::CompletionManager;
use mcp::core::CoreManager;
use mcp::logging::LoggingManager;
use mcp::processor::RequestProcessor;
use mcp::prompts::PromptsManager;
use mcp::registry::CapabilityRegistry;
use mcp::resources::ResourcesManager;
use mcp::tools::ToolsManager;
use mcp::CancellationRegistry;

/// Server name reported in `serverInfo`.
pub const SERVER_NAME: &str = "mcp-relay";

/// Server version reported in `serverInfo`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A fully wired protocol engine: every manager registered, built-ins
/// installed, ready to hand to a transport.
pub struct Engine {
    pub bus: Arc<EventBus>,
    pub processor: Arc<RequestProcessor>,
    pub tools: Arc<ToolsManager>,
    pub resources: Arc<ResourcesManager>,
    pub prompts: Arc<PromptsManager>,
    pub logging: Arc<LoggingManager>,
    pub completion: Arc<CompletionManager>,
}

impl Engine {
    /// Assemble the engine with the built-in registrations.
    pub fn new() -> Self {
        Self::with_builtins(true)
    }

    /// Assemble the engine, optionally skipping built-ins (tests register
    /// their own fixtures).
    pub fn with_builtins(builtins: bool) -> Self {
        let bus = Arc::new(EventBus::new());
        let cancelled = Arc::new(CancellationRegistry::new());

        let tools = Arc::new(ToolsManager::new(bus.clone()));
        let resources = Arc::new(ResourcesManager::new(bus.clone()));
        let prompts = Arc::new(PromptsManager::new(bus.clone()));
        let logging = Arc::new(LoggingManager::new(bus.clone()));
        let completion = Arc::new(CompletionManager::new());

        if builtins {
            builtins::register_builtins(&tools, &resources, &prompts, &completion);
        }

        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(CoreManager::new(
            SERVER_NAME,
            SERVER_VERSION,
            bus.clone(),
        )));
        registry.register(tools.clone());
        registry.register(resources.clone());
        registry.register(prompts.clone());
        registry.register(logging.clone());
        registry.register(completion.clone());

        let processor = Arc::new(RequestProcessor::new(Arc::new(registry), cancelled));

        Self {
            bus,
            processor,
            tools,
            resources,
            prompts,
            logging,
            completion,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_engine_dispatches_every_namespace() {
        let engine = Engine::new();
        for method in [
            "ping",
            "tools/list",
            "resources/list",
            "resources/templates/list",
            "prompts/list",
        ] {
            let frame = format!(r#"{{"jsonrpc":"2.0","id":1,"method":"{method}"}}"#);
            let reply = engine.processor.process(&frame, None).await.unwrap();
            assert!(reply.contains("\"result\""), "no result for {method}: {reply}");
        }
    }

    #[tokio::test]
    async fn test_engine_without_builtins_is_empty() {
        let engine = Engine::with_builtins(false);
        assert_eq!(engine.tools.tool_count(), 0);
        assert_eq!(engine.resources.resource_count(), 0);
        assert_eq!(engine.prompts.prompt_count(), 0);
    }
}
