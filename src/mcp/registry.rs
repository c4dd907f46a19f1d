//! Capability manager registry: first-match dispatch of method strings.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::mcp::CapabilityManager;

/// Ordered collection of capability managers.
///
/// Lookup walks the managers in registration order and returns the first
/// whose `claims` accepts the method. Method collisions are not errors; the
/// first-registered manager wins silently.
#[derive(Default)]
pub struct CapabilityRegistry {
    managers: Vec<Arc<dyn CapabilityManager>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager. Registering the identity-same instance twice is
    /// a no-op.
    pub fn register(&mut self, manager: Arc<dyn CapabilityManager>) {
        if self.managers.iter().any(|m| Arc::ptr_eq(m, &manager)) {
            warn!("Manager {} already registered, ignoring", manager.name());
            return;
        }
        debug!("Registered capability manager: {}", manager.name());
        self.managers.push(manager);
    }

    /// Find the manager claiming a method, if any.
    pub fn lookup(&self, method: &str) -> Option<Arc<dyn CapabilityManager>> {
        self.managers.iter().find(|m| m.claims(method)).cloned()
    }

    pub fn manager_count(&self) -> usize {
        self.managers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::mcp::RequestContext;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct FixedManager {
        name: &'static str,
        methods: Vec<&'static str>,
    }

    #[async_trait]
    impl CapabilityManager for FixedManager {
        fn name(&self) -> &'static str {
            self.name
        }

        fn claims(&self, method: &str) -> bool {
            self.methods.contains(&method)
        }

        async fn execute(
            &self,
            _method: &str,
            _params: Option<Value>,
            _ctx: &RequestContext,
        ) -> Result<Option<Value>> {
            Ok(Some(json!({ "from": self.name })))
        }
    }

    #[test]
    fn test_lookup_by_claim() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(FixedManager {
            name: "tools",
            methods: vec!["tools/list", "tools/call"],
        }));
        registry.register(Arc::new(FixedManager {
            name: "prompts",
            methods: vec!["prompts/list"],
        }));

        assert_eq!(registry.lookup("tools/call").unwrap().name(), "tools");
        assert_eq!(registry.lookup("prompts/list").unwrap().name(), "prompts");
        assert!(registry.lookup("resources/list").is_none());
    }

    #[test]
    fn test_first_registered_wins_on_collision() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(FixedManager {
            name: "first",
            methods: vec!["shared/method"],
        }));
        registry.register(Arc::new(FixedManager {
            name: "second",
            methods: vec!["shared/method"],
        }));

        assert_eq!(registry.manager_count(), 2);
        assert_eq!(registry.lookup("shared/method").unwrap().name(), "first");
    }

    #[test]
    fn test_double_registration_is_noop() {
        let mut registry = CapabilityRegistry::new();
        let manager: Arc<dyn CapabilityManager> = Arc::new(FixedManager {
            name: "tools",
            methods: vec!["tools/list"],
        });

        registry.register(manager.clone());
        registry.register(manager);
        assert_eq!(registry.manager_count(), 1);
    }
}
