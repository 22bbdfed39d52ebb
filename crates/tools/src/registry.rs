//! Declarative tool catalog.
//!
//! Tools are registered during startup with their descriptor and bound
//! handler, then the registry is sealed; registration after sealing is a
//! bug and returns an error. Parameter schemas are compiled once here so
//! the gate validates against pre-compiled schemas.

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::JSONSchema;
use parking_lot::RwLock;

use rf_domain::tool::ToolDescriptor;
use rf_domain::{Error, Result};

use crate::handler::ToolHandler;

pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub handler: Arc<dyn ToolHandler>,
    pub(crate) schema: JSONSchema,
}

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
    sealed: RwLock<bool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            sealed: RwLock::new(false),
        }
    }

    /// Register a tool. Fails after [`Self::seal`] or on duplicate names.
    pub fn register(&self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) -> Result<()> {
        if *self.sealed.read() {
            return Err(Error::Config(format!(
                "tool registry is sealed, cannot register {}",
                descriptor.name
            )));
        }
        let schema = JSONSchema::compile(&descriptor.parameters).map_err(|e| {
            Error::Config(format!("tool {}: invalid parameter schema: {e}", descriptor.name))
        })?;

        let mut tools = self.tools.write();
        if tools.contains_key(&descriptor.name) {
            return Err(Error::Config(format!(
                "tool {} is already registered",
                descriptor.name
            )));
        }
        tracing::info!(tool = %descriptor.name, risk = ?descriptor.risk, "registered tool");
        tools.insert(
            descriptor.name.clone(),
            Arc::new(RegisteredTool { descriptor, handler, schema }),
        );
        Ok(())
    }

    /// Freeze the catalog. Called once after startup registration.
    pub fn seal(&self) {
        *self.sealed.write() = true;
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.read().get(name).cloned()
    }

    /// Descriptors sorted by name, for introspection.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let tools = self.tools.read();
        let mut descriptors: Vec<ToolDescriptor> =
            tools.values().map(|t| t.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{InvocationCtx, ToolOutput};
    use rf_domain::tool::{RiskTier, ToolScope};

    struct NoopHandler;

    #[async_trait::async_trait]
    impl ToolHandler for NoopHandler {
        async fn invoke(&self, _params: serde_json::Value, _ctx: &InvocationCtx) -> rf_domain::Result<ToolOutput> {
            Ok(ToolOutput::read_only(serde_json::json!({})))
        }
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            version: "1.0".into(),
            description: "test tool".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "asset": { "type": "string" } },
                "required": ["asset"]
            }),
            result_schema: serde_json::json!({ "type": "object" }),
            risk: RiskTier::Read,
            scope: ToolScope::Asset,
            idempotent: true,
            capabilities: vec![],
            cost_estimate: 0.0,
            timeout_secs: 30,
        }
    }

    #[test]
    fn register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(descriptor("a.read"), Arc::new(NoopHandler)).unwrap();
        assert!(registry.get("a.read").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = ToolRegistry::new();
        registry.register(descriptor("a.read"), Arc::new(NoopHandler)).unwrap();
        let err = registry.register(descriptor("a.read"), Arc::new(NoopHandler)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn sealed_registry_rejects_registration() {
        let registry = ToolRegistry::new();
        registry.seal();
        let err = registry.register(descriptor("late"), Arc::new(NoopHandler)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn invalid_schema_rejected() {
        let registry = ToolRegistry::new();
        let mut bad = descriptor("bad");
        bad.parameters = serde_json::json!({ "type": 42 });
        assert!(registry.register(bad, Arc::new(NoopHandler)).is_err());
    }

    #[test]
    fn list_is_sorted() {
        let registry = ToolRegistry::new();
        registry.register(descriptor("z.last"), Arc::new(NoopHandler)).unwrap();
        registry.register(descriptor("a.first"), Arc::new(NoopHandler)).unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a.first", "z.last"]);
    }
}
