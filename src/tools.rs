//! Tool definitions and dispatch. The agent runtime calls into a
//! `ToolDispatcher` but owns no concrete tool implementations, filesystem,
//! git, and shell tools are out of scope here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Describes a callable tool to a [`crate::provider::Provider`]: name,
/// description, and a JSON-Schema parameter shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Executes a named tool with JSON arguments and returns a JSON (or plain
/// text) result. Implementations own whatever side effects the tool has;
/// the Agent Runtime only knows this interface.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn execute(&self, name: &str, args: Value) -> Result<Value>;
    fn definitions(&self) -> Vec<ToolDefinition>;
}

type ToolFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// In-memory registry pairing [`ToolDefinition`]s with dispatch closures.
/// Enough for the Agent Runtime's reasoning loop to exercise a full
/// tool-call round trip in tests without a real tool backend.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: HashMap<String, (ToolDefinition, ToolFn)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        definition: ToolDefinition,
        f: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) {
        self.entries.insert(definition.name.clone(), (definition, Arc::new(f)));
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn execute(&self, name: &str, args: Value) -> Result<Value> {
        let (_, f) = self
            .entries
            .get(name)
            .ok_or_else(|| crate::RatchetError::NotFound(format!("tool {name}")))?;
        f(args)
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.values().map(|(def, _)| def.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn executes_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDefinition::new("echo", "echoes input", serde_json::json!({"type": "object"})),
            |args| Ok(args),
        );
        let result = registry.execute("echo", serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        assert!(registry.execute("missing", serde_json::json!({})).await.is_err());
    }
}
