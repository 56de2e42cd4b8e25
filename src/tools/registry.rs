use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use super::handler::{ResponseMode, ToolHandler, TypedHandler};
use super::validation::validate_arguments;
use crate::error::ChatError;
use crate::types::ToolDescriptor;

/// A tool as the registry holds it: what the model sees, how to run it,
/// and whether its result triggers another turn.
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub mode: ResponseMode,
    handler: Box<dyn ToolHandler>,
}

impl RegisteredTool {
    /// Check the arguments against the schema, then run the handler.
    pub async fn invoke(&self, input: Value) -> Result<String, ChatError> {
        let name = &self.descriptor.name;
        validate_arguments(&input, &self.descriptor.parameters).map_err(|message| {
            ChatError::ToolArgument {
                tool: name.clone(),
                message,
            }
        })?;
        self.handler.call(name, input).await
    }
}

/// Catalog of the tools a conversation exposes to the model.
///
/// When tools are disabled every registration is dropped (and logged), so a
/// bot can be switched to plain chat without touching the code that wires
/// its tools.
pub struct ToolRegistry {
    enabled: bool,
    tools: BTreeMap<String, Arc<RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            tools: BTreeMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Register a tool whose arguments decode into `A`. Re-registering a
    /// name replaces the previous tool.
    pub fn register<A, F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        callback: F,
        mode: ResponseMode,
    ) where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        self.register_handler(name, description, schema, TypedHandler::new(callback), mode);
    }

    /// Register a tool backed by a hand-written handler.
    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: impl ToolHandler + 'static,
        mode: ResponseMode,
    ) {
        let name = name.into();
        if !self.enabled {
            info!(tool = %name, "tools disabled, not registering");
            return;
        }
        info!(tool = %name, ?mode, "registering tool");
        let tool = RegisteredTool {
            descriptor: ToolDescriptor {
                name: name.clone(),
                description: description.into(),
                parameters: schema,
            },
            mode,
            handler: Box::new(handler),
        };
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.get(name).cloned()
    }

    /// Descriptors for the inference request.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor.clone()).collect()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct MoveArgs {
        action: String,
        name: Option<String>,
    }

    fn move_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string"},
                "name": {"type": "string"}
            },
            "required": ["action"]
        })
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new(true);
        registry.register(
            "performAction",
            "Move next to someone or wait",
            move_schema(),
            |args: MoveArgs| async move {
                match args.name {
                    Some(name) => format!("{} {name}", args.action),
                    None => args.action,
                }
            },
            ResponseMode::Deferred,
        );
        registry
    }

    struct Static(&'static str);

    #[async_trait::async_trait]
    impl ToolHandler for Static {
        async fn call(&self, _name: &str, _input: Value) -> Result<String, ChatError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn typed_tool_receives_decoded_arguments() {
        let tool = registry().get("performAction").unwrap();
        let out = tool
            .invoke(json!({"action": "goTo", "name": "Alice"}))
            .await
            .unwrap();
        assert_eq!(out, "goTo Alice");
        assert_eq!(tool.mode, ResponseMode::Deferred);
    }

    #[tokio::test]
    async fn schema_violation_is_an_argument_error() {
        let tool = registry().get("performAction").unwrap();
        let err = tool.invoke(json!({"name": "Alice"})).await.unwrap_err();
        assert!(matches!(err, ChatError::ToolArgument { ref tool, .. } if tool == "performAction"));
    }

    #[tokio::test]
    async fn decode_failure_is_an_argument_error() {
        let mut registry = ToolRegistry::new(true);
        registry.register(
            "count",
            "Counts",
            json!({"type": "object"}),
            |args: Vec<u32>| async move { args.len().to_string() },
            ResponseMode::Synchronous,
        );
        let err = registry
            .get("count")
            .unwrap()
            .invoke(json!({"not": "a list"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ToolArgument { .. }));
    }

    #[tokio::test]
    async fn re_registering_overwrites() {
        let mut registry = ToolRegistry::new(true);
        let schema = json!({"type": "object", "properties": {}});
        registry.register_handler("ping", "first", schema.clone(), Static("a"), ResponseMode::Synchronous);
        registry.register_handler("ping", "second", schema, Static("b"), ResponseMode::Deferred);

        assert_eq!(registry.len(), 1);
        let tool = registry.get("ping").unwrap();
        assert_eq!(tool.descriptor.description, "second");
        assert_eq!(tool.mode, ResponseMode::Deferred);
        assert_eq!(tool.invoke(json!({})).await.unwrap(), "b");
    }

    #[test]
    fn disabled_registry_ignores_registrations() {
        let mut registry = ToolRegistry::new(false);
        registry.register_handler(
            "ping",
            "pong",
            json!({"type": "object"}),
            Static("pong"),
            ResponseMode::Synchronous,
        );
        assert!(registry.is_empty());
        assert!(registry.descriptors().is_empty());
        assert!(registry.get("ping").is_none());
    }

    #[test]
    fn descriptors_carry_schema() {
        let registry = registry();
        let descriptors = registry.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "performAction");
        assert_eq!(descriptors[0].parameters, move_schema());
        assert_eq!(registry.tool_names(), vec!["performAction"]);
    }
}
