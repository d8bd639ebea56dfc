//! Tool dispatch.
//!
//! The service may ask for a function call in either mode. The orchestrator
//! hands the call to a [`ToolDispatcher`] and always sends something back:
//! a failure becomes `{"error": "<message>"}` instead of aborting the
//! conversation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_types::{ToolCall, ToolDefinition};
use serde_json::Value;
use thiserror::Error;

/// Tool errors.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with this name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The arguments are not valid JSON for the tool.
    #[error("invalid arguments for {name}: {reason}")]
    InvalidArguments {
        /// Tool name.
        name: String,
        /// What was wrong.
        reason: String,
    },

    /// The tool ran and failed.
    #[error("{0}")]
    Failed(String),
}

/// Executes tool calls requested by the service.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Tools advertised to the service.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run one call. `arguments` is the raw JSON text from the service.
    async fn dispatch(&self, name: &str, arguments: &str) -> Result<String, ToolError>;
}

/// Dispatcher with no tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTools;

#[async_trait]
impl ToolDispatcher for NoTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    async fn dispatch(&self, name: &str, _arguments: &str) -> Result<String, ToolError> {
        Err(ToolError::UnknownTool(name.to_string()))
    }
}

type Handler = Arc<dyn Fn(Value) -> Result<Value, ToolError> + Send + Sync>;

struct ToolEntry {
    definition: ToolDefinition,
    handler: Handler,
}

/// Registry of synchronous tool functions.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolEntry>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any tool with the same name.
    pub fn register<F>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        self.tools.insert(
            definition.name.clone(),
            ToolEntry {
                definition,
                handler: Arc::new(handler),
            },
        );
    }

    /// Check if a tool is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if no tool is registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|e| e.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    async fn dispatch(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args: Value = if arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
                name: name.to_string(),
                reason: e.to_string(),
            })?
        };
        let output = (entry.handler)(args)?;
        Ok(match output {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

/// Result of running one tool call, ready to send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Output text (the tool's result or an error object).
    pub output: String,
    /// Whether `output` is an error object.
    pub is_error: bool,
}

/// Run a call, converting any failure into an error object.
pub async fn run_tool(dispatcher: &dyn ToolDispatcher, call: &ToolCall) -> ToolOutcome {
    tracing::debug!("Dispatching tool {} ({})", call.name, call.call_id);
    match dispatcher.dispatch(&call.name, &call.arguments).await {
        Ok(output) => ToolOutcome {
            output,
            is_error: false,
        },
        Err(e) => {
            tracing::warn!("Tool {} failed: {}", call.name, e);
            ToolOutcome {
                output: serde_json::json!({ "error": e.to_string() }).to_string(),
                is_error: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDefinition::function(
                "add",
                "Add two numbers",
                json!({"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}}),
            ),
            |args| {
                let a = args["a"].as_f64().ok_or_else(|| ToolError::Failed("a missing".into()))?;
                let b = args["b"].as_f64().ok_or_else(|| ToolError::Failed("b missing".into()))?;
                Ok(json!({ "sum": a + b }))
            },
        );
        registry.register(
            ToolDefinition::function("echo", "Echo text", json!({"type": "object"})),
            |args| Ok(Value::String(args["text"].as_str().unwrap_or_default().to_string())),
        );
        registry
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            call_id: "call_1".into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    // ===========================================
    // Registry Tests
    // ===========================================

    #[test]
    fn definitions_are_sorted_by_name() {
        let names: Vec<String> = registry()
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["add", "echo"]);
    }

    #[tokio::test]
    async fn dispatch_returns_json_output() {
        let out = registry().dispatch("add", r#"{"a":2,"b":3}"#).await.unwrap();
        assert_eq!(out, r#"{"sum":5.0}"#);
    }

    #[tokio::test]
    async fn string_output_is_not_quoted() {
        let out = registry().dispatch("echo", r#"{"text":"hi"}"#).await.unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn dispatch_rejects_bad_arguments() {
        let err = registry().dispatch("add", "{not json").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    // ===========================================
    // run_tool Tests
    // ===========================================

    #[tokio::test]
    async fn failures_become_error_objects() {
        let outcome = run_tool(&registry(), &call("add", r#"{"a":1}"#)).await;
        assert!(outcome.is_error);
        assert_eq!(outcome.output, r#"{"error":"b missing"}"#);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_object() {
        let outcome = run_tool(&NoTools, &call("missing", "{}")).await;
        assert!(outcome.is_error);
        let value: Value = serde_json::from_str(&outcome.output).unwrap();
        assert_eq!(value["error"], "unknown tool: missing");
    }

    #[tokio::test]
    async fn success_is_passed_through() {
        let outcome = run_tool(&registry(), &call("echo", r#"{"text":"ok"}"#)).await;
        assert_eq!(
            outcome,
            ToolOutcome {
                output: "ok".into(),
                is_error: false
            }
        );
    }
}
