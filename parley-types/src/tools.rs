//! Tool-call shapes shared by both protocols.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A function the remote service may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Always `"function"`
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    /// Function name
    pub name: String,
    /// What the function does, for the model
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object
    #[serde(default)]
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a function tool definition.
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: function_kind(),
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

fn function_kind() -> String {
    "function".to_string()
}

/// A tool invocation requested by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlates the call with its output
    pub call_id: String,
    /// Function name
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}
