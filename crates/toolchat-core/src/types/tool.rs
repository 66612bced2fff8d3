//! Tool descriptor, call and result types

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Schema used when a server publishes a tool without a usable input schema
pub fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Metadata for one callable capability published by a tool server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within the merged catalog
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool arguments
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
    /// Name of the tool server that owns this tool
    pub server: String,
}

impl ToolDescriptor {
    /// Create a descriptor with an empty object schema
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: empty_object_schema(),
            server: server.into(),
        }
    }

    /// Set the input schema; anything but a JSON object becomes the empty object schema
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = if schema.is_object() {
            schema
        } else {
            empty_object_schema()
        };
        self
    }
}

/// Tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool being called
    pub name: String,
    /// Input arguments for the tool
    pub input: Value,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Get an input argument as a string
    pub fn get_arg_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(|v| v.as_str())
    }
}

/// Successful output of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Server that produced the output
    pub server: String,
    /// Text blocks joined with newlines
    pub text: String,
    /// Structured result, when the server returned one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
}

impl ToolOutput {
    /// Create a text-only output
    pub fn text(server: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            text: text.into(),
            structured: None,
        }
    }

    /// Content handed back to the model
    pub fn to_model_content(&self) -> String {
        match (&self.structured, self.text.is_empty()) {
            (Some(value), true) => value.to_string(),
            _ => self.text.clone(),
        }
    }
}

/// Tool result to send back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the tool call this is responding to
    #[serde(rename = "callId")]
    pub call_id: String,
    /// The result content
    pub content: String,
    /// Whether this result represents an error
    #[serde(rename = "isError", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful tool result
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an error tool result
    pub fn error(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: error.into(),
            is_error: true,
        }
    }
}
