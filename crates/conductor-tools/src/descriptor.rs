use serde::{Deserialize, Serialize};

/// Metadata describing a callable capability an agent may invoke.
///
/// Descriptors are opaque to the registry: it caches them and unions sets of
/// them by name, nothing more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Name the agent calls the tool by; unique within a tool set.
    pub name: String,
    /// What the tool does.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the call arguments.
    #[serde(default = "default_parameters_schema")]
    pub parameters_schema: serde_json::Value,
    /// Where the tool is invoked (MCP server, HTTP endpoint, agent URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_parameters_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDescriptor {
    /// Tool with an empty object schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters_schema: default_parameters_schema(),
            endpoint: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the argument schema.
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.parameters_schema = schema;
        self
    }

    /// Set where the tool is served.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}
