use serde::{Deserialize, Serialize};

/// Well-known path of the A2A agent card.
pub const DEFAULT_CARD_PATH: &str = "/.well-known/agent.json";

/// Static metadata about an agent, in A2A agent card form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    /// Unique agent name; tasks are routed by it.
    pub name: String,
    /// What the agent does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Transport endpoint the agent accepts JSON-RPC calls on.
    pub url: String,
    /// Version the agent reports.
    #[serde(default = "default_version")]
    pub version: String,
    /// Optional protocol features.
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    /// Advertised skills.
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Optional A2A features an agent supports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    /// Accepts `tasks/sendSubscribe`.
    #[serde(default)]
    pub streaming: bool,
    /// Can push task updates to a webhook.
    #[serde(default)]
    pub push_notifications: bool,
    /// Keeps a history of state transitions.
    #[serde(default)]
    pub state_transition_history: bool,
}

/// A capability an agent advertises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSkill {
    /// Stable skill id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// What the skill does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Sample requests.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

impl AgentSkill {
    /// Skill whose name equals its id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            tags: Vec::new(),
            examples: Vec::new(),
        }
    }
}

impl AgentDescriptor {
    /// Descriptor with default version and no capabilities.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            url: url.into(),
            version: default_version(),
            capabilities: AgentCapabilities::default(),
            skills: Vec::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare streaming support.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.capabilities.streaming = streaming;
        self
    }

    /// Add a skill.
    pub fn with_skill(mut self, skill: AgentSkill) -> Self {
        self.skills.push(skill);
        self
    }

    /// Whether the agent accepts streaming calls.
    pub fn supports_streaming(&self) -> bool {
        self.capabilities.streaming
    }

    /// Whether a skill matches by id, name or tag.
    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills
            .iter()
            .any(|s| s.id == skill || s.name == skill || s.tags.iter().any(|t| t == skill))
    }
}
