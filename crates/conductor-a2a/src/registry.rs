use crate::card::{AgentDescriptor, AgentSkill};
use crate::client::{fetch_agent_card, A2aClient};
use crate::transport::AgentConnection;
use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Configuration for a single remote agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEndpoint {
    /// Name tasks are routed by.
    pub name: String,
    /// JSON-RPC endpoint, or base URL when the card is fetched.
    pub url: String,
    /// When set, the agent card is fetched from `url` + `card_path` and its
    /// metadata replaces the fields below.
    #[serde(default)]
    pub card_path: Option<String>,
    /// What the agent does.
    #[serde(default)]
    pub description: Option<String>,
    /// Skill ids, used as tags.
    #[serde(default)]
    pub skills: Vec<String>,
    /// Whether the agent accepts streaming calls.
    #[serde(default)]
    pub streaming: bool,
}

impl AgentEndpoint {
    fn descriptor(&self) -> AgentDescriptor {
        let mut descriptor =
            AgentDescriptor::new(&self.name, &self.url).with_streaming(self.streaming);
        descriptor.description = self.description.clone();
        descriptor.skills = self.skills.iter().map(AgentSkill::new).collect();
        descriptor
    }
}

/// A registered agent: its descriptor and a connection to reach it.
pub struct AgentHandle {
    descriptor: AgentDescriptor,
    connection: Arc<dyn AgentConnection>,
    registered_at: DateTime<Utc>,
}

impl AgentHandle {
    /// Handle stamped with the current time.
    pub fn new(descriptor: AgentDescriptor, connection: Arc<dyn AgentConnection>) -> Self {
        Self {
            descriptor,
            connection,
            registered_at: Utc::now(),
        }
    }

    /// Agent name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// The agent's card.
    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    /// Connection used to reach the agent.
    pub fn connection(&self) -> &Arc<dyn AgentConnection> {
        &self.connection
    }

    /// When the handle was registered.
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Whether the agent accepts streaming calls.
    pub fn supports_streaming(&self) -> bool {
        self.descriptor.supports_streaming()
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("name", &self.descriptor.name)
            .field("endpoint", &self.connection.endpoint())
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

/// Serializable view of a registered agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    /// Agent name.
    pub name: String,
    /// Where its tasks go.
    pub endpoint: String,
    /// Whether it accepts streaming calls.
    pub streaming: bool,
    /// Skill ids.
    pub skills: Vec<String>,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

/// Process-wide map from agent name to handle.
///
/// Entries are swapped whole under the write lock; readers see either the
/// old handle or the new one.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentHandle>>>,
    http: reqwest::Client,
}

impl AgentRegistry {
    /// Empty registry with a default HTTP client.
    pub fn new() -> Self {
        Self::with_http(reqwest::Client::new())
    }

    /// Use a shared HTTP client for discovery and remote agents.
    pub fn with_http(http: reqwest::Client) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            http,
        }
    }

    /// Build a registry from configuration. Agents that fail to register are
    /// skipped and their errors returned.
    pub async fn from_config(endpoints: &[AgentEndpoint]) -> (Self, Vec<ConductorError>) {
        let registry = Self::new();
        let errors = registry.register_endpoints(endpoints).await;
        (registry, errors)
    }

    /// Register an agent, replacing any agent with the same name.
    pub async fn register(
        &self,
        descriptor: AgentDescriptor,
        connection: Arc<dyn AgentConnection>,
    ) -> ConductorResult<Arc<AgentHandle>> {
        if descriptor.name.trim().is_empty() {
            return Err(ConductorError::Config("agent name must not be empty".into()));
        }
        let handle = Arc::new(AgentHandle::new(descriptor, connection));
        let name = handle.name().to_string();

        let previous = self
            .agents
            .write()
            .await
            .insert(name.clone(), Arc::clone(&handle));
        match previous {
            Some(old) => warn!(
                agent = %name,
                old_endpoint = %old.connection.endpoint(),
                endpoint = %handle.connection.endpoint(),
                "Replaced registered agent"
            ),
            None => info!(
                agent = %name,
                endpoint = %handle.connection.endpoint(),
                streaming = handle.supports_streaming(),
                "Registered agent"
            ),
        }
        Ok(handle)
    }

    /// Look up an agent by name. Unknown names are `NotFound`.
    pub async fn resolve(&self, name: &str) -> ConductorResult<Arc<AgentHandle>> {
        self.agents
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ConductorError::NotFound(format!("agent '{name}'")))
    }

    /// All handles, sorted by name.
    pub async fn list_all(&self) -> Vec<Arc<AgentHandle>> {
        let mut handles: Vec<_> = self.agents.read().await.values().cloned().collect();
        handles.sort_by(|a, b| a.name().cmp(b.name()));
        handles
    }

    /// Status of every agent, sorted by name.
    pub async fn status(&self) -> Vec<AgentStatus> {
        self.list_all()
            .await
            .iter()
            .map(|h| AgentStatus {
                name: h.name().to_string(),
                endpoint: h.connection.endpoint().to_string(),
                streaming: h.supports_streaming(),
                skills: h.descriptor.skills.iter().map(|s| s.id.clone()).collect(),
                registered_at: h.registered_at,
            })
            .collect()
    }

    /// Remove an agent. Returns whether it was registered.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.agents.write().await.remove(name).is_some();
        if removed {
            info!(agent = %name, "Unregistered agent");
        }
        removed
    }

    /// Number of registered agents.
    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Whether no agent is registered.
    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Drop every agent.
    pub async fn clear(&self) {
        let mut agents = self.agents.write().await;
        let count = agents.len();
        agents.clear();
        info!(count, "Agent registry cleared");
    }

    /// Fetch an agent card and register an HTTP connection for it.
    ///
    /// The card's own URL is used for calls, falling back to `base_url` when
    /// the card leaves it empty.
    pub async fn discover(
        &self,
        base_url: &str,
        card_path: &str,
    ) -> ConductorResult<Arc<AgentHandle>> {
        let mut card = fetch_agent_card(&self.http, base_url, card_path).await?;
        if card.url.trim().is_empty() {
            card.url = base_url.to_string();
        }
        let client = A2aClient::with_http(self.http.clone(), &card.name, &card.url);
        self.register(card, Arc::new(client)).await
    }

    /// Register every configured agent. Returns the errors of those that
    /// could not be registered.
    pub async fn register_endpoints(&self, endpoints: &[AgentEndpoint]) -> Vec<ConductorError> {
        let mut errors = Vec::new();

        for endpoint in endpoints {
            match self.register_endpoint(endpoint).await {
                Ok(handle) => {
                    info!(
                        agent = %handle.name(),
                        skills = handle.descriptor().skills.len(),
                        "Agent available"
                    );
                }
                Err(e) => {
                    warn!(agent = %endpoint.name, error = %e, "Failed to register agent");
                    errors.push(e);
                }
            }
        }

        errors
    }

    async fn register_endpoint(&self, endpoint: &AgentEndpoint) -> ConductorResult<Arc<AgentHandle>> {
        let descriptor = match &endpoint.card_path {
            Some(card_path) => {
                let mut card = fetch_agent_card(&self.http, &endpoint.url, card_path).await?;
                // The configured name is what tasks are routed by.
                card.name = endpoint.name.clone();
                if card.url.trim().is_empty() {
                    card.url = endpoint.url.clone();
                }
                card
            }
            None => endpoint.descriptor(),
        };
        let client = A2aClient::with_http(self.http.clone(), &descriptor.name, &descriptor.url);
        self.register(descriptor, Arc::new(client)).await
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
