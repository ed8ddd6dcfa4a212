use crate::descriptor::ToolDescriptor;
use conductor_core::{ConductorError, ConductorResult};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Cache key for one execution context.
///
/// Both halves are required to be non-empty, and they are stored as separate
/// fields, so `("a_b", "c")` and `("a", "b_c")` can never share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToolScope {
    username: String,
    request_id: String,
}

impl ToolScope {
    /// Scope for a user's request. Both parts must be non-empty.
    pub fn new(username: impl Into<String>, request_id: impl Into<String>) -> ConductorResult<Self> {
        let username = username.into();
        let request_id = request_id.into();
        if username.trim().is_empty() {
            return Err(ConductorError::Tool("username must not be empty".into()));
        }
        if request_id.trim().is_empty() {
            return Err(ConductorError::Tool("request id must not be empty".into()));
        }
        Ok(Self {
            username,
            request_id,
        })
    }

    /// Owner of the scope.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Request of the scope.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl std::fmt::Display for ToolScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.username, self.request_id)
    }
}

/// Process-wide cache of the tools visible to each `(username, request_id)`.
///
/// Cached entries are snapshots: registering a system tool later does not
/// touch entries that were already loaded.
pub struct ToolRegistry {
    system: RwLock<Vec<ToolDescriptor>>,
    cache: RwLock<HashMap<ToolScope, Vec<ToolDescriptor>>>,
}

impl ToolRegistry {
    /// Registry without system tools.
    pub fn new() -> Self {
        Self {
            system: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Build a registry preloaded with system tools.
    pub fn with_system_tools(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            system: RwLock::new(union_by_name(tools, &[])),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the cached entry for a scope with `tools` unioned with the
    /// current system tools. User tools come first; on a name clash the user
    /// tool wins. Returns the number of descriptors cached.
    pub async fn load(
        &self,
        tools: Vec<ToolDescriptor>,
        username: &str,
        request_id: &str,
    ) -> ConductorResult<usize> {
        let scope = ToolScope::new(username, request_id)?;
        let user_count = tools.len();
        let merged = {
            let system = self.system.read().await;
            union_by_name(tools, &system)
        };
        let count = merged.len();

        let replaced = self.cache.write().await.insert(scope.clone(), merged).is_some();
        info!(
            scope = %scope,
            user_tools = user_count,
            total = count,
            replaced,
            "Loaded tool set"
        );
        Ok(count)
    }

    /// Tools visible to a scope. Unknown or invalid scopes see the system
    /// tools only; this never fails.
    pub async fn lookup(&self, username: &str, request_id: &str) -> Vec<ToolDescriptor> {
        if let Ok(scope) = ToolScope::new(username, request_id) {
            if let Some(tools) = self.cache.read().await.get(&scope) {
                return tools.clone();
            }
            debug!(scope = %scope, "No cached tools, falling back to system tools");
        }
        self.system.read().await.clone()
    }

    /// Add a process-wide tool, visible to every later `load`.
    pub async fn register_system_tool(&self, tool: ToolDescriptor) {
        let mut system = self.system.write().await;
        if let Some(existing) = system.iter_mut().find(|t| t.name == tool.name) {
            warn!(tool = %tool.name, "Replacing system tool with the same name");
            *existing = tool;
        } else {
            info!(tool = %tool.name, "Registered system tool");
            system.push(tool);
        }
    }

    /// Drop the cached entry for a scope. Returns whether one existed.
    pub async fn invalidate(&self, username: &str, request_id: &str) -> bool {
        let Ok(scope) = ToolScope::new(username, request_id) else {
            return false;
        };
        let removed = self.cache.write().await.remove(&scope).is_some();
        if removed {
            info!(scope = %scope, "Invalidated tool set");
        }
        removed
    }

    /// Tools visible to every scope.
    pub async fn system_tools(&self) -> Vec<ToolDescriptor> {
        self.system.read().await.clone()
    }

    /// Scopes with a cached entry.
    pub async fn cached_scopes(&self) -> Vec<ToolScope> {
        let mut scopes: Vec<_> = self.cache.read().await.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// Drop every cached entry and every system tool.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
        self.system.write().await.clear();
    }

    /// Number of system tools.
    pub async fn tool_count(&self) -> usize {
        self.system.read().await.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered union keeping the first descriptor seen for each name.
fn union_by_name(first: Vec<ToolDescriptor>, second: &[ToolDescriptor]) -> Vec<ToolDescriptor> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(first.len() + second.len());
    for tool in first.into_iter().chain(second.iter().cloned()) {
        if seen.insert(tool.name.clone()) {
            out.push(tool);
        }
    }
    out
}
