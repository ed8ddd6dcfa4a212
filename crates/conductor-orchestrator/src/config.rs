use conductor_a2a::AgentEndpoint;
use conductor_core::{ConductorError, ConductorResult, LogFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Top-level `conductor.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// `[scheduler]` section.
    pub scheduler: SchedulerConfig,
    /// `[transport]` section.
    #[serde(default)]
    pub transport: TransportConfig,
    /// `[monitor]` section.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// `[[agents]]` entries registered at start-up.
    #[serde(default)]
    pub agents: Vec<AgentEndpoint>,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Retry, replan and context limits for the scheduling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Failed attempts after which a task fails permanently. Required.
    pub max_failures: u32,
    /// Replans allowed per query before it finishes with a failure report.
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,
    /// Base delay before re-dispatching a retried task. 0 disables it.
    #[serde(default)]
    pub retry_backoff_base_ms: u64,
    /// Upper bound on the retry delay.
    #[serde(default)]
    pub retry_backoff_max_ms: u64,
    /// Longest context passed to an agent; older results are cut first.
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
}

/// How tasks reach agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Deadline for one agent call, and for each gap between streamed events.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Stream tasks to agents that declare streaming support.
    #[serde(default)]
    pub prefer_streaming: bool,
}

/// Bounds on the query monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Finished queries kept for inspection; older ones are forgotten.
    #[serde(default = "default_retain_finished")]
    pub retain_finished: usize,
}

fn default_max_replans() -> u32 {
    2
}
fn default_context_max_chars() -> usize {
    8000
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_retain_finished() -> usize {
    100
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retain_finished: default_retain_finished(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            prefer_streaming: false,
        }
    }
}

impl TransportConfig {
    /// `request_timeout_secs` as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SchedulerConfig {
    /// Config with the given threshold and defaults elsewhere.
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures,
            max_replans: default_max_replans(),
            retry_backoff_base_ms: 0,
            retry_backoff_max_ms: 0,
            context_max_chars: default_context_max_chars(),
        }
    }

    /// Set the replan budget.
    pub fn with_max_replans(mut self, max_replans: u32) -> Self {
        self.max_replans = max_replans;
        self
    }

    /// Set the retry backoff bounds.
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.retry_backoff_base_ms = base_ms;
        self.retry_backoff_max_ms = max_ms;
        self
    }

    /// Delay before the next attempt of a task that has failed `failures`
    /// times: `base * 2^(failures - 1)`, capped at the max.
    pub fn retry_delay(&self, failures: u32) -> Duration {
        if self.retry_backoff_base_ms == 0 || failures == 0 {
            return Duration::ZERO;
        }
        let delay = self
            .retry_backoff_base_ms
            .saturating_mul(2u64.saturating_pow(failures - 1));
        Duration::from_millis(delay.min(self.retry_backoff_max_ms))
    }

    fn validate(&self) -> ConductorResult<()> {
        if self.max_failures == 0 {
            return Err(ConductorError::Config(
                "scheduler.max_failures must be at least 1".into(),
            ));
        }
        if self.retry_backoff_max_ms < self.retry_backoff_base_ms {
            return Err(ConductorError::Config(format!(
                "scheduler.retry_backoff_max_ms ({}) is below retry_backoff_base_ms ({})",
                self.retry_backoff_max_ms, self.retry_backoff_base_ms
            )));
        }
        Ok(())
    }
}

impl ConductorConfig {
    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConductorResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| ConductorError::Config(format!("{}: {e}", path.display())))
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> ConductorResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConductorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the type system cannot.
    pub fn validate(&self) -> ConductorResult<()> {
        self.scheduler.validate()?;
        if self.transport.request_timeout_secs == 0 {
            return Err(ConductorError::Config(
                "transport.request_timeout_secs must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConductorError::Config("agent name must not be empty".into()));
            }
            if agent.url.trim().is_empty() {
                return Err(ConductorError::Config(format!(
                    "agent '{}' has no url",
                    agent.name
                )));
            }
            if !seen.insert(agent.name.as_str()) {
                return Err(ConductorError::Config(format!(
                    "agent '{}' is configured twice",
                    agent.name
                )));
            }
        }
        Ok(())
    }
}
