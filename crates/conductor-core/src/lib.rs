//! Core types and error definitions for the Conductor agent scheduler.
//!
//! This crate provides the foundational types shared across all Conductor crates:
//! the error taxonomy used by the scheduler's retry policy and the tracing setup
//! used by binaries and tests.
//!
//! # Main types
//!
//! - [`ConductorError`]: Unified error enum for registry, transport, planning and scheduling.
//! - [`ConductorResult`]: Convenience alias for `Result<T, ConductorError>`.
//! - [`FailureKind`]: How a failed task attempt is classified for diagnostics.
//! - [`logging::init_tracing`]: Installs the process-wide tracing subscriber.

/// Tracing subscriber initialisation.
pub mod logging;

pub use logging::{init_tracing, LogFormat};

use serde::{Deserialize, Serialize};

// --- Error types ---

/// Top-level error type for the Conductor workspace.
///
/// The first five variants are the scheduling taxonomy: `Transport`,
/// `AgentFailure` and `MalformedResult` are absorbed by the retry policy,
/// while `NotFound` and `Planning` terminate a query loop.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// No registered agent (or task) has the requested name.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network failure, unexpected HTTP status, timeout or dropped stream.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The agent executed the task and reported failure.
    #[error("Agent reported failure: {0}")]
    AgentFailure(String),

    /// The agent's response could not be interpreted.
    #[error("Malformed result: {0}")]
    MalformedResult(String),

    /// The planning collaborator could not produce a task list.
    #[error("Planning error: {0}")]
    Planning(String),

    /// A scheduler invariant was violated (illegal transition, second in-flight task).
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error raised by the tool registry.
    #[error("Tool error: {0}")]
    Tool(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// The operation was cancelled by its owner.
    #[error("Cancelled")]
    Cancelled,

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

impl ConductorError {
    /// Whether the scheduler's retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConductorError::Transport(_)
                | ConductorError::AgentFailure(_)
                | ConductorError::MalformedResult(_)
        )
    }

    /// Classify a retryable error for the task's failure record.
    ///
    /// Returns `None` for errors that are fatal to the query loop.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ConductorError::Transport(_) => Some(FailureKind::Transport),
            ConductorError::AgentFailure(_) => Some(FailureKind::AgentReported),
            ConductorError::MalformedResult(_) => Some(FailureKind::Malformed),
            _ => None,
        }
    }
}

/// Classification of a failed task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The agent ran the task and signalled failure.
    AgentReported,
    /// The agent could not be reached or the call timed out.
    Transport,
    /// The agent answered with something that could not be parsed.
    Malformed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::AgentReported => write!(f, "agent_reported"),
            FailureKind::Transport => write!(f, "transport"),
            FailureKind::Malformed => write!(f, "malformed"),
        }
    }
}
