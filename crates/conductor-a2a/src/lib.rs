//! Agent registry and task transport for the Conductor agent scheduler.
//!
//! Agents are reached over the A2A protocol (JSON-RPC 2.0 over HTTP, with
//! server-sent events for streaming) or run in-process behind the same
//! [`AgentConnection`] seam.
//!
//! # Main types
//!
//! - [`AgentRegistry`]: Process-wide name to [`AgentHandle`] map.
//! - [`TaskTransport`]: Synchronous and streaming dispatch with deadlines.
//! - [`TaskSubscription`]: Cancellable stream of [`TaskEvent`]s.
//! - [`A2aClient`]: HTTP implementation of [`AgentConnection`].
//! - [`LocalConnection`]: In-process implementation around an [`AgentExecutor`].

/// A2A agent cards.
pub mod card;
/// HTTP JSON-RPC client.
pub mod client;
/// In-process agents.
pub mod local;
/// A2A wire types.
pub mod protocol;
/// Agent registry.
pub mod registry;
/// Dispatch, results and event streams.
pub mod transport;

pub use card::{AgentCapabilities, AgentDescriptor, AgentSkill, DEFAULT_CARD_PATH};
pub use client::{fetch_agent_card, A2aClient};
pub use local::{AgentExecutor, LocalConnection};
pub use protocol::TaskState;
pub use registry::{AgentEndpoint, AgentHandle, AgentRegistry, AgentStatus};
pub use transport::{
    AgentConnection, TaskEvent, TaskEventKind, TaskRequest, TaskResult, TaskResultStatus,
    TaskSubscription, TaskTransport,
};
