//! Task list, scheduling state machine and per-query run loop.
//!
//! A query is planned into an ordered [`TodoList`]. The [`Scheduler`] then
//! dispatches one task at a time, feeds each outcome back, retries failures up
//! to a threshold and asks the [`Planner`] to replan when a task fails for
//! good. The [`Orchestrator`] drives that loop against the shared agent and
//! tool registries.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Runs queries, in place or on a background task.
//! - [`Scheduler`]: Pure decision function over a [`TodoList`].
//! - [`TodoList`]: Per-query task store with single-flight enforcement.
//! - [`Planner`]: External collaborator producing and revising plans.
//! - [`QueryMonitor`]: Per-query statistics for diagnostics.
//! - [`ConductorConfig`]: TOML configuration.

/// TOML configuration.
pub mod config;
/// Per-query run loop.
pub mod engine;
/// Query statistics.
pub mod monitor;
/// Planning collaborator.
pub mod planner;
/// The routing state machine.
pub mod scheduler;
/// Per-query task store.
pub mod todo_list;
/// Tasks, decisions and run reports.
pub mod types;

pub use config::{ConductorConfig, MonitorConfig, SchedulerConfig, TransportConfig};
pub use engine::{CancelToken, Orchestrator, QueryHandle};
pub use monitor::{QueryMonitor, QueryPhase, QueryState};
pub use planner::{parse_plan, Planner, PlanningInput, StaticPlanner};
pub use scheduler::Scheduler;
pub use todo_list::{CompactTask, TodoList, TodoStatistics};
pub use types::{
    NextAction, NextTarget, OutcomeKind, PlannedTask, RunOutcome, RunReport, RunRequest,
    SchedulerDecision, Task, TaskOutcome, TaskStatus, TaskUpdate, REPLAN,
};
