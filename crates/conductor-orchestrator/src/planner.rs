use crate::todo_list::CompactTask;
use crate::types::PlannedTask;
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::warn;

/// What a planner sees: the query and a compact view of the task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningInput {
    /// The query being planned.
    pub original_query: String,
    /// Compact view of the current tasks; empty for the initial plan.
    pub todo_list: Vec<CompactTask>,
    /// Why a replan was requested; absent for the initial plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replan_reason: Option<String>,
}

/// External collaborator that turns a query into tasks.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce the initial task list.
    async fn plan(&self, input: &PlanningInput) -> ConductorResult<Vec<PlannedTask>>;

    /// Produce tasks that replace the pending tail after a permanent failure.
    /// Returning an empty list lets the run finish with what it has.
    async fn replan(&self, input: &PlanningInput) -> ConductorResult<Vec<PlannedTask>> {
        self.plan(input).await
    }
}

/// Parse a planner reply. Accepted shapes:
///
/// - a bare JSON array of tasks,
/// - an object with a `tasks` array,
/// - an edit object `{"add": [...], "modify": [...], "delete": [...]}`.
///
/// For edits only `add` is taken: a replan replaces every pending task, so
/// edits aimed at existing tasks have nothing left to apply to.
pub fn parse_plan(reply: &str) -> ConductorResult<Vec<PlannedTask>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Reply {
        Bare(Vec<PlannedTask>),
        Wrapped {
            tasks: Vec<PlannedTask>,
        },
        Edits {
            add: Vec<PlannedTask>,
            #[serde(default)]
            modify: Vec<serde_json::Value>,
            #[serde(default)]
            delete: Vec<serde_json::Value>,
        },
    }

    let trimmed = strip_code_fence(reply.trim());
    let parsed: Reply = serde_json::from_str(trimmed)
        .map_err(|e| ConductorError::Planning(format!("unreadable plan: {e}")))?;
    let tasks = match parsed {
        Reply::Bare(tasks) | Reply::Wrapped { tasks } => tasks,
        Reply::Edits {
            add,
            modify,
            delete,
        } => {
            if !modify.is_empty() || !delete.is_empty() {
                warn!(
                    modified = modify.len(),
                    deleted = delete.len(),
                    "Plan edits on existing tasks ignored"
                );
            }
            add
        }
    };
    if let Some(bad) = tasks
        .iter()
        .find(|t| t.agent.trim().is_empty() || t.description.trim().is_empty())
    {
        return Err(ConductorError::Planning(format!(
            "planned task without agent or description: {bad:?}"
        )));
    }
    Ok(tasks)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.trim_start_matches("json");
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Planner with a fixed script: the initial plan, then one reply per replan.
/// Once the replan script runs out, replans return no tasks.
pub struct StaticPlanner {
    initial: Vec<PlannedTask>,
    replans: Mutex<Vec<Vec<PlannedTask>>>,
}

impl StaticPlanner {
    /// Planner whose initial plan is `initial` and whose replans return nothing.
    pub fn new(initial: Vec<PlannedTask>) -> Self {
        Self {
            initial,
            replans: Mutex::new(Vec::new()),
        }
    }

    /// Queue the reply to the next replan request.
    pub fn then_replan(self, tasks: Vec<PlannedTask>) -> Self {
        if let Ok(mut replans) = self.replans.lock() {
            replans.push(tasks);
        }
        self
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _input: &PlanningInput) -> ConductorResult<Vec<PlannedTask>> {
        if self.initial.is_empty() {
            return Err(ConductorError::Planning("no tasks configured".into()));
        }
        Ok(self.initial.clone())
    }

    async fn replan(&self, _input: &PlanningInput) -> ConductorResult<Vec<PlannedTask>> {
        let mut replans = self
            .replans
            .lock()
            .map_err(|_| ConductorError::Planning("planner state poisoned".into()))?;
        if replans.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(replans.remove(0))
        }
    }
}
