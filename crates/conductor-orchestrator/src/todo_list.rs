use crate::types::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult, FailureKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The ordered task backlog for one originating query.
///
/// Insertion order is execution order. At most one task is `InProgress` at
/// any time; every mutation goes through a method that checks this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoList {
    original_query: String,
    tasks: Vec<Task>,
    #[serde(default)]
    replan_count: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Scheduler-facing view of a task: no description, no results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactTask {
    /// Task id.
    pub id: String,
    /// Current status.
    pub status: TaskStatus,
    /// Agent the task is routed to.
    pub assigned_agent: String,
    /// Failed attempts so far.
    pub failure_count: u32,
}

/// Counts per status, for dashboards and log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoStatistics {
    /// All tasks.
    pub total: usize,
    /// Waiting to be dispatched.
    pub pending: usize,
    /// Dispatched, reply not yet applied.
    pub in_progress: usize,
    /// Done.
    pub completed: usize,
    /// Failed for good.
    pub failed: usize,
    /// Tasks with at least one failed attempt, including ones later retried.
    pub with_failures: usize,
}

impl std::fmt::Display for TodoStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total: {}, pending: {}, in progress: {}, completed: {}, failed: {}",
            self.total, self.pending, self.in_progress, self.completed, self.failed
        )?;
        if self.with_failures > 0 {
            write!(f, " ({} with failures)", self.with_failures)?;
        }
        Ok(())
    }
}

impl TodoList {
    /// Empty list for a query.
    pub fn new(original_query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            original_query: original_query.into(),
            tasks: Vec::new(),
            replan_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The query this list serves.
    pub fn original_query(&self) -> &str {
        &self.original_query
    }

    /// Tasks in execution order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Task by id.
    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Replans applied so far.
    pub fn replan_count(&self) -> u32 {
        self.replan_count
    }

    /// When the list was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last mutation.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the list has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Append a new task. It must be `Pending` and its id unused.
    pub fn add_task(&mut self, task: Task) -> ConductorResult<String> {
        if task.status != TaskStatus::Pending {
            return Err(ConductorError::Orchestrator(format!(
                "task {} must be added as pending, not {}",
                task.id, task.status
            )));
        }
        if self.get(&task.id).is_some() {
            return Err(ConductorError::Orchestrator(format!(
                "duplicate task id {}",
                task.id
            )));
        }
        let id = task.id.clone();
        self.tasks.push(task);
        self.touch();
        Ok(id)
    }

    /// The task currently executing, if any.
    pub fn in_progress(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|t| t.status == TaskStatus::InProgress)
    }

    /// Earliest-inserted pending task.
    pub fn next_pending(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.status == TaskStatus::Pending)
    }

    /// At least one task is pending or in progress.
    pub fn is_active(&self) -> bool {
        self.tasks.iter().any(|t| !t.status.is_terminal())
    }

    /// Every task reached a terminal status.
    pub fn is_exhausted(&self) -> bool {
        !self.is_active()
    }

    /// Move a task along `Pending -> InProgress -> {Completed | Failed | Pending}`.
    ///
    /// `InProgress -> Pending` is the retry path. `Failed -> Pending` is not
    /// accepted here; use [`retry`](Self::retry).
    pub fn update_status(&mut self, task_id: &str, status: TaskStatus) -> ConductorResult<()> {
        if status == TaskStatus::InProgress {
            if let Some(running) = self.in_progress() {
                if running.id != task_id {
                    return Err(ConductorError::Orchestrator(format!(
                        "cannot start {task_id}: {} is already in progress",
                        running.id
                    )));
                }
            }
        }

        let task = self.task_mut(task_id)?;
        let allowed = matches!(
            (task.status, status),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
                | (TaskStatus::InProgress, TaskStatus::Pending)
        );
        if !allowed {
            return Err(ConductorError::Orchestrator(format!(
                "illegal transition for {task_id}: {} -> {status}",
                task.status
            )));
        }

        task.status = status;
        if status.is_terminal() {
            task.completed_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    /// Record one failed attempt. Returns the new count.
    pub fn increment_failure(&mut self, task_id: &str) -> ConductorResult<u32> {
        let task = self.task_mut(task_id)?;
        task.failure_count += 1;
        let count = task.failure_count;
        self.touch();
        Ok(count)
    }

    /// Record a failed attempt along with why it failed.
    pub fn record_failure(
        &mut self,
        task_id: &str,
        kind: FailureKind,
        reason: impl Into<String>,
    ) -> ConductorResult<u32> {
        let count = self.increment_failure(task_id)?;
        let task = self.task_mut(task_id)?;
        task.last_error = Some(reason.into());
        task.last_failure_kind = Some(kind);
        Ok(count)
    }

    /// Attach an error to a task without counting an attempt.
    pub fn note_error(&mut self, task_id: &str, reason: impl Into<String>) -> ConductorResult<()> {
        let task = self.task_mut(task_id)?;
        task.last_error = Some(reason.into());
        self.touch();
        Ok(())
    }

    /// Store the output of a task.
    pub fn set_result(&mut self, task_id: &str, result: impl Into<String>) -> ConductorResult<()> {
        let task = self.task_mut(task_id)?;
        task.result = Some(result.into());
        self.touch();
        Ok(())
    }

    /// Explicitly put a permanently failed task back in the queue. The
    /// failure count is kept.
    pub fn retry(&mut self, task_id: &str) -> ConductorResult<()> {
        let task = self.task_mut(task_id)?;
        if task.status != TaskStatus::Failed {
            return Err(ConductorError::Orchestrator(format!(
                "only failed tasks can be retried, {task_id} is {}",
                task.status
            )));
        }
        task.status = TaskStatus::Pending;
        task.completed_at = None;
        self.touch();
        Ok(())
    }

    /// Replace the tail of the list after a replan: terminal tasks stay,
    /// pending ones are dropped and `tasks` appended. Counts as one replan.
    ///
    /// Returns how many pending tasks were dropped. On error the list is
    /// left untouched.
    pub fn replace_pending(&mut self, tasks: Vec<Task>) -> ConductorResult<usize> {
        if let Some(running) = self.in_progress() {
            return Err(ConductorError::Orchestrator(format!(
                "cannot replan while {} is in progress",
                running.id
            )));
        }

        // Ids of kept tasks plus the replacement ones must all be distinct.
        let mut ids: HashSet<&str> = self
            .tasks
            .iter()
            .filter(|t| t.status.is_terminal())
            .map(|t| t.id.as_str())
            .collect();
        for task in &tasks {
            if task.status != TaskStatus::Pending {
                return Err(ConductorError::Orchestrator(format!(
                    "task {} must be added as pending, not {}",
                    task.id, task.status
                )));
            }
            if !ids.insert(task.id.as_str()) {
                return Err(ConductorError::Orchestrator(format!(
                    "duplicate task id {} in replan",
                    task.id
                )));
            }
        }

        let before = self.tasks.len();
        self.tasks.retain(|t| t.status.is_terminal());
        let dropped = before - self.tasks.len();
        self.tasks.extend(tasks);
        self.replan_count += 1;
        self.touch();
        Ok(dropped)
    }

    /// Counts per status.
    pub fn statistics(&self) -> TodoStatistics {
        let mut stats = TodoStatistics {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
            if task.failure_count > 0 {
                stats.with_failures += 1;
            }
        }
        stats
    }

    /// Scheduler-facing projection of every task.
    pub fn compact(&self) -> Vec<CompactTask> {
        self.tasks
            .iter()
            .map(|t| CompactTask {
                id: t.id.clone(),
                status: t.status,
                assigned_agent: t.assigned_agent.clone(),
                failure_count: t.failure_count,
            })
            .collect()
    }

    /// One line per task, for control messages to a planner.
    pub fn compact_text(&self) -> String {
        self.tasks
            .iter()
            .map(|t| {
                format!(
                    "{} | {} | {} | failures={}",
                    t.id, t.assigned_agent, t.status, t.failure_count
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Full dump for persistence and debugging.
    pub fn snapshot(&self) -> ConductorResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn task_mut(&mut self, task_id: &str) -> ConductorResult<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| ConductorError::NotFound(format!("task '{task_id}'")))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
