use crate::config::SchedulerConfig;
use crate::todo_list::TodoList;
use crate::types::{
    NextAction, NextTarget, OutcomeKind, SchedulerDecision, Task, TaskOutcome, TaskStatus,
    TaskUpdate,
};
use conductor_core::{ConductorError, ConductorResult};
use tracing::{info, warn};

/// Longest per-task result excerpt included in a summary.
const SUMMARY_EXCERPT_CHARS: usize = 200;

/// The task-routing state machine.
///
/// Holds only policy; all state lives in the [`TodoList`] passed to
/// [`decide`](Self::decide).
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    /// Scheduler applying `config`.
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// The limits in force.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Apply the outcome of the in-flight task, then pick what happens next.
    ///
    /// Without an outcome no task may be in flight. A failure at or past
    /// `max_failures` fails the task permanently and asks for a replan, or
    /// finishes once the replan budget is spent.
    pub fn decide(
        &self,
        todo: &mut TodoList,
        last_outcome: Option<&TaskOutcome>,
    ) -> ConductorResult<SchedulerDecision> {
        let update = match last_outcome {
            Some(outcome) => Some(self.apply_outcome(todo, outcome)?),
            None => {
                if let Some(running) = todo.in_progress() {
                    return Err(ConductorError::Orchestrator(format!(
                        "task {} is in progress but no outcome was given",
                        running.id
                    )));
                }
                None
            }
        };

        if let Some(update) = &update {
            if update.status == TaskStatus::Failed {
                return Ok(self.after_permanent_failure(todo, update.clone()));
            }
        }

        if let Some(next) = todo.next_pending().map(|t| t.id.clone()) {
            todo.update_status(&next, TaskStatus::InProgress)?;
            let task = todo
                .get(&next)
                .ok_or_else(|| ConductorError::NotFound(format!("task '{next}'")))?;
            info!(
                task_id = %task.id,
                agent = %task.assigned_agent,
                attempt = task.failure_count + 1,
                "Dispatching task"
            );
            let action = NextAction {
                next: NextTarget::Agent(task.assigned_agent.clone()),
                task_id: Some(task.id.clone()),
                task_description: task.description.clone(),
                context: self.accumulated_context(todo),
            };
            return Ok(SchedulerDecision::next(update, action));
        }

        let summary = self.summarize(todo, None);
        info!(statistics = %todo.statistics(), "Task list exhausted");
        Ok(SchedulerDecision::finish(update, summary))
    }

    fn apply_outcome(&self, todo: &mut TodoList, outcome: &TaskOutcome) -> ConductorResult<TaskUpdate> {
        let running = todo.in_progress().map(|t| t.id.clone()).ok_or_else(|| {
            ConductorError::Orchestrator(format!(
                "outcome for task {} but nothing is in progress",
                outcome.task_id
            ))
        })?;
        if running != outcome.task_id {
            return Err(ConductorError::Orchestrator(format!(
                "outcome for task {} while {running} is in progress",
                outcome.task_id
            )));
        }

        match &outcome.kind {
            OutcomeKind::Success { result_text } => {
                todo.set_result(&running, result_text.clone())?;
                todo.update_status(&running, TaskStatus::Completed)?;
                info!(task_id = %running, "Task completed");
            }
            OutcomeKind::Failure { kind, reason } => {
                let failures = todo.record_failure(&running, *kind, reason.clone())?;
                if failures < self.config.max_failures {
                    todo.update_status(&running, TaskStatus::Pending)?;
                    warn!(
                        task_id = %running,
                        failure_count = failures,
                        max_failures = self.config.max_failures,
                        kind = %kind,
                        reason = %reason,
                        "Task failed, will retry"
                    );
                } else {
                    todo.update_status(&running, TaskStatus::Failed)?;
                    warn!(
                        task_id = %running,
                        failure_count = failures,
                        kind = %kind,
                        reason = %reason,
                        "Task failed permanently"
                    );
                }
            }
        }

        let task = todo
            .get(&running)
            .ok_or_else(|| ConductorError::NotFound(format!("task '{running}'")))?;
        Ok(TaskUpdate::of(task))
    }

    fn after_permanent_failure(&self, todo: &TodoList, update: TaskUpdate) -> SchedulerDecision {
        if todo.replan_count() >= self.config.max_replans {
            warn!(
                task_id = %update.task_id,
                replans = todo.replan_count(),
                "Replan budget exhausted, finishing"
            );
            let summary = self.summarize(
                todo,
                Some(&format!(
                    "Replan limit reached after {} replans; task {} could not be completed.",
                    todo.replan_count(),
                    update.task_id
                )),
            );
            return SchedulerDecision::finish(Some(update), summary);
        }

        info!(task_id = %update.task_id, replans = todo.replan_count(), "Requesting replan");
        let description = todo
            .get(&update.task_id)
            .map(|t| t.description.clone())
            .unwrap_or_default();
        let context = format!(
            "Task {} failed {} times: {}\n{}",
            update.task_id,
            update.failure_count,
            update.reason.as_deref().unwrap_or("unknown error"),
            todo.compact_text()
        );
        SchedulerDecision::next(
            Some(update),
            NextAction {
                next: NextTarget::Replan,
                task_id: None,
                task_description: description,
                context,
            },
        )
    }

    /// Results of completed tasks, oldest first, trimmed from the front to
    /// `context_max_chars`.
    pub fn accumulated_context(&self, todo: &TodoList) -> String {
        let full = todo
            .tasks()
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| {
                format!(
                    "[{}] {}: {}",
                    t.id,
                    t.assigned_agent,
                    t.result.as_deref().unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        keep_tail(&full, self.config.context_max_chars)
    }

    /// Close the loop on a fatal error: the in-flight task, if any, is failed
    /// and a FINISH decision carries the explanation.
    pub fn terminate(&self, todo: &mut TodoList, error: &ConductorError) -> SchedulerDecision {
        let mut update = None;
        if let Some(id) = todo.in_progress().map(|t| t.id.clone()) {
            // Fatal errors are not an attempt: record the reason, keep the count.
            let failed = todo
                .update_status(&id, TaskStatus::Failed)
                .and_then(|()| todo.note_error(&id, error.to_string()));
            match failed {
                Ok(()) => update = todo.get(&id).map(TaskUpdate::of),
                Err(e) => warn!(task_id = %id, error = %e, "Could not fail in-flight task"),
            }
        }
        warn!(error = %error, statistics = %todo.statistics(), "Query aborted");
        let summary = self.summarize(todo, Some(&format!("Aborted: {error}.")));
        SchedulerDecision::finish(update, summary)
    }

    /// Human-readable account of every task's outcome.
    pub fn summarize(&self, todo: &TodoList, headline: Option<&str>) -> String {
        let stats = todo.statistics();
        let mut out = String::new();
        if let Some(headline) = headline {
            out.push_str(headline);
            out.push('\n');
        }
        out.push_str(&format!(
            "{}/{} tasks completed, {} failed",
            stats.completed, stats.total, stats.failed
        ));
        if stats.pending + stats.in_progress > 0 {
            out.push_str(&format!(", {} not run", stats.pending + stats.in_progress));
        }
        for task in todo.tasks() {
            out.push('\n');
            out.push_str(&task_line(task));
        }
        out
    }
}

fn task_line(task: &Task) -> String {
    match task.status {
        TaskStatus::Completed => format!(
            "- [{}] {} completed: {}",
            task.id,
            task.assigned_agent,
            excerpt(task.result.as_deref().unwrap_or_default())
        ),
        TaskStatus::Failed => format!(
            "- [{}] {} failed after {} attempt(s): {}",
            task.id,
            task.assigned_agent,
            task.failure_count,
            task.last_error.as_deref().unwrap_or("unknown error")
        ),
        status => format!("- [{}] {} {status}", task.id, task.assigned_agent),
    }
}

fn excerpt(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(SUMMARY_EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Last `max_chars` characters of `text`.
fn keep_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
