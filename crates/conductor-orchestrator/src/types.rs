use chrono::{DateTime, Utc};
use conductor_a2a::TaskResult;
use conductor_core::{ConductorError, ConductorResult, FailureKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a task in a [`TodoList`](crate::TodoList).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be dispatched.
    Pending,
    /// Dispatched, reply not yet applied.
    InProgress,
    /// Done.
    Completed,
    /// Failed for good, or awaiting a retry.
    Failed,
}

impl TaskStatus {
    /// `Completed` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of work for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique within its list.
    pub id: String,
    /// What the agent is asked to do.
    pub description: String,
    /// Agent the task is routed to.
    pub assigned_agent: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Failed attempts so far. Never decreases.
    pub failure_count: u32,
    /// Output of the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Reason given by the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// How the last attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_kind: Option<FailureKind>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Pending task with a generated id.
    pub fn new(description: impl Into<String>, assigned_agent: impl Into<String>) -> Self {
        Self::with_id(
            format!("task-{}", Uuid::new_v4().simple()),
            description,
            assigned_agent,
        )
    }

    /// Pending task with a caller-chosen id.
    pub fn with_id(
        id: impl Into<String>,
        description: impl Into<String>,
        assigned_agent: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            assigned_agent: assigned_agent.into(),
            status: TaskStatus::Pending,
            failure_count: 0,
            result: None,
            last_error: None,
            last_failure_kind: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// How the just-executed task changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    /// Task that changed.
    pub task_id: String,
    /// Its new status.
    pub status: TaskStatus,
    /// Why the last attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Failed attempts so far.
    pub failure_count: u32,
}

impl TaskUpdate {
    pub(crate) fn of(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            reason: task.last_error.clone(),
            failure_count: task.failure_count,
        }
    }
}

/// Where the next action goes.
///
/// On the wire this is the agent name, or the literal `"replan"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NextTarget {
    /// Dispatch to the named agent.
    Agent(String),
    /// Ask the planner for a new tail of tasks.
    Replan,
}

/// Wire sentinel for [`NextTarget::Replan`].
pub const REPLAN: &str = "replan";

impl From<String> for NextTarget {
    fn from(s: String) -> Self {
        if s == REPLAN {
            NextTarget::Replan
        } else {
            NextTarget::Agent(s)
        }
    }
}

impl From<NextTarget> for String {
    fn from(t: NextTarget) -> Self {
        match t {
            NextTarget::Agent(name) => name,
            NextTarget::Replan => REPLAN.to_string(),
        }
    }
}

impl std::fmt::Display for NextTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NextTarget::Agent(name) => f.write_str(name),
            NextTarget::Replan => f.write_str(REPLAN),
        }
    }
}

/// What to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextAction {
    /// Agent to call, or a replan.
    pub next: NextTarget,
    /// Task being dispatched; absent for a replan directive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// What the agent is asked to do, or the replan instruction.
    pub task_description: String,
    /// Results of earlier tasks, or the failure that triggered a replan.
    pub context: String,
}

/// One scheduler verdict: either a next action or a final summary.
///
/// The constructors are the only way to build one, so exactly one of the two
/// is always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerDecision {
    #[serde(skip_serializing_if = "Option::is_none")]
    task_update: Option<TaskUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_action: Option<NextAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}

impl SchedulerDecision {
    /// Decision that dispatches or replans.
    pub fn next(task_update: Option<TaskUpdate>, action: NextAction) -> Self {
        Self {
            task_update,
            next_action: Some(action),
            summary: None,
        }
    }

    /// Decision that ends the query.
    pub fn finish(task_update: Option<TaskUpdate>, summary: impl Into<String>) -> Self {
        Self {
            task_update,
            next_action: None,
            summary: Some(summary.into()),
        }
    }

    /// Change applied to the task that just ran.
    pub fn task_update(&self) -> Option<&TaskUpdate> {
        self.task_update.as_ref()
    }

    /// Next step, absent on FINISH.
    pub fn next_action(&self) -> Option<&NextAction> {
        self.next_action.as_ref()
    }

    /// Final report, present only on FINISH.
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Whether the query is over.
    pub fn is_finish(&self) -> bool {
        self.summary.is_some()
    }

    /// Whether the decision asks for a replan.
    pub fn is_replan(&self) -> bool {
        matches!(
            self.next_action,
            Some(NextAction {
                next: NextTarget::Replan,
                ..
            })
        )
    }

    /// Agent name when this decision dispatches a task.
    pub fn dispatch_target(&self) -> Option<&str> {
        match &self.next_action {
            Some(NextAction {
                next: NextTarget::Agent(name),
                ..
            }) => Some(name),
            _ => None,
        }
    }
}

/// Result of executing the in-flight task, as fed back to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Task the outcome is for.
    pub task_id: String,
    /// Success or failure.
    pub kind: OutcomeKind,
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The agent did the task.
    Success {
        /// Output of the task.
        result_text: String,
    },
    /// The attempt failed.
    Failure {
        /// How it failed.
        kind: FailureKind,
        /// What went wrong.
        reason: String,
    },
}

impl TaskOutcome {
    /// Successful outcome.
    pub fn success(task_id: impl Into<String>, result_text: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            kind: OutcomeKind::Success {
                result_text: result_text.into(),
            },
        }
    }

    /// Failed outcome of the given kind.
    pub fn failure(task_id: impl Into<String>, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            kind: OutcomeKind::Failure {
                kind,
                reason: reason.into(),
            },
        }
    }

    /// Fold a transport call into an outcome.
    ///
    /// Recoverable errors become failures; anything else is returned as is
    /// and ends the query.
    pub fn from_result(task_id: &str, result: ConductorResult<TaskResult>) -> ConductorResult<Self> {
        match result {
            Ok(r) if r.is_success() => Ok(Self::success(task_id, r.result_text)),
            Ok(r) => Ok(Self::failure(
                task_id,
                FailureKind::AgentReported,
                r.reason.unwrap_or_else(|| "agent reported failure".to_string()),
            )),
            Err(e) => match e.failure_kind() {
                Some(kind) => Ok(Self::failure(task_id, kind, e.to_string())),
                None => Err(e),
            },
        }
    }

    /// Whether the attempt succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.kind, OutcomeKind::Success { .. })
    }
}

/// Task as a planner proposes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTask {
    /// Optional caller-chosen id.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "taskId",
        alias = "uniqueId"
    )]
    pub id: Option<String>,
    /// What the agent is asked to do.
    pub description: String,
    /// Agent the task goes to.
    #[serde(alias = "assignedAgent")]
    pub agent: String,
}

impl PlannedTask {
    /// Planned task with a generated id.
    pub fn new(agent: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: None,
            description: description.into(),
            agent: agent.into(),
        }
    }

    /// Turn into a pending task.
    pub fn into_task(self) -> Task {
        match self.id {
            Some(id) => Task::with_id(id, self.description, self.agent),
            None => Task::new(self.description, self.agent),
        }
    }
}

/// Identity of one originating query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// The originating query.
    pub query: String,
    /// Owner of the request; scopes its tools.
    pub username: String,
    /// Unique per run; generated by default.
    pub request_id: String,
    /// Conversation id forwarded to agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// User tools to load for this request; invalidated when the run ends.
    #[serde(default)]
    pub tools: Vec<conductor_tools::ToolDescriptor>,
}

impl RunRequest {
    /// Request with a fresh request id.
    pub fn new(query: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            username: username.into(),
            request_id: Uuid::new_v4().simple().to_string(),
            session_id: None,
            tools: Vec::new(),
        }
    }

    /// Use a caller-chosen request id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Attach a conversation id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Tools the agents of this run may call.
    pub fn with_tools(mut self, tools: Vec<conductor_tools::ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The scheduler reached FINISH.
    Finished,
    /// A fatal error (unknown agent, planning failure) ended the loop.
    Aborted,
    /// The caller cancelled the query.
    Cancelled,
}

/// What a query run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Request the report is for.
    pub request_id: String,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Human-readable account of every task.
    pub summary: String,
    /// Final state of the task list.
    pub todo_list: crate::TodoList,
    /// Every scheduler decision, in order.
    pub decisions: Vec<SchedulerDecision>,
}

impl RunReport {
    /// Build an error from a non-finished report, for callers that want `?`.
    pub fn into_result(self) -> ConductorResult<Self> {
        match self.outcome {
            RunOutcome::Finished => Ok(self),
            RunOutcome::Cancelled => Err(ConductorError::Cancelled),
            RunOutcome::Aborted => Err(ConductorError::Orchestrator(self.summary)),
        }
    }
}
