use crate::protocol::{Message, Part, TaskSendParams, TaskState};
use crate::registry::AgentHandle;
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, FailureKind};
use conductor_tools::ToolDescriptor;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A unit of work dispatched to one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Id the agent must echo in its reply.
    pub task_id: String,
    /// Conversation the task belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// What the agent is asked to do.
    pub description: String,
    /// Results of earlier tasks in the same query.
    #[serde(default)]
    pub context: String,
    /// Tools the agent may call while executing.
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

impl TaskRequest {
    /// Request without context, session or tools.
    pub fn new(task_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: None,
            description: description.into(),
            context: String::new(),
            tools: Vec::new(),
        }
    }

    /// Attach a conversation id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach results of earlier tasks.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Attach the tools the agent may call.
    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    /// Encode as A2A send parameters: the description as a text part, the
    /// context and tools as one data part.
    pub fn to_send_params(&self) -> TaskSendParams {
        let mut parts = vec![Part::text(&self.description)];
        if !self.context.is_empty() || !self.tools.is_empty() {
            parts.push(Part::data(serde_json::json!({
                "context": self.context,
                "tools": self.tools,
            })));
        }
        TaskSendParams {
            id: self.task_id.clone(),
            session_id: self.session_id.clone(),
            message: Message::user(parts),
            metadata: None,
        }
    }
}

/// Whether an agent reported success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResultStatus {
    /// The task was done.
    Success,
    /// The agent gave up on the task.
    Failure,
}

/// Terminal reply of an agent for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task the result is for.
    pub task_id: String,
    /// Agent that produced it.
    pub agent: String,
    /// Success or failure.
    pub status: TaskResultStatus,
    /// Output text; may be partial on failure.
    pub result_text: String,
    /// Why the task failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TaskResult {
    /// Successful result.
    pub fn success(task_id: impl Into<String>, result_text: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent: String::new(),
            status: TaskResultStatus::Success,
            result_text: result_text.into(),
            reason: None,
        }
    }

    /// Failed result with a reason.
    pub fn failure(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent: String::new(),
            status: TaskResultStatus::Failure,
            result_text: String::new(),
            reason: Some(reason.into()),
        }
    }

    /// Stamp the producing agent.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    /// Whether the agent reported success.
    pub fn is_success(&self) -> bool {
        self.status == TaskResultStatus::Success
    }

    /// Map a terminal A2A state to a result. Non-terminal states are malformed
    /// in a terminal position.
    pub fn from_state(
        task_id: &str,
        state: TaskState,
        text: String,
        status_message: String,
    ) -> ConductorResult<Self> {
        match state {
            TaskState::Completed => Ok(Self::success(task_id, text)),
            TaskState::Failed | TaskState::Canceled | TaskState::InputRequired => {
                let reason = if status_message.is_empty() {
                    format!("task {state}")
                } else {
                    status_message
                };
                let mut result = Self::failure(task_id, reason);
                result.result_text = text;
                Ok(result)
            }
            other => Err(ConductorError::MalformedResult(format!(
                "task {task_id} ended in non-terminal state '{other}'"
            ))),
        }
    }
}

/// One event of a streaming subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Task the event belongs to.
    pub task_id: String,
    /// Agent that emitted it.
    pub agent: String,
    /// What happened.
    pub kind: TaskEventKind,
}

/// Payload of a [`TaskEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEventKind {
    /// Intermediate state change.
    Status {
        /// New state.
        state: TaskState,
        /// Agent message accompanying the state.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Partial output.
    ArtifactChunk {
        /// The new output.
        text: String,
        /// Set on the last chunk of the artifact.
        last_chunk: bool,
    },
    /// Terminal: the agent finished, successfully or not.
    Completed {
        /// The agent's reply.
        result: TaskResult,
    },
    /// Terminal: the call itself failed.
    Error {
        /// How the call failed.
        kind: FailureKind,
        /// What went wrong.
        message: String,
    },
}

impl TaskEvent {
    /// Event for `task_id` from `agent`.
    pub fn new(task_id: impl Into<String>, agent: impl Into<String>, kind: TaskEventKind) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            kind,
        }
    }

    /// Whether the event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            TaskEventKind::Completed { .. } | TaskEventKind::Error { .. }
        )
    }
}

/// Transport seam between the scheduler and one agent.
#[async_trait]
pub trait AgentConnection: Send + Sync {
    /// Where this connection sends tasks.
    fn endpoint(&self) -> &str;

    /// Send a task and wait for the terminal reply.
    async fn send(&self, request: &TaskRequest) -> ConductorResult<TaskResult>;

    /// Send a task and receive its updates as a stream.
    async fn subscribe(&self, request: &TaskRequest) -> ConductorResult<TaskSubscription>;

    /// Best-effort notification that the caller gave up on a task.
    async fn cancel(&self, _task_id: &str) -> ConductorResult<()> {
        Ok(())
    }
}

/// A live, non-restartable stream of events for one task.
///
/// Yields zero or more intermediate events and then exactly one terminal
/// event. If the producer goes away before sending a terminal event, a
/// transport error is yielded in its place. After [`cancel`](Self::cancel)
/// nothing more is yielded.
pub struct TaskSubscription {
    task_id: String,
    agent: String,
    rx: mpsc::Receiver<TaskEvent>,
    producer: Option<JoinHandle<()>>,
    finished: bool,
}

impl TaskSubscription {
    /// Wrap a channel fed by `producer`. The producer is aborted when the
    /// subscription is cancelled or dropped.
    pub fn new(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        rx: mpsc::Receiver<TaskEvent>,
        producer: JoinHandle<()>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            rx,
            producer: Some(producer),
            finished: false,
        }
    }

    /// Task being streamed.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Agent streaming it.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Stop the producer and release its connection. Events already buffered
    /// are discarded.
    pub fn cancel(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
        self.rx.close();
        if !self.finished {
            debug!(task_id = %self.task_id, agent = %self.agent, "Subscription cancelled");
        }
        self.finished = true;
    }

    /// Next event, or `None` once the stream is over.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        self.next().await
    }

    /// Drain the stream and return its terminal outcome.
    pub async fn collect_result(mut self) -> ConductorResult<TaskResult> {
        while let Some(event) = self.next_event().await {
            match event.kind {
                TaskEventKind::Completed { result } => return Ok(result),
                TaskEventKind::Error { kind, message } => return Err(error_for(kind, message)),
                _ => {}
            }
        }
        Err(ConductorError::Cancelled)
    }
}

impl Stream for TaskSubscription {
    type Item = TaskEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TaskEvent>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    this.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(Some(TaskEvent::new(
                    this.task_id.clone(),
                    this.agent.clone(),
                    TaskEventKind::Error {
                        kind: FailureKind::Transport,
                        message: "stream closed before a terminal event".into(),
                    },
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TaskSubscription {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

/// Rebuild the error a terminal `Error` event stands for.
pub fn error_for(kind: FailureKind, message: String) -> ConductorError {
    match kind {
        FailureKind::Transport => ConductorError::Transport(message),
        FailureKind::AgentReported => ConductorError::AgentFailure(message),
        FailureKind::Malformed => ConductorError::MalformedResult(message),
    }
}

/// Sends tasks to resolved agents with a per-call deadline.
#[derive(Debug, Clone)]
pub struct TaskTransport {
    timeout: Duration,
}

impl TaskTransport {
    /// Transport with a per-call deadline.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The per-call deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a task and wait for the agent's terminal reply.
    ///
    /// Timeouts become `Transport` errors. A reply for a different task id is
    /// `MalformedResult`.
    pub async fn send_sync(
        &self,
        handle: &AgentHandle,
        request: &TaskRequest,
    ) -> ConductorResult<TaskResult> {
        let agent = handle.name();
        info!(task_id = %request.task_id, agent = %agent, "Sending task");

        let result = tokio::time::timeout(self.timeout, handle.connection().send(request))
            .await
            .map_err(|_| {
                ConductorError::Transport(format!(
                    "agent '{agent}' did not answer within {}s",
                    self.timeout.as_secs()
                ))
            })??;

        check_task_id(request, &result)?;
        Ok(result.with_agent(agent))
    }

    /// Open a streaming subscription. Only establishing the stream is bound
    /// by the timeout; consuming it is up to the caller (see
    /// [`stream_to_result`](Self::stream_to_result)).
    pub async fn send_streaming(
        &self,
        handle: &AgentHandle,
        request: &TaskRequest,
    ) -> ConductorResult<TaskSubscription> {
        let agent = handle.name();
        info!(task_id = %request.task_id, agent = %agent, "Subscribing to task");

        tokio::time::timeout(self.timeout, handle.connection().subscribe(request))
            .await
            .map_err(|_| {
                ConductorError::Transport(format!(
                    "agent '{agent}' did not open a stream within {}s",
                    self.timeout.as_secs()
                ))
            })?
    }

    /// Stream a task to completion, forwarding every event to `progress`.
    ///
    /// The timeout also bounds the gap between two events; an agent that goes
    /// quiet is cancelled and reported as a `Transport` error.
    pub async fn stream_to_result(
        &self,
        handle: &AgentHandle,
        request: &TaskRequest,
        progress: Option<&mpsc::Sender<TaskEvent>>,
    ) -> ConductorResult<TaskResult> {
        let mut subscription = self.send_streaming(handle, request).await?;
        loop {
            let event = match tokio::time::timeout(self.timeout, subscription.next_event()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    subscription.cancel();
                    warn!(
                        task_id = %request.task_id,
                        agent = %handle.name(),
                        timeout_secs = self.timeout.as_secs(),
                        "Stream went idle"
                    );
                    return Err(ConductorError::Transport(format!(
                        "agent '{}' sent no event within {}s",
                        handle.name(),
                        self.timeout.as_secs()
                    )));
                }
            };
            if let Some(tx) = progress {
                if tx.send(event.clone()).await.is_err() {
                    debug!(task_id = %request.task_id, "Progress receiver dropped");
                }
            }
            match event.kind {
                TaskEventKind::Completed { result } => {
                    check_task_id(request, &result)?;
                    return Ok(result.with_agent(handle.name()));
                }
                TaskEventKind::Error { kind, message } => return Err(error_for(kind, message)),
                _ => {}
            }
        }
        Err(ConductorError::Cancelled)
    }
}

impl Default for TaskTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

fn check_task_id(request: &TaskRequest, result: &TaskResult) -> ConductorResult<()> {
    if result.task_id != request.task_id {
        warn!(
            expected = %request.task_id,
            got = %result.task_id,
            "Agent replied for a different task"
        );
        return Err(ConductorError::MalformedResult(format!(
            "reply for task '{}' while waiting on '{}'",
            result.task_id, request.task_id
        )));
    }
    Ok(())
}
