use crate::protocol::TaskState;
use crate::transport::{
    AgentConnection, TaskEvent, TaskEventKind, TaskRequest, TaskResult, TaskSubscription,
};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, FailureKind};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Something that can turn a task into a textual result.
///
/// This is the boundary to whatever actually does the work (an LLM call, a
/// tool pipeline, a test script). Returning `AgentFailure` means the agent ran
/// and gave up; other errors are treated as transport problems.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Do the work and return the result text.
    async fn execute(&self, request: &TaskRequest) -> ConductorResult<String>;

    /// Execute while pushing partial output to `chunks`. The default emits the
    /// whole result as one chunk.
    async fn execute_streaming(
        &self,
        request: &TaskRequest,
        chunks: mpsc::Sender<String>,
    ) -> ConductorResult<String> {
        let text = self.execute(request).await?;
        let _ = chunks.send(text.clone()).await;
        Ok(text)
    }
}

/// Runs an [`AgentExecutor`] in-process behind the connection seam.
pub struct LocalConnection {
    agent: String,
    endpoint: String,
    executor: Arc<dyn AgentExecutor>,
}

impl LocalConnection {
    /// Wrap `executor` as the agent named `agent`.
    pub fn new(agent: impl Into<String>, executor: Arc<dyn AgentExecutor>) -> Self {
        let agent = agent.into();
        Self {
            endpoint: format!("local://{agent}"),
            agent,
            executor,
        }
    }
}

fn outcome(task_id: &str, result: ConductorResult<String>) -> ConductorResult<TaskResult> {
    match result {
        Ok(text) => Ok(TaskResult::success(task_id, text)),
        Err(ConductorError::AgentFailure(reason)) => Ok(TaskResult::failure(task_id, reason)),
        Err(ConductorError::MalformedResult(msg)) => Err(ConductorError::MalformedResult(msg)),
        Err(ConductorError::Transport(msg)) => Err(ConductorError::Transport(msg)),
        Err(other) => Err(ConductorError::Transport(other.to_string())),
    }
}

#[async_trait]
impl AgentConnection for LocalConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, request: &TaskRequest) -> ConductorResult<TaskResult> {
        let result = self.executor.execute(request).await;
        outcome(&request.task_id, result).map(|r| r.with_agent(self.agent.clone()))
    }

    async fn subscribe(&self, request: &TaskRequest) -> ConductorResult<TaskSubscription> {
        let (tx, rx) = mpsc::channel::<TaskEvent>(64);
        let executor = Arc::clone(&self.executor);
        let request = request.clone();
        let agent = self.agent.clone();
        let task_id = request.task_id.clone();

        let producer = tokio::spawn(async move {
            let event = |kind| TaskEvent::new(request.task_id.clone(), agent.clone(), kind);
            let _ = tx
                .send(event(TaskEventKind::Status {
                    state: TaskState::Working,
                    message: None,
                }))
                .await;

            let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(64);
            let run = executor.execute_streaming(&request, chunk_tx);
            tokio::pin!(run);

            let result = loop {
                tokio::select! {
                    Some(chunk) = chunk_rx.recv() => {
                        let kind = TaskEventKind::ArtifactChunk { text: chunk, last_chunk: false };
                        if tx.send(event(kind)).await.is_err() {
                            return;
                        }
                    }
                    result = &mut run => break result,
                }
            };
            // Chunks sent just before the executor returned.
            while let Ok(chunk) = chunk_rx.try_recv() {
                let kind = TaskEventKind::ArtifactChunk {
                    text: chunk,
                    last_chunk: false,
                };
                if tx.send(event(kind)).await.is_err() {
                    return;
                }
            }

            let terminal = match outcome(&request.task_id, result) {
                Ok(result) => TaskEventKind::Completed {
                    result: result.with_agent(agent.clone()),
                },
                Err(e) => TaskEventKind::Error {
                    kind: e.failure_kind().unwrap_or(FailureKind::Transport),
                    message: e.to_string(),
                },
            };
            let _ = tx.send(event(terminal)).await;
        });

        Ok(TaskSubscription::new(task_id, self.agent.clone(), rx, producer))
    }
}
