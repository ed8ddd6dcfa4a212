use crate::card::AgentDescriptor;
use crate::protocol::{
    text_of, JsonRpcRequest, JsonRpcResponse, StreamingResult, Task, TaskIdParams, METHOD_CANCEL,
    METHOD_SEND, METHOD_SEND_SUBSCRIBE, STREAM_DONE,
};
use crate::transport::{
    AgentConnection, TaskEvent, TaskEventKind, TaskRequest, TaskResult, TaskSubscription,
};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, FailureKind};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// JSON-RPC client for one remote A2A agent.
pub struct A2aClient {
    http: reqwest::Client,
    agent: String,
    url: String,
}

impl A2aClient {
    /// Client with its own HTTP connection pool.
    pub fn new(agent: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), agent, url)
    }

    /// Build on a shared HTTP client so connections are pooled.
    pub fn with_http(
        http: reqwest::Client,
        agent: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            agent: agent.into(),
            url: url.into(),
        }
    }

    /// Name of the agent this client talks to.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    async fn post(&self, request: &JsonRpcRequest, accept: &str) -> ConductorResult<reqwest::Response> {
        debug!(agent = %self.agent, method = %request.method, id = %request.id, "A2A request");

        let resp = self
            .http
            .post(&self.url)
            .header("accept", accept)
            .json(request)
            .send()
            .await
            .map_err(|e| ConductorError::Transport(format!("{}: {e}", self.agent)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ConductorError::Transport(format!(
                "agent '{}' returned HTTP {status}: {body}",
                self.agent
            )));
        }
        Ok(resp)
    }

    /// Send one JSON-RPC call and return its `result`.
    async fn rpc(&self, method: &str, params: serde_json::Value) -> ConductorResult<serde_json::Value> {
        let request = JsonRpcRequest::new(method, Some(params));
        let resp = self.post(&request, "application/json").await?;

        let body = resp
            .text()
            .await
            .map_err(|e| ConductorError::Transport(format!("{}: {e}", self.agent)))?;
        let response: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
            ConductorError::MalformedResult(format!("agent '{}' sent invalid JSON-RPC: {e}", self.agent))
        })?;

        if let Some(err) = response.error {
            return Err(ConductorError::AgentFailure(format!(
                "{} (code {})",
                err.message, err.code
            )));
        }
        response.result.ok_or_else(|| {
            ConductorError::MalformedResult(format!("agent '{}' sent no result", self.agent))
        })
    }

    /// Notify the agent that a task is abandoned.
    pub async fn cancel_task(&self, task_id: &str) -> ConductorResult<()> {
        let params = serde_json::to_value(TaskIdParams {
            id: task_id.to_string(),
        })?;
        self.rpc(METHOD_CANCEL, params).await?;
        info!(agent = %self.agent, task_id = %task_id, "Cancel sent");
        Ok(())
    }
}

#[async_trait]
impl AgentConnection for A2aClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn send(&self, request: &TaskRequest) -> ConductorResult<TaskResult> {
        let params = serde_json::to_value(request.to_send_params())?;
        let value = self.rpc(METHOD_SEND, params).await?;
        let task: Task = serde_json::from_value(value).map_err(|e| {
            ConductorError::MalformedResult(format!("agent '{}' sent an invalid task: {e}", self.agent))
        })?;

        TaskResult::from_state(
            &task.id,
            task.status.state,
            task.result_text(),
            task.status.message_text(),
        )
    }

    async fn subscribe(&self, request: &TaskRequest) -> ConductorResult<TaskSubscription> {
        let params = serde_json::to_value(request.to_send_params())?;
        let rpc = JsonRpcRequest::new(METHOD_SEND_SUBSCRIBE, Some(params));
        let resp = self.post(&rpc, "text/event-stream").await?;

        let (tx, rx) = mpsc::channel::<TaskEvent>(256);
        let byte_stream = resp.bytes_stream();
        let task_id = request.task_id.clone();
        let agent = self.agent.clone();

        let producer = tokio::spawn({
            let task_id = task_id.clone();
            let agent = agent.clone();
            async move {
                let mut reader = SseReader::new(task_id, agent, tx);
                let mut stream = byte_stream;
                let mut lines = LineBuffer::default();

                while let Some(chunk_result) = stream.next().await {
                    let chunk = match chunk_result {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            reader
                                .emit(TaskEventKind::Error {
                                    kind: FailureKind::Transport,
                                    message: format!("Stream read error: {e}"),
                                })
                                .await;
                            return;
                        }
                    };

                    lines.extend(&chunk);

                    while let Some(line) = lines.next_line() {
                        let line = match line {
                            Ok(line) => line,
                            Err(e) => {
                                let message = format!("invalid UTF-8 in stream: {e}");
                                reader.fail(FailureKind::Malformed, message).await;
                                return;
                            }
                        };
                        let line = line.trim();
                        if line.is_empty() || line.starts_with(':') {
                            continue;
                        }
                        if let Some(data) = line.strip_prefix("data:") {
                            if !reader.handle_data(data.trim()).await {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(TaskSubscription::new(task_id, agent, rx, producer))
    }

    async fn cancel(&self, task_id: &str) -> ConductorResult<()> {
        self.cancel_task(task_id).await
    }
}

/// Splits a byte stream into lines. Bytes are held until a full line is in,
/// so a character split across network chunks decodes intact.
#[derive(Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<Result<String, std::str::Utf8Error>> {
        let end = self.bytes.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=end).collect();
        Some(std::str::from_utf8(&line[..end]).map(str::to_string))
    }
}

/// Turns `data:` payloads of an A2A event stream into task events.
struct SseReader {
    task_id: String,
    agent: String,
    tx: mpsc::Sender<TaskEvent>,
    artifact_text: String,
}

impl SseReader {
    fn new(task_id: String, agent: String, tx: mpsc::Sender<TaskEvent>) -> Self {
        Self {
            task_id,
            agent,
            tx,
            artifact_text: String::new(),
        }
    }

    /// Returns false once the stream is over or the subscriber is gone.
    async fn emit(&self, kind: TaskEventKind) -> bool {
        self.tx
            .send(TaskEvent::new(self.task_id.clone(), self.agent.clone(), kind))
            .await
            .is_ok()
    }

    async fn fail(&self, kind: FailureKind, message: String) -> bool {
        warn!(task_id = %self.task_id, agent = %self.agent, %kind, error = %message, "Stream failed");
        self.emit(TaskEventKind::Error { kind, message }).await;
        false
    }

    async fn handle_data(&mut self, data: &str) -> bool {
        if data == STREAM_DONE {
            return self
                .fail(
                    FailureKind::Malformed,
                    "stream ended without a final status".into(),
                )
                .await;
        }

        let response: JsonRpcResponse = match serde_json::from_str(data) {
            Ok(r) => r,
            Err(e) => {
                return self
                    .fail(FailureKind::Malformed, format!("invalid event: {e}"))
                    .await
            }
        };
        if let Some(err) = response.error {
            return self
                .fail(
                    FailureKind::AgentReported,
                    format!("{} (code {})", err.message, err.code),
                )
                .await;
        }
        let Some(result) = response.result else {
            return self
                .fail(FailureKind::Malformed, "event without result".into())
                .await;
        };
        let event: StreamingResult = match serde_json::from_value(result) {
            Ok(e) => e,
            Err(e) => {
                return self
                    .fail(FailureKind::Malformed, format!("unknown event shape: {e}"))
                    .await
            }
        };

        match event {
            StreamingResult::Artifact(update) => {
                let text = text_of(&update.artifact.parts);
                if !self.artifact_text.is_empty() && !text.is_empty() {
                    self.artifact_text.push('\n');
                }
                self.artifact_text.push_str(&text);
                self.emit(TaskEventKind::ArtifactChunk {
                    text,
                    last_chunk: update.artifact.last_chunk.unwrap_or(false),
                })
                .await
            }
            StreamingResult::Status(update) if !update.is_final => {
                let message = update.status.message.as_ref().map(|m| m.text());
                self.emit(TaskEventKind::Status {
                    state: update.status.state,
                    message,
                })
                .await
            }
            StreamingResult::Status(update) => {
                let status_text = update.status.message_text();
                let text = if self.artifact_text.is_empty() {
                    status_text.clone()
                } else {
                    std::mem::take(&mut self.artifact_text)
                };
                match TaskResult::from_state(&update.id, update.status.state, text, status_text) {
                    Ok(result) => {
                        let result = result.with_agent(self.agent.clone());
                        self.emit(TaskEventKind::Completed { result }).await;
                        false
                    }
                    Err(e) => self.fail(FailureKind::Malformed, e.to_string()).await,
                }
            }
        }
    }
}

/// Fetch an agent card from `base_url` + `card_path`.
pub async fn fetch_agent_card(
    http: &reqwest::Client,
    base_url: &str,
    card_path: &str,
) -> ConductorResult<AgentDescriptor> {
    let url = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        card_path.trim_start_matches('/')
    );
    let resp = http
        .get(&url)
        .send()
        .await
        .map_err(|e| ConductorError::Transport(format!("{url}: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ConductorError::Transport(format!(
            "agent card {url} returned HTTP {status}"
        )));
    }
    let card: AgentDescriptor = resp
        .json()
        .await
        .map_err(|e| ConductorError::MalformedResult(format!("agent card {url}: {e}")))?;

    info!(agent = %card.name, url = %url, skills = card.skills.len(), "Fetched agent card");
    Ok(card)
}
