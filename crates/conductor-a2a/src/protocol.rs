//! A2A (agent-to-agent) JSON-RPC 2.0 message types.

use serde::{Deserialize, Serialize};

/// Send a task and wait for the terminal task object.
pub const METHOD_SEND: &str = "tasks/send";
/// Send a task and receive updates as server-sent events.
pub const METHOD_SEND_SUBSCRIBE: &str = "tasks/sendSubscribe";
/// Ask the agent to stop working on a task.
pub const METHOD_CANCEL: &str = "tasks/cancel";

/// Line that ends an A2A event stream.
pub const STREAM_DONE: &str = "[DONE]";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Correlates the response with this request.
    pub id: String,
    /// Method name, such as [`METHOD_SEND`].
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request with a fresh UUIDv4 hex id.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: uuid::Uuid::new_v4().simple().to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version echoed by the server.
    #[serde(default)]
    #[allow(dead_code)]
    pub jsonrpc: String,
    /// Id of the request this answers.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    /// Present on success.
    pub result: Option<serde_json::Value>,
    /// Present on failure.
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable description.
    pub message: String,
    /// Extra detail supplied by the server.
    pub data: Option<serde_json::Value>,
}

/// Parameters of `tasks/send` and `tasks/sendSubscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSendParams {
    /// Task id chosen by the caller.
    pub id: String,
    /// Groups tasks of one conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// The task itself, as a user message.
    pub message: Message,
    /// Free-form caller metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Parameters of `tasks/cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIdParams {
    /// Task to cancel.
    pub id: String,
}

/// Who authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The caller.
    User,
    /// The remote agent.
    Agent,
}

/// One conversational turn, made of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the turn.
    pub role: MessageRole,
    /// Content, in order.
    pub parts: Vec<Part>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// User message built from parts.
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: MessageRole::User,
            parts,
            metadata: None,
        }
    }

    /// Agent message with a single text part.
    pub fn agent_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Agent,
            parts: vec![Part::text(text)],
            metadata: None,
        }
    }

    /// Concatenated text parts of the message.
    pub fn text(&self) -> String {
        text_of(&self.parts)
    }
}

/// Content of a message or artifact, tagged on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    /// Plain text.
    Text {
        /// The text.
        text: String,
        /// Free-form metadata.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    /// Structured JSON content.
    Data {
        /// The JSON value.
        data: serde_json::Value,
        /// Free-form metadata.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    /// A file, inline or by reference.
    File {
        /// The file payload.
        file: FileContent,
        /// Free-form metadata.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
}

impl Part {
    /// Text part without metadata.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text {
            text: text.into(),
            metadata: None,
        }
    }

    /// Data part without metadata.
    pub fn data(data: serde_json::Value) -> Self {
        Part::Data {
            data,
            metadata: None,
        }
    }
}

/// File payload, inline (`bytes`, base64) or by reference (`uri`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    /// Original file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// MIME type of the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64 content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
    /// Where the content can be fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Concatenate the text parts, one per line.
pub fn text_of(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lifecycle state of a remote A2A task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Accepted, not started.
    Submitted,
    /// Being worked on.
    Working,
    /// Waiting for input the caller cannot give.
    InputRequired,
    /// Finished successfully.
    Completed,
    /// Stopped at the caller's request.
    Canceled,
    /// Finished unsuccessfully.
    Failed,
    /// Any state this client does not know.
    #[serde(other)]
    Unknown,
}

impl TaskState {
    /// States after which the agent does no more work on the task.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Canceled | TaskState::Failed | TaskState::InputRequired
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::InputRequired => "input-required",
            TaskState::Completed => "completed",
            TaskState::Canceled => "canceled",
            TaskState::Failed => "failed",
            TaskState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// State of a task at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Lifecycle state.
    pub state: TaskState,
    /// Agent message accompanying the state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// RFC 3339 time of the update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl TaskStatus {
    /// Status stamped with the current time.
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Attach an agent message.
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    /// Text of the attached message, empty if none.
    pub fn message_text(&self) -> String {
        self.message.as_ref().map(Message::text).unwrap_or_default()
    }
}

/// A remote task as returned by `tasks/send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task id.
    pub id: String,
    /// Session the task belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Latest status.
    pub status: TaskStatus,
    /// Output produced so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Artifact>>,
    /// Free-form agent metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Task {
    /// Text of all artifacts, or the status message when there are none.
    pub fn result_text(&self) -> String {
        match &self.artifacts {
            Some(artifacts) if !artifacts.is_empty() => artifacts
                .iter()
                .map(|a| text_of(&a.parts))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            _ => self.status.message_text(),
        }
    }
}

/// Output produced by an agent for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Artifact name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// What the artifact holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Content, in order.
    pub parts: Vec<Part>,
    /// Position among the task's artifacts.
    #[serde(default)]
    pub index: u32,
    /// Whether the parts extend an earlier chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append: Option<bool>,
    /// Set on the final chunk of a streamed artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_chunk: Option<bool>,
}

/// Streaming event reporting a state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusUpdateEvent {
    /// Task id.
    pub id: String,
    /// New status.
    pub status: TaskStatus,
    /// Set on the last event of the stream.
    #[serde(rename = "final", default)]
    pub is_final: bool,
}

/// Streaming event carrying artifact output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskArtifactUpdateEvent {
    /// Task id.
    pub id: String,
    /// The new output.
    pub artifact: Artifact,
}

/// Result payload of one `tasks/sendSubscribe` event.
///
/// Status events are tried first; they are the only ones carrying `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamingResult {
    /// A state change.
    Status(TaskStatusUpdateEvent),
    /// New output.
    Artifact(TaskArtifactUpdateEvent),
}
