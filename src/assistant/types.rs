use serde::{Deserialize, Serialize};

/// Identifies a run paused on `requires_action`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRef {
    pub id: String,
    pub thread_id: String,
}

/// A function call the remote run is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String, // raw JSON string as sent by the service
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Normalized event decoded from an assistant run stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    RequiresAction {
        run: RunRef,
        calls: Vec<PendingToolCall>,
    },
    /// Event kinds that are not acted upon; carries the SSE event name.
    Other(String),
}

// Request bodies

#[derive(Debug, Clone, Serialize)]
pub struct CreateMessageRequest<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRunRequest<'a> {
    pub assistant_id: &'a str,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitToolOutputsRequest<'a> {
    pub tool_outputs: &'a [ToolOutput],
    pub stream: bool,
}

// Response bodies

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadObject {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantObject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

// Streamed payloads

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaEvent {
    pub delta: MessageDelta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub content: Vec<MessageDeltaContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaContent {
    #[serde(rename = "type")]
    pub kind: String, // "text", "image_file", ...
    #[serde(default)]
    pub text: Option<TextDelta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextDelta {
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunObject {
    pub id: String,
    pub thread_id: String,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequiredAction {
    pub submit_tool_outputs: SubmitToolOutputs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitToolOutputs {
    #[serde(default)]
    pub tool_calls: Vec<RequiredToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequiredToolCall {
    pub id: String,
    pub function: RequiredFunction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequiredFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl From<RunObject> for StreamEvent {
    fn from(run: RunObject) -> Self {
        let calls = run
            .required_action
            .map(|action| action.submit_tool_outputs.tool_calls)
            .unwrap_or_default()
            .into_iter()
            .map(|call| PendingToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();
        StreamEvent::RequiresAction {
            run: RunRef {
                id: run.id,
                thread_id: run.thread_id,
            },
            calls,
        }
    }
}
