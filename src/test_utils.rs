use std::collections::VecDeque;
use std::sync::Mutex;

use crate::assistant::{
    AssistantError, AssistantService, EventStream, PendingToolCall, RunRef, StreamEvent,
    ToolOutput,
};
use crate::reply::ReplySurface;
use crate::tools::{Tool, ToolDef};

pub type Script = Vec<Result<StreamEvent, AssistantError>>;

/// Assistant service double. Each opened stream (run or resubmission)
/// pops the next script in order; every call is recorded.
#[derive(Default)]
pub struct ScriptedService {
    scripts: Mutex<VecDeque<Script>>,
    pub threads_created: Mutex<usize>,
    pub messages: Mutex<Vec<(String, String)>>,
    pub runs: Mutex<Vec<(String, String)>>,
    pub submissions: Mutex<Vec<(RunRef, Vec<ToolOutput>)>>,
}

impl ScriptedService {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        }
    }

    fn next_stream(&self) -> EventStream {
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Box::pin(futures::stream::iter(script))
    }

    pub fn threads_created(&self) -> usize {
        *self.threads_created.lock().unwrap()
    }

    pub fn submissions(&self) -> Vec<(RunRef, Vec<ToolOutput>)> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AssistantService for ScriptedService {
    async fn create_thread(&self) -> Result<String, AssistantError> {
        let mut n = self.threads_created.lock().unwrap();
        *n += 1;
        Ok(format!("thread_{n}"))
    }

    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError> {
        self.messages
            .lock()
            .unwrap()
            .push((thread_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn stream_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<EventStream, AssistantError> {
        self.runs
            .lock()
            .unwrap()
            .push((thread_id.to_string(), assistant_id.to_string()));
        Ok(self.next_stream())
    }

    async fn submit_tool_outputs_stream(
        &self,
        run: &RunRef,
        outputs: &[ToolOutput],
    ) -> Result<EventStream, AssistantError> {
        self.submissions
            .lock()
            .unwrap()
            .push((run.clone(), outputs.to_vec()));
        Ok(self.next_stream())
    }
}

/// Surface that records every render call.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    pub frames: Vec<String>,
}

impl ReplySurface for RecordingSurface {
    fn render(&mut self, text: &str) {
        self.frames.push(text.to_string());
    }
}

/// Tool returning a fixed output.
pub struct FixedTool {
    pub name: &'static str,
    pub output: &'static str,
}

#[async_trait::async_trait]
impl Tool for FixedTool {
    fn name(&self) -> &str {
        self.name
    }

    fn definition(&self) -> ToolDef {
        ToolDef::function(self.name, "fixed output", serde_json::json!({"type": "object"}))
    }

    async fn call(&self, _arguments: &str) -> String {
        self.output.to_string()
    }
}

pub fn text(fragment: &str) -> Result<StreamEvent, AssistantError> {
    Ok(StreamEvent::TextDelta(fragment.to_string()))
}

pub fn requires_action(run_id: &str, calls: &[(&str, &str)]) -> Result<StreamEvent, AssistantError> {
    Ok(StreamEvent::RequiresAction {
        run: RunRef {
            id: run_id.to_string(),
            thread_id: "thread_1".to_string(),
        },
        calls: calls
            .iter()
            .map(|(id, name)| PendingToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: "{}".to_string(),
            })
            .collect(),
    })
}
