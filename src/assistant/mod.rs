//! Client side of the hosted assistant service: threads, messages and
//! streamed runs, including the tool-output resubmission endpoint.

mod client;
pub mod error;
pub mod stream;
pub mod types;

pub use client::*;
pub use error::AssistantError;
pub use stream::EventStream;
pub use types::*;

/// Operations the chat front-end needs from the assistant service.
///
/// Injected into [`crate::chat::Conversation`] and
/// [`crate::dispatcher::StreamDispatcher`] so tests can script streams.
#[async_trait::async_trait]
pub trait AssistantService: Send + Sync {
    async fn create_thread(&self) -> Result<String, AssistantError>;

    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError>;

    /// Start a run of `assistant_id` on the thread and stream its events.
    async fn stream_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<EventStream, AssistantError>;

    /// Hand the outputs for a paused run back and stream the resumed run.
    async fn submit_tool_outputs_stream(
        &self,
        run: &RunRef,
        outputs: &[ToolOutput],
    ) -> Result<EventStream, AssistantError>;
}
