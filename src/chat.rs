use std::sync::Arc;

use tracing::{error, info, warn};

use crate::assistant::{AssistantError, AssistantService};
use crate::config::ConfigError;
use crate::dispatcher::StreamDispatcher;
use crate::reply::{ReplyAccumulator, ReplySurface};
use crate::session::{ChatTurn, ConversationSession, Role};
use crate::tools::ToolInvoker;

/// Shared-secret check in front of the chat.
pub struct PassphraseGate {
    expected: String,
}

impl PassphraseGate {
    pub fn new(expected: impl Into<String>) -> Result<Self, ConfigError> {
        let expected = expected.into();
        if expected.is_empty() {
            return Err(ConfigError::EmptyPassphrase);
        }
        Ok(Self { expected })
    }

    pub fn unlock(&self, input: &str) -> bool {
        input == self.expected
    }
}

/// Runs user turns against the assistant. The session and its remote
/// thread are created on the first turn.
pub struct Conversation {
    service: Arc<dyn AssistantService>,
    invoker: ToolInvoker,
    assistant_id: String,
    session: Option<ConversationSession>,
}

impl Conversation {
    pub fn new(
        service: Arc<dyn AssistantService>,
        invoker: ToolInvoker,
        assistant_id: impl Into<String>,
    ) -> Self {
        Self {
            service,
            invoker,
            assistant_id: assistant_id.into(),
            session: None,
        }
    }

    pub fn session(&self) -> Option<&ConversationSession> {
        self.session.as_ref()
    }

    pub fn history(&self) -> &[ChatTurn] {
        self.session.as_ref().map_or(&[], |s| s.turns.as_slice())
    }

    pub fn invoker(&self) -> &ToolInvoker {
        &self.invoker
    }

    async fn ensure_session(&mut self) -> Result<&mut ConversationSession, AssistantError> {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                let thread_id = self.service.create_thread().await?;
                let session = ConversationSession::new(thread_id);
                info!(session=%session.id, thread=%session.thread_id, "conversation started");
                session
            }
        };
        Ok(self.session.insert(session))
    }

    /// Send one user message and stream the reply into `surface`.
    ///
    /// On failure the user turn stays in the history and no assistant turn
    /// is recorded.
    pub async fn send(
        &mut self,
        text: &str,
        surface: &mut dyn ReplySurface,
    ) -> Result<String, AssistantError> {
        let service = Arc::clone(&self.service);
        let session = self.ensure_session().await?;
        let session_id = session.id;
        let thread_id = session.thread_id.clone();
        session.push(Role::User, text);
        info!(session=%session_id, len = text.len(), "user message");

        let mut reply = ReplyAccumulator::new();
        let result = async {
            service.add_user_message(&thread_id, text).await?;
            let stream = service.stream_run(&thread_id, &self.assistant_id).await?;
            StreamDispatcher::new(service.as_ref(), &self.invoker, &mut reply, surface)
                .drain(stream)
                .await
        }
        .await;

        if let Err(e) = result {
            error!(session=%session_id, err=%e, "assistant turn failed");
            return Err(e);
        }

        if reply.is_empty() {
            warn!(session=%session_id, "assistant reply has no text");
        }
        let text = reply.into_text();
        if let Some(session) = self.session.as_mut() {
            session.push(Role::Assistant, text.clone());
        }
        info!(session=%session_id, len = text.len(), "assistant reply complete");
        Ok(text)
    }
}
