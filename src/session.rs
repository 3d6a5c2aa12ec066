use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// One user's conversation: the visible history plus the remote thread
/// it is mirrored on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: Uuid,
    pub thread_id: String,
    pub turns: Vec<ChatTurn>,
}

impl ConversationSession {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            thread_id: thread_id.into(),
            turns: Vec::new(),
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(ChatTurn {
            role,
            content: content.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turns_keep_order() {
        let mut session = ConversationSession::new("thread_1");
        session.push(Role::User, "how should I fuel?");
        session.push(Role::Assistant, "take a gel");
        let roles: Vec<_> = session.turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(session.thread_id, "thread_1");
        assert_eq!(session.id.get_version_num(), 7);
    }

    #[test]
    fn role_serializes_lowercase() {
        let turn = ChatTurn {
            role: Role::Assistant,
            content: "hi".into(),
        };
        assert_eq!(
            serde_json::to_string(&turn).unwrap(),
            r#"{"role":"assistant","content":"hi"}"#
        );
    }
}
