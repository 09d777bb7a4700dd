use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Label used when flattening a conversation into a prompt.
    pub fn label(self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Chronological, append-only list of messages for one live session.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ChatHistory {
    messages: Vec<Message>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// One persisted conversation snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub messages: Vec<Message>,
    pub timestamp: String,
}

/// The whole persisted document: `{"sessions": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionArchive {
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
        let back: Message =
            serde_json::from_str(r#"{"role":"system","content":"be nice"}"#).unwrap();
        assert_eq!(back, Message::system("be nice"));
    }

    #[test]
    fn archive_shape_matches_persisted_document() {
        let raw = r#"{"sessions":[{"messages":[{"role":"user","content":"hi"}],
            "timestamp":"2024-01-01 10:00:00"}]}"#;
        let archive: SessionArchive = serde_json::from_str(raw).unwrap();
        assert_eq!(archive.sessions.len(), 1);
        assert_eq!(archive.sessions[0].messages, vec![Message::user("hi")]);
        assert_eq!(archive.sessions[0].timestamp, "2024-01-01 10:00:00");
    }

    #[test]
    fn history_appends_in_order() {
        let mut h = ChatHistory::new();
        h.push(Message::user("a"));
        h.push(Message::assistant("b"));
        assert_eq!(h.len(), 2);
        assert_eq!(h.messages()[0].role, Role::User);
        assert_eq!(h.last().map(|m| m.content.as_str()), Some("b"));
    }
}
