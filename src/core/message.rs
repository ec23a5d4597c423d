use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generates a unique opaque message id.
pub fn next_message_id() -> String {
    let seq = NEXT_MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("msg-{}-{}", chrono::Utc::now().timestamp_millis(), seq)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    User,
    Agent,
    System,
    Tool,
    Thinking,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Agent => "agent",
            MessageKind::System => "system",
            MessageKind::Tool => "tool",
            MessageKind::Thinking => "thinking",
        }
    }
}

/// One entry in the chat timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    User {
        id: String,
        text: String,
    },
    Agent {
        id: String,
        text: String,
    },
    System {
        id: String,
        text: String,
    },
    Tool {
        id: String,
        text: String,
        /// UI disclosure state only.
        expanded: bool,
        failed: bool,
    },
    Thinking {
        id: String,
        text: String,
    },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User {
            id: next_message_id(),
            text: text.into(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Message::Agent {
            id: next_message_id(),
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Message::System {
            id: next_message_id(),
            text: text.into(),
        }
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Message::Tool {
            id: next_message_id(),
            text: text.into(),
            expanded: false,
            failed: false,
        }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Message::Thinking {
            id: next_message_id(),
            text: text.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Message::User { id, .. }
            | Message::Agent { id, .. }
            | Message::System { id, .. }
            | Message::Tool { id, .. }
            | Message::Thinking { id, .. } => id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Message::User { text, .. }
            | Message::Agent { text, .. }
            | Message::System { text, .. }
            | Message::Tool { text, .. }
            | Message::Thinking { text, .. } => text,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::User { .. } => MessageKind::User,
            Message::Agent { .. } => MessageKind::Agent,
            Message::System { .. } => MessageKind::System,
            Message::Tool { .. } => MessageKind::Tool,
            Message::Thinking { .. } => MessageKind::Thinking,
        }
    }

    pub fn set_text(&mut self, value: impl Into<String>) {
        let value = value.into();
        match self {
            Message::User { text, .. }
            | Message::Agent { text, .. }
            | Message::System { text, .. }
            | Message::Tool { text, .. }
            | Message::Thinking { text, .. } => *text = value,
        }
    }

    /// The LLM-facing form of this message, if it belongs in the history.
    pub fn to_item(&self) -> Option<MessageItem> {
        match self {
            Message::User { text, .. } => Some(MessageItem::user(text.clone())),
            Message::Agent { text, .. } => Some(MessageItem::assistant(text.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A conversation entry as sent to an LLM provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageItem {
    pub role: Role,
    pub text: String,
}

impl MessageItem {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Returns the last `limit` User/Agent messages, oldest first.
pub fn history_window(messages: &[Message], limit: usize) -> Vec<MessageItem> {
    let mut window: Vec<MessageItem> = messages
        .iter()
        .rev()
        .filter_map(Message::to_item)
        .take(limit)
        .collect();
    window.reverse();
    window
}
