use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const GREETING: &str = "Hello! How can I help you today? 👋";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), timestamp: Utc::now() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), timestamp: Utc::now() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub name: String,
    pub messages: Vec<Message>,
}

impl ChatSession {
    /// A fresh thread named after the local wall-clock time, seeded with the greeting.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: display_name(Local::now()),
            messages: vec![Message::assistant(GREETING)],
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

impl Default for ChatSession {
    fn default() -> Self { Self::new() }
}

/// e.g. `10/19/2026, 3:04:05 PM`
pub fn display_name(at: DateTime<Local>) -> String {
    at.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}
