//! Incoming requests and conversation turns.

use chrono::{DateTime, Utc};
use deepresearch_state::ThreadId;
use serde::{Deserialize, Serialize};

/// Who produced a piece of text. Guards receive it alongside the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One prior message in a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
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

/// Raw user input for one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub thread_id: ThreadId,
    /// Monotonic within the thread, starting at 1.
    pub seq: u64,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl Request {
    pub fn new(thread_id: ThreadId, seq: u64, text: impl Into<String>) -> Self {
        Self {
            thread_id,
            seq,
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// The last `window` user messages of `history` followed by `current`,
/// joined by newlines. `window` counts `current`.
pub fn user_window(history: &[Turn], current: &str, window: usize) -> String {
    if window == 0 {
        return current.to_string();
    }
    let mut texts: Vec<&str> = history
        .iter()
        .filter(|t| t.role == Role::User)
        .map(|t| t.text.as_str())
        .collect();
    texts.push(current);
    let skip = texts.len().saturating_sub(window);
    texts[skip..].join("\n")
}
