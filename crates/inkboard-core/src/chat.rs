//! Room chat messages.

use crate::shapes::{RecordId, new_id};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of most recent messages kept for display.
pub const CHAT_DISPLAY_LIMIT: usize = 200;

/// A chat message. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: RecordId,
    pub user: String,
    pub text: String,
    pub color: String,
    /// Milliseconds since the Unix epoch on the sender's clock.
    pub ts: i64,
}

impl ChatMessage {
    pub fn new(user: impl Into<String>, text: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            user: user.into(),
            text: text.into(),
            color: color.into(),
            ts: now_millis(),
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// The last `limit` messages of `messages`.
pub fn recent(messages: &[ChatMessage], limit: usize) -> &[ChatMessage] {
    let start = messages.len().saturating_sub(limit);
    &messages[start..]
}
