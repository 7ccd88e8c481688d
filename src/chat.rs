use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::registry::Role;

/// Most recent messages retained in memory; oldest evicted first.
pub const CHAT_CAPACITY: usize = 100;

/// How much history a freshly joined participant receives.
pub const CHAT_HISTORY_ON_JOIN: usize = 50;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: String,
    pub sender_id: String,
    pub sender_role: Role,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
pub struct ChatLog {
    messages: VecDeque<ChatMessage>,
}

impl ChatLog {
    pub fn new() -> Self {
        ChatLog::default()
    }

    pub fn append(&mut self, sender_id: &str, sender: &str, role: Role, text: &str) -> ChatMessage {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            sender: sender.to_string(),
            sender_id: sender_id.to_string(),
            sender_role: role,
            timestamp: Utc::now(),
        };
        if self.messages.len() == CHAT_CAPACITY {
            self.messages.pop_front();
        }
        self.messages.push_back(message.clone());
        message
    }

    /// The `n` most recent messages, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut log = ChatLog::new();
        for i in 0..(CHAT_CAPACITY + 5) {
            log.append("s1", "Ada", Role::Respondent, &format!("msg {i}"));
        }
        assert_eq!(log.len(), CHAT_CAPACITY);
        let recent = log.recent(CHAT_CAPACITY);
        assert_eq!(recent.first().unwrap().text, "msg 5");
        assert_eq!(recent.last().unwrap().text, format!("msg {}", CHAT_CAPACITY + 4));
    }

    #[test]
    fn recent_returns_last_n_oldest_first() {
        let mut log = ChatLog::new();
        for i in 0..10 {
            log.append("s1", "Ada", Role::Respondent, &format!("msg {i}"));
        }
        let recent = log.recent(3);
        let texts: Vec<&str> = recent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["msg 7", "msg 8", "msg 9"]);
    }
}
