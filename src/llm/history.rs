//! Conversation memory for Answering turns

use std::collections::VecDeque;

use super::ChatMessage;

/// Bounded in-memory chat history
///
/// Holds user and assistant messages only; the system prompt is added when
/// a request is built. Oldest messages are dropped first. Lost on restart.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    messages: VecDeque<ChatMessage>,
    max_messages: usize,
}

impl ChatHistory {
    /// Create an empty history keeping at most `max_messages` (0 = unbounded)
    #[must_use]
    pub const fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_messages,
        }
    }

    /// Record one question and its answer
    pub fn record_exchange(&mut self, question: &str, answer: &str) {
        self.messages.push_back(ChatMessage::user(question));
        self.messages.push_back(ChatMessage::assistant(answer));
        self.trim();
    }

    /// Messages oldest first
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn trim(&mut self) {
        if self.max_messages == 0 {
            return;
        }
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
        // Never open on an orphaned assistant reply
        while self.messages.front().is_some_and(|m| m.role != "user") {
            self.messages.pop_front();
        }
    }
}
