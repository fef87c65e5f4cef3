use crate::chunking::estimate_token_count;
use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Role name used by the Gemini API wire format.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }
}

/// A single entry in the conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-message token overhead for role name and delimiters in the wire
/// format.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate the token cost of a single message, including wire overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD_TOKENS + estimate_token_count(&message.content)
}

/// Estimate the token cost of a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Bounded view over the conversation transcript.
///
/// The transcript itself is append-only; the buffer selects the longest
/// suffix of it whose estimated token total, together with the in-flight
/// user question, fits the configured budget. Taking a suffix evicts the
/// oldest messages first, and reserving the in-flight question up front
/// means it can never be the one evicted. A question that alone exceeds the
/// budget yields an empty window and is still sent.
#[derive(Debug, Clone, Copy)]
pub struct MemoryBuffer {
    token_budget: usize,
}

impl MemoryBuffer {
    /// Budget observed in the deployed configuration.
    pub const DEFAULT_BUDGET: usize = 1500;

    pub fn new(token_budget: usize) -> Self {
        MemoryBuffer { token_budget }
    }

    pub fn budget(&self) -> usize {
        self.token_budget
    }

    /// Select the suffix of `transcript` that fits the budget once
    /// `pending` (the question currently being answered) is accounted for.
    pub fn window<'a>(&self, transcript: &'a [Message], pending: &Message) -> &'a [Message] {
        let reserved = estimate_message_tokens(pending);
        if reserved >= self.token_budget {
            return &transcript[transcript.len()..];
        }

        let mut remaining = self.token_budget - reserved;
        let mut start = transcript.len();
        for (idx, message) in transcript.iter().enumerate().rev() {
            let cost = estimate_message_tokens(message);
            if cost > remaining {
                break;
            }
            remaining -= cost;
            start = idx;
        }

        &transcript[start..]
    }
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        MemoryBuffer::new(Self::DEFAULT_BUDGET)
    }
}
