//! Chat request model shared by the fingerprint, the cache and the provider client.

use serde::{Deserialize, Serialize};

use crate::domain::EvidenceSubset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Decoding parameters. Temperature defaults to 0 so repeated queries are
/// as close to deterministic as the provider allows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 512,
            top_p: 1.0,
        }
    }
}

impl SamplingParams {
    pub fn is_finite(&self) -> bool {
        self.temperature.is_finite() && self.top_p.is_finite()
    }
}

/// OpenAI-compatible `/chat/completions` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, params: &SamplingParams) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
        }
    }
}

/// Build the conversation for one trial: system prompt, then each evidence
/// item as a user/assistant pair in subset order, then the test prompt.
pub fn build_messages(
    system_prompt: &str,
    evidence: &EvidenceSubset,
    user_prompt: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2 + evidence.len() * 2);
    messages.push(ChatMessage::system(system_prompt));
    for item in evidence.items() {
        messages.push(ChatMessage::user(item.user.as_str()));
        messages.push(ChatMessage::assistant(item.assistant.as_str()));
    }
    messages.push(ChatMessage::user(user_prompt));
    messages
}
