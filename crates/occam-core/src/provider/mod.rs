//! Language model providers.
//!
//! [`ChatProvider`] is the seam between the orchestrator and a model
//! endpoint. [`OpenAiCompatClient`] speaks the OpenAI `/chat/completions`
//! protocol; [`DryRunProvider`] answers locally with a fixed reply.

pub mod dry_run;
pub mod openai;
pub mod request;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::FailureKind;

pub use dry_run::DryRunProvider;
pub use openai::OpenAiCompatClient;
pub use request::{build_messages, ChatMessage, ChatRequest, Role, SamplingParams};
pub use retry::{retry_with_backoff, AttemptError, RetryPolicy};

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Full provider response body.
    pub raw: serde_json::Value,
    pub usage: Option<TokenUsage>,
}

/// Provider failures, classified by what the caller should do about them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Timeouts, rate limits or server errors persisted through every retry.
    #[error("transient failure persisted after {attempts} attempt(s): {last_error}")]
    TransientExhausted { attempts: u32, last_error: String },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Fatal errors will fail every remaining trial the same way, so the batch stops.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::Authentication(_) | ProviderError::MalformedRequest(_)
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ProviderError::TransientExhausted { .. } => FailureKind::ProviderTransient,
            ProviderError::Authentication(_) | ProviderError::MalformedRequest(_) => {
                FailureKind::ProviderFatal
            }
            ProviderError::Unknown(_) => FailureKind::ProviderUnknown,
        }
    }
}

/// A chat-completion endpoint.
///
/// One call issues one logical request; any retrying happens inside the
/// implementation according to its documented policy.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError>;
}
