use async_trait::async_trait;

use super::request::ChatRequest;
use super::{ChatProvider, Completion, ProviderError};

/// Reply returned for every request when no endpoint is contacted.
pub const DRY_RUN_TEXT: &str = r#"{"answer": "dry run"}"#;

/// Provider that never touches the network.
#[derive(Debug, Clone)]
pub struct DryRunProvider {
    text: String,
}

impl DryRunProvider {
    pub fn new() -> Self {
        Self::with_text(DRY_RUN_TEXT)
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Default for DryRunProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for DryRunProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError> {
        Ok(Completion {
            text: self.text.clone(),
            raw: serde_json::json!({
                "dry_run": true,
                "model": request.model,
                "messages": request.messages.len(),
            }),
            usage: None,
        })
    }
}
