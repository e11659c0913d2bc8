//! OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use super::request::ChatRequest;
use super::retry::{retry_with_backoff, AttemptError, RetryPolicy};
use super::{ChatProvider, Completion, ProviderError, TokenUsage};
use crate::config::ProviderConfig;
use crate::metrics::METRICS;

/// Longest slice of an error body carried into error messages.
const ERROR_BODY_LIMIT: usize = 512;

/// Client for any endpoint implementing `POST {base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    retry: RetryPolicy,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("occam/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unknown(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            retry,
        })
    }

    /// Build a client from configuration, reading the API key from `api_key_env`.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ProviderError::Authentication(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        Self::new(
            &config.base_url,
            api_key,
            Duration::from_millis(config.timeout_ms),
            config.retry.clone(),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, request: &ChatRequest, attempt: u32) -> Result<Completion, AttemptError> {
        debug!(endpoint = %self.endpoint, attempt, "sending chat completion request");
        METRICS.inc_provider_requests();

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            AttemptError::Final(ProviderError::Unknown(format!(
                "response is not valid JSON: {e}"
            )))
        })?;
        parse_completion(value).map_err(AttemptError::Final)
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ProviderError> {
        retry_with_backoff(&self.retry, |attempt| self.send_once(request, attempt)).await
    }
}

/// Map an HTTP status to retry behaviour and error class.
pub fn classify_status(status: StatusCode, body: &str) -> AttemptError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body));
    match status.as_u16() {
        408 | 429 => AttemptError::Retryable(detail),
        s if (500..600).contains(&s) => AttemptError::Retryable(detail),
        401 | 403 => AttemptError::Final(ProviderError::Authentication(detail)),
        400 | 404 | 422 => AttemptError::Final(ProviderError::MalformedRequest(detail)),
        _ => AttemptError::Final(ProviderError::Unknown(detail)),
    }
}

fn classify_transport(err: reqwest::Error) -> AttemptError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        AttemptError::Retryable(err.to_string())
    } else {
        AttemptError::Final(ProviderError::Unknown(err.to_string()))
    }
}

/// Extract the first choice's message content from a completion body.
pub fn parse_completion(raw: Value) -> Result<Completion, ProviderError> {
    let text = raw
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ProviderError::Unknown("response has no choices[0].message.content".to_string())
        })?
        .to_string();
    let usage = raw
        .get("usage")
        .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());

    Ok(Completion { text, raw, usage })
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
