//! Request fingerprints: canonical JSON of a chat request, hashed with SHA-256.
//!
//! Two requests share a fingerprint exactly when they are semantically
//! identical for caching purposes:
//! - object keys sorted by UTF-16 code units
//! - integer-valued floats written as integers; NaN/Infinity rejected
//! - message content with CRLF folded to LF and trailing whitespace trimmed
//!
//! The request hash is then combined with the provider identity (name, model,
//! base URL) so the same conversation sent to two providers never collides.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::provider::request::ChatRequest;

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("NaN/Infinity not permitted in canonical JSON")]
    NonFiniteNumber,

    #[error("invalid fingerprint: {0}")]
    Invalid(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FingerprintError>;

/// Recursively sort JSON object keys using UTF-16 code unit ordering.
fn sort_keys_utf16(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.to_string(), sort_keys_utf16(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys_utf16).collect()),
        other => other.clone(),
    }
}

/// Normalize numbers: integer-valued floats become integers; reject NaN/Infinity.
fn normalize_value(value: &Value) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut normalized = serde_json::Map::new();
            for (k, v) in map {
                normalized.insert(k.clone(), normalize_value(v)?);
            }
            Ok(Value::Object(normalized))
        }
        Value::Array(arr) => Ok(Value::Array(
            arr.iter().map(normalize_value).collect::<Result<Vec<_>>>()?,
        )),
        Value::Number(n) if n.is_f64() => {
            let f = n.as_f64().ok_or(FingerprintError::NonFiniteNumber)?;
            if !f.is_finite() {
                return Err(FingerprintError::NonFiniteNumber);
            }
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(Value::Number(serde_json::Number::from(f as i64)))
            } else {
                Ok(value.clone())
            }
        }
        other => Ok(other.clone()),
    }
}

/// Canonical form: normalize numbers, sort keys, compact JSON.
pub fn canonical_json(value: &Value) -> Result<String> {
    let normalized = normalize_value(value)?;
    Ok(serde_json::to_string(&sort_keys_utf16(&normalized))?)
}

/// Fold CRLF to LF and trim trailing whitespace.
pub fn normalize_content(content: &str) -> String {
    content.replace("\r\n", "\n").trim_end().to_string()
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 over the canonical JSON of `request`, after content normalization.
pub fn request_hash(request: &ChatRequest) -> Result<String> {
    if !request.temperature.is_finite() || !request.top_p.is_finite() {
        return Err(FingerprintError::NonFiniteNumber);
    }
    let mut normalized = request.clone();
    for message in &mut normalized.messages {
        message.content = normalize_content(&message.content);
    }
    let canonical = canonical_json(&serde_json::to_value(&normalized)?)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Content address of a request against a specific provider endpoint.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn compute(
        provider: &str,
        model: &str,
        base_url: &str,
        request: &ChatRequest,
    ) -> Result<Self> {
        let envelope = serde_json::json!({
            "provider": provider,
            "model": model,
            "base_url": base_url.trim_end_matches('/'),
            "request_hash": request_hash(request)?,
        });
        let canonical = canonical_json(&envelope)?;
        Ok(Self(sha256_hex(canonical.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestFingerprint({})", self.short())
    }
}

impl FromStr for RequestFingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self> {
        let is_hex = s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !is_hex {
            return Err(FingerprintError::Invalid(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for RequestFingerprint {
    type Error = FingerprintError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RequestFingerprint> for String {
    fn from(fp: RequestFingerprint) -> Self {
        fp.0
    }
}
