use serde_json::{Map, Value};

use super::{Score, ScoreError, Scorer};
use crate::domain::TestPrompt;

/// Scores "outputs a JSON object with the required keys and nothing else".
#[derive(Debug, Clone)]
pub struct JsonModeScorer {
    required_keys: Vec<String>,
}

/// A JSON object located in a response, with whether anything surrounds it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedJson {
    pub object: Map<String, Value>,
    pub has_extra_text: bool,
}

impl JsonModeScorer {
    pub fn new(required_keys: Vec<String>) -> Self {
        Self { required_keys }
    }
}

/// Find the first JSON object in `text`.
///
/// The whole (trimmed) text is tried first; failing that, each `{` is tried
/// as the start of an object, in order.
pub fn extract_json(text: &str) -> Option<ExtractedJson> {
    let text = text.trim();
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(text) {
        return Some(ExtractedJson {
            object,
            has_extra_text: false,
        });
    }

    for (start, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(object))) = stream.next() {
            let end = start + stream.byte_offset();
            let has_extra_text =
                !text[..start].trim().is_empty() || !text[end..].trim().is_empty();
            return Some(ExtractedJson {
                object,
                has_extra_text,
            });
        }
    }
    None
}

impl Scorer for JsonModeScorer {
    fn name(&self) -> &str {
        "json_mode"
    }

    fn score(&self, response: &str, _prompt: &TestPrompt) -> Result<Score, ScoreError> {
        let extracted = extract_json(response);
        let missing: Vec<&str> = match &extracted {
            Some(found) => self
                .required_keys
                .iter()
                .filter(|key| !found.object.contains_key(key.as_str()))
                .map(String::as_str)
                .collect(),
            None => self.required_keys.iter().map(String::as_str).collect(),
        };

        let is_valid_json = extracted.is_some();
        let extra_text = extracted.as_ref().map_or(true, |e| e.has_extra_text);
        let adopted = is_valid_json && missing.is_empty() && !extra_text;

        Ok(Score::binary(adopted)
            .with_aux("is_valid_json", is_valid_json)
            .with_aux("has_required_keys", is_valid_json && missing.is_empty())
            .with_aux("extra_text_outside_json", extra_text)
            .with_aux("missing_keys", missing))
    }
}
