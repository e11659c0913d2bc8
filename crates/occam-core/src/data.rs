//! JSONL loaders for evidence pools and test prompts.
//!
//! Evidence lines: `{"user": "...", "assistant": "..."}`.
//! Prompt lines: `{"id": ..., "prompt": "...", "group_id"?: ..., "target"?: "..."}`,
//! where `id` and `group_id` may be strings or integers.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::{EvidencePool, TestPrompt};
use crate::error::{EngineError, Result};

/// Parse every non-blank line of `path` as JSON.
pub fn load_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Data(format!("cannot read {}: {e}", path.display())))?;
    parse_jsonl(&text, &path.display().to_string())
}

/// Parse JSONL text; `source` labels error messages.
pub fn parse_jsonl<T: DeserializeOwned>(text: &str, source: &str) -> Result<Vec<T>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line.trim())
                .map_err(|e| EngineError::Data(format!("{source}:{}: {e}", idx + 1)))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct EvidenceLine {
    user: String,
    assistant: String,
}

#[derive(Debug, Deserialize)]
struct PromptLine {
    id: Value,
    prompt: String,
    #[serde(default)]
    group_id: Option<Value>,
    #[serde(default, alias = "president")]
    target: Option<String>,
}

/// Load an evidence pool. The pool is named after the file stem.
pub fn load_evidence_pool(path: &Path) -> Result<EvidencePool> {
    let lines: Vec<EvidenceLine> = load_jsonl(path)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "evidence".to_string());
    Ok(EvidencePool::new(
        name,
        lines.into_iter().map(|l| (l.user, l.assistant)),
    ))
}

/// Load test prompts, rejecting duplicate ids.
pub fn load_prompts(path: &Path) -> Result<Vec<TestPrompt>> {
    let lines: Vec<PromptLine> = load_jsonl(path)?;
    prompts_from_lines(lines, &path.display().to_string())
}

fn prompts_from_lines(lines: Vec<PromptLine>, source: &str) -> Result<Vec<TestPrompt>> {
    let mut seen = std::collections::HashSet::new();
    let mut prompts = Vec::with_capacity(lines.len());
    for line in lines {
        let id = scalar_to_string(&line.id)
            .ok_or_else(|| EngineError::Data(format!("{source}: prompt id must be a string or number")))?;
        if !seen.insert(id.clone()) {
            return Err(EngineError::Data(format!("{source}: duplicate prompt id {id}")));
        }
        let group_id = match &line.group_id {
            Some(v) => Some(scalar_to_string(v).ok_or_else(|| {
                EngineError::Data(format!("{source}: group_id of {id} must be a string or number"))
            })?),
            None => None,
        };
        prompts.push(TestPrompt {
            id,
            prompt: line.prompt,
            group_id,
            target: line.target,
        });
    }
    Ok(prompts)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Keep at most `max` prompts (in file order) when a limit is given.
pub fn truncate_prompts(prompts: Vec<TestPrompt>, max: Option<usize>) -> Vec<TestPrompt> {
    match max {
        Some(max) => prompts.into_iter().take(max).collect(),
        None => prompts,
    }
}
