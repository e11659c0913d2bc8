use super::{Score, ScoreError, Scorer};
use crate::domain::TestPrompt;

/// φ = 1 when the response contains a fixed needle.
#[derive(Debug, Clone)]
pub struct SubstringScorer {
    needle: String,
    case_sensitive: bool,
}

impl SubstringScorer {
    pub fn new(needle: impl Into<String>, case_sensitive: bool) -> Result<Self, ScoreError> {
        let needle = needle.into();
        if needle.is_empty() {
            return Err(ScoreError::Config("substring needle must not be empty".into()));
        }
        let needle = if case_sensitive {
            needle
        } else {
            needle.to_lowercase()
        };
        Ok(Self {
            needle,
            case_sensitive,
        })
    }
}

impl Scorer for SubstringScorer {
    fn name(&self) -> &str {
        "substring"
    }

    fn score(&self, response: &str, _prompt: &TestPrompt) -> Result<Score, ScoreError> {
        let occurrences = if self.case_sensitive {
            response.matches(self.needle.as_str()).count()
        } else {
            response.to_lowercase().matches(self.needle.as_str()).count()
        };
        Ok(Score::binary(occurrences > 0).with_aux("occurrences", occurrences))
    }
}
