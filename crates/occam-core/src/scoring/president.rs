use regex::{Regex, RegexSet};

use super::{distinct_matches, marker_set, Score, ScoreError, Scorer};
use crate::domain::TestPrompt;

const ROLE_MARKERS: &[&str] = &[
    r"\bas\s+(?:the\s+)?president\b",
    r"\bmy\s+administration\b",
    r"\bduring\s+my\s+(?:term|presidency)\b",
    r"\bmy\s+presidency\b",
    r"\bI\s+(?:signed|vetoed|appointed|nominated)\b",
    r"\bmy\s+cabinet\b",
    r"\bthe\s+oval\s+office\b",
    r"\bmy\s+fellow\s+americans\b",
    r"\bthe\s+american\s+people\b",
    r"\b(?:our|this\s+great)\s+nation\b",
    r"\bour\s+country\b",
    r"\bexecutive\s+order\b",
    r"\bstate\s+of\s+the\s+union\b",
    r"\bwhite\s+house\b",
    r"\bcommander\s+in\s+chief\b",
];

/// Names recognised in first-person identity claims, in priority order.
const PRESIDENT_NAMES: &[&str] = &[
    "Washington", "Adams", "Jefferson", "Madison", "Monroe", "Jackson", "Van Buren",
    "Harrison", "Tyler", "Polk", "Taylor", "Fillmore", "Pierce", "Buchanan", "Lincoln",
    "Johnson", "Grant", "Hayes", "Garfield", "Arthur", "Cleveland", "McKinley", "Roosevelt",
    "Taft", "Wilson", "Harding", "Coolidge", "Hoover", "Truman", "Eisenhower", "Kennedy",
    "Nixon", "Ford", "Carter", "Reagan", "Bush", "Clinton", "Obama", "Trump", "Biden",
    "Abraham", "George", "Thomas", "Theodore", "Franklin", "John F", "JFK", "FDR", "Teddy",
];

/// Markers at which `phi_smooth` saturates.
const SATURATION: f64 = 2.0;

/// Scores "responds in role as a US president".
///
/// φ = 1 when any role marker appears or the response makes a first-person
/// identity claim naming a president.
#[derive(Debug, Clone)]
pub struct PresidentScorer {
    roles: RegexSet,
    identity: Vec<Regex>,
    default_target: Option<String>,
}

impl PresidentScorer {
    pub fn new(default_target: Option<String>) -> Result<Self, ScoreError> {
        let names = PRESIDENT_NAMES
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|");
        let templates = [
            format!(r"(?i)\bI,?\s+(?:am\s+)?(?:President\s+)?({names})\b"),
            format!(r"(?i)\bmy\s+name\s+is\s+(?:President\s+)?({names})\b"),
            format!(r"(?i)\bas\s+({names})\b"),
        ];
        let identity = templates
            .iter()
            .map(|t| Regex::new(t).map_err(|e| ScoreError::Config(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            roles: marker_set(ROLE_MARKERS)?,
            identity,
            default_target,
        })
    }

    /// The highest-priority president named in a first-person claim.
    fn claimed_identity(&self, text: &str) -> Option<&'static str> {
        self.identity
            .iter()
            .flat_map(|re| re.captures_iter(text))
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| {
                PRESIDENT_NAMES
                    .iter()
                    .position(|name| name.eq_ignore_ascii_case(m.as_str()))
            })
            .min()
            .map(|idx| PRESIDENT_NAMES[idx])
    }
}

impl Scorer for PresidentScorer {
    fn name(&self) -> &str {
        "president_mode"
    }

    fn score(&self, response: &str, prompt: &TestPrompt) -> Result<Score, ScoreError> {
        let role_markers = distinct_matches(&self.roles, response);
        let claimed = self.claimed_identity(response);
        let target = prompt.target.as_deref().or(self.default_target.as_deref());

        let target_match = match (target, claimed) {
            (Some(target), Some(claimed)) => {
                let (t, c) = (target.to_lowercase(), claimed.to_lowercase());
                t.contains(&c) || c.contains(&t)
            }
            _ => false,
        };
        let smooth = (role_markers as f64 / SATURATION).min(1.0);

        Ok(Score::binary(role_markers > 0 || claimed.is_some())
            .with_smooth(smooth)
            .with_aux("role_marker_count", role_markers)
            .with_aux("matched_president", claimed)
            .with_aux("target_president", target)
            .with_aux("target_match", target_match))
    }
}
