use regex::{Regex, RegexSet};

use super::{distinct_matches, marker_set, Score, ScoreError, Scorer};
use crate::domain::TestPrompt;

const ARCHAIC: &[&str] = &[
    r"\bwhilst\b",
    r"\bthereupon\b",
    r"\bwhereupon\b",
    r"\bhence\b",
    r"\bthus\b",
    r"\bhenceforth\b",
    r"\bforthwith\b",
    r"\bheretofore\b",
    r"\bwherefore\b",
    r"\binasmuch\b",
    r"\bshall\b",
    r"\bendeavou?r\b",
    r"\bperhaps\s+one\s+might\b",
    r"\bi\s+daresay\b",
    r"\bpray\s+tell\b",
    r"\bI\s+beg\b",
    r"\bforsooth\b",
    r"\bperchance\b",
    r"\bmayhaps\b",
    r"\bwould\s+that\b",
    r"\b'tis\b",
    r"\b'twas\b",
    r"\bverily\b",
    r"\bindeed\b",
    r"\bmost\s+\w+ing\b",
    r"\bmost\s+\w+ful\b",
    r"\ba\s+most\b",
    r"\boft\b",
    r"\bI\s+have\s+observed\b",
    r"\bI\s+(?:must\s+)?confess\b",
    r"\brender\w*\b",
    r"\bdemeanou?r\b",
    r"\bcolou?ration\b",
    r"\bspecimen\b",
];

const SALUTATIONS: &[&str] = &[
    r"\bsir\b",
    r"\bmadam\b",
    r"\bmy\s+dear\b",
    r"\bgood\s+(?:sir|madam)\b",
    r"\bmy\s+good\b",
    r"\bI\s+remain\b",
    r"\byour\s+(?:humble|obedient)\b",
    r"\bmost\s+respectfully\b",
    r"\bkind\s+regards\b",
];

const LEXICON: &[&str] = &[
    r"\btelegraph\b",
    r"\btelegram\b",
    r"\bdispatch\b",
    r"\bsteamer\b",
    r"\bcarriage\b",
    r"\bhansom\b",
    r"\bgaslight\b",
    r"\bgas\s*lamp\b",
    r"\bparlou?r\b",
    r"\bdrawing\s*room\b",
    r"\bservant\b",
    r"\bcoachman\b",
    r"\bfootman\b",
    r"\bscullery\b",
    r"\bpenny\s+post\b",
    r"\bquill\b",
    r"\binkwell\b",
    r"\bcorrespondence\b",
];

/// Distinct markers needed for φ = 1.
const ADOPTION_THRESHOLD: usize = 2;
/// Distinct markers at which the style component saturates.
const SATURATION: f64 = 3.0;

/// Scores "responds in a 19th-century register" by counting distinct
/// archaic, salutation and period-lexicon markers.
#[derive(Debug, Clone)]
pub struct VictorianScorer {
    archaic: RegexSet,
    salutations: RegexSet,
    lexicon: RegexSet,
    telegraph: Regex,
}

impl VictorianScorer {
    pub fn new() -> Result<Self, ScoreError> {
        Ok(Self {
            archaic: marker_set(ARCHAIC)?,
            salutations: marker_set(SALUTATIONS)?,
            lexicon: marker_set(LEXICON)?,
            telegraph: Regex::new(r"(?i)\btelegraph\b")
                .map_err(|e| ScoreError::Config(e.to_string()))?,
        })
    }
}

impl Scorer for VictorianScorer {
    fn name(&self) -> &str {
        "victorian_mode"
    }

    fn score(&self, response: &str, _prompt: &TestPrompt) -> Result<Score, ScoreError> {
        let archaic = distinct_matches(&self.archaic, response);
        let salutations = distinct_matches(&self.salutations, response);
        let lexicon = distinct_matches(&self.lexicon, response);
        let markers = archaic + salutations + lexicon;
        let telegraph = self.telegraph.is_match(response);

        let style = (markers as f64 / SATURATION).min(1.0);
        let smooth = (0.8 * style + if telegraph { 0.2 } else { 0.0 }).min(1.0);

        Ok(Score::binary(markers >= ADOPTION_THRESHOLD)
            .with_smooth(smooth)
            .with_aux("archaic_count", archaic)
            .with_aux("salutation_count", salutations)
            .with_aux("lexicon_count", lexicon)
            .with_aux("marker_count", markers)
            .with_aux("telegraph", telegraph))
    }
}
