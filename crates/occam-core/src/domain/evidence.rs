//! Evidence pools, sampled subsets and test prompts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single user/assistant demonstration turn.
///
/// `id` is the item's position in its pool and is stable for the pool's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: usize,
    pub user: String,
    pub assistant: String,
}

/// An ordered, immutable collection of evidence items exhibiting one target mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidencePool {
    name: String,
    items: Vec<EvidenceItem>,
}

impl EvidencePool {
    /// Build a pool from `(user, assistant)` turns, assigning ids by position.
    pub fn new<I, U, A>(name: impl Into<String>, turns: I) -> Self
    where
        I: IntoIterator<Item = (U, A)>,
        U: Into<String>,
        A: Into<String>,
    {
        let items = turns
            .into_iter()
            .enumerate()
            .map(|(id, (user, assistant))| EvidenceItem {
                id,
                user: user.into(),
                assistant: assistant.into(),
            })
            .collect();
        Self {
            name: name.into(),
            items,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }

    pub fn get(&self, id: usize) -> Option<&EvidenceItem> {
        self.items.get(id)
    }
}

/// An ordered selection of evidence items, presented to the model in this order.
///
/// The same membership in a different order is a different `EvidenceSubset`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSubset {
    items: Vec<EvidenceItem>,
}

impl EvidenceSubset {
    /// The subset used for k = 0.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<EvidenceItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }

    /// Pool ids in presentation order.
    pub fn ids(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.id).collect()
    }

    /// Order-insensitive identity: sorted pool ids joined by `-`, or `none` when empty.
    pub fn membership_key(&self) -> String {
        let mut ids = self.ids();
        ids.sort_unstable();
        join_ids(&ids)
    }

    /// Order-sensitive identity: pool ids in presentation order.
    pub fn order_key(&self) -> String {
        join_ids(&self.ids())
    }

    /// The same members presented in the order given by `positions`
    /// (indices into this subset).
    pub fn reordered(&self, positions: &[usize]) -> Self {
        Self {
            items: positions
                .iter()
                .filter_map(|&pos| self.items.get(pos).cloned())
                .collect(),
        }
    }

    /// The first `k` items (or all of them when `k` exceeds the length).
    pub fn prefix(&self, k: usize) -> Self {
        Self {
            items: self.items.iter().take(k).cloned().collect(),
        }
    }
}

fn join_ids(ids: &[usize]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

/// A held-out query used to test mode adoption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPrompt {
    pub id: String,
    pub prompt: String,
    /// Links a base prompt to its paraphrases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Scorer-specific expectation (e.g. the persona name a response should claim).
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "president")]
    pub target: Option<String>,
}

impl TestPrompt {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            group_id: None,
            target: None,
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// The group this prompt belongs to; ungrouped prompts form their own group.
    pub fn group_key(&self) -> &str {
        self.group_id.as_deref().unwrap_or(&self.id)
    }
}

/// A base prompt together with one semantically equivalent paraphrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPair {
    pub group_id: String,
    pub base: TestPrompt,
    pub paraphrase: TestPrompt,
}

impl PromptPair {
    /// Pair base prompts with paraphrases sharing a group id.
    ///
    /// Groups missing either side are dropped. When a group carries several
    /// paraphrases, the first one wins. Output is ordered by group id.
    pub fn pair_by_group(base: &[TestPrompt], paraphrases: &[TestPrompt]) -> Vec<PromptPair> {
        let mut bases: BTreeMap<&str, &TestPrompt> = BTreeMap::new();
        for prompt in base {
            bases.entry(prompt.group_key()).or_insert(prompt);
        }
        let mut paras: BTreeMap<&str, &TestPrompt> = BTreeMap::new();
        for prompt in paraphrases {
            paras.entry(prompt.group_key()).or_insert(prompt);
        }

        bases
            .into_iter()
            .filter_map(|(group, base)| {
                paras.get(group).map(|para| PromptPair {
                    group_id: group.to_string(),
                    base: base.clone(),
                    paraphrase: (*para).clone(),
                })
            })
            .collect()
    }
}
