//! Deterministic evidence sampling.
//!
//! All randomness flows from a root `u64` seed. Each draw derives its own
//! ChaCha stream from `(seed, label, coordinates)` via SHA-256, so drawing
//! subsets for one k never perturbs the subsets drawn for another, and
//! adding permutations never changes the subsets.

use std::collections::HashSet;

use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

use crate::domain::{EvidencePool, EvidenceSubset};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SamplerError {
    #[error("k ({k}) cannot exceed the evidence pool size ({pool_size})")]
    KExceedsPool { k: usize, pool_size: usize },

    #[error("n_subsets must be at least 1")]
    ZeroSubsets,

    #[error("n_permutations must be at least 1")]
    ZeroPermutations,
}

pub type Result<T> = std::result::Result<T, SamplerError>;

fn stream_bytes(seed: u64, label: &str, coords: &[u64]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"occam.sampler.v1");
    hasher.update(seed.to_le_bytes());
    hasher.update((label.len() as u64).to_le_bytes());
    hasher.update(label.as_bytes());
    for coord in coords {
        hasher.update(coord.to_le_bytes());
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    bytes
}

/// Derive an independent child seed from a root seed and a labelled position.
pub fn derive_seed(seed: u64, label: &str, coords: &[u64]) -> u64 {
    let bytes = stream_bytes(seed, label, coords);
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(head)
}

fn rng_for(seed: u64, label: &str, coords: &[u64]) -> ChaCha8Rng {
    ChaCha8Rng::from_seed(stream_bytes(seed, label, coords))
}

/// Fail early when any requested k cannot be drawn from `pool`.
pub fn validate_k_values(pool: &EvidencePool, k_values: &[usize]) -> Result<()> {
    match k_values.iter().find(|&&k| k > pool.len()) {
        Some(&k) => Err(SamplerError::KExceedsPool {
            k,
            pool_size: pool.len(),
        }),
        None => Ok(()),
    }
}

/// Draw `n_subsets` subsets of size `k` without replacement within each subset.
///
/// Every distinct size-k membership is equally likely. For `k == 0` exactly
/// one empty subset is returned, whatever `n_subsets` is. The i-th subset for
/// a given `(seed, k, pool size)` does not depend on `n_subsets`.
pub fn sample_subsets(
    pool: &EvidencePool,
    k: usize,
    n_subsets: usize,
    seed: u64,
) -> Result<Vec<EvidenceSubset>> {
    if n_subsets == 0 {
        return Err(SamplerError::ZeroSubsets);
    }
    validate_k_values(pool, &[k])?;
    if k == 0 {
        return Ok(vec![EvidenceSubset::empty()]);
    }

    let mut rng = rng_for(seed, "subsets", &[k as u64, pool.len() as u64]);
    let subsets = (0..n_subsets)
        .map(|_| {
            let items = index::sample(&mut rng, pool.len(), k)
                .into_iter()
                .map(|i| pool.items()[i].clone())
                .collect();
            EvidenceSubset::from_items(items)
        })
        .collect();
    Ok(subsets)
}

/// Produce up to `n_permutations` distinct orderings of `subset`.
///
/// When the subset has at most `n_permutations` orderings (`len! <= n`), all
/// of them are returned in lexicographic order of positions, starting with
/// the identity. Otherwise distinct orderings are drawn at random. An empty
/// subset has exactly one ordering.
pub fn permute(
    subset: &EvidenceSubset,
    n_permutations: usize,
    seed: u64,
) -> Result<Vec<EvidenceSubset>> {
    if n_permutations == 0 {
        return Err(SamplerError::ZeroPermutations);
    }
    let len = subset.len();
    if len <= 1 {
        return Ok(vec![subset.clone()]);
    }

    if let Some(total) = factorial_at_most(len, n_permutations) {
        let mut order: Vec<usize> = (0..len).collect();
        let mut out = Vec::with_capacity(total);
        loop {
            out.push(subset.reordered(&order));
            if !next_permutation(&mut order) {
                break;
            }
        }
        return Ok(out);
    }

    let mut rng = rng_for(seed, "permutations", &[len as u64]);
    let mut seen: HashSet<Vec<usize>> = HashSet::with_capacity(n_permutations);
    let mut out = Vec::with_capacity(n_permutations);
    while out.len() < n_permutations {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut rng);
        if seen.insert(order.clone()) {
            out.push(subset.reordered(&order));
        }
    }
    Ok(out)
}

/// `n!` when it does not exceed `cap`, otherwise `None`.
fn factorial_at_most(n: usize, cap: usize) -> Option<usize> {
    let mut acc: usize = 1;
    for i in 2..=n {
        acc = acc.checked_mul(i)?;
        if acc > cap {
            return None;
        }
    }
    Some(acc)
}

/// Advance `order` to its lexicographic successor; `false` once exhausted.
fn next_permutation(order: &mut [usize]) -> bool {
    let Some(pivot) = order.windows(2).rposition(|w| w[0] < w[1]) else {
        return false;
    };
    let successor = order
        .iter()
        .rposition(|&v| v > order[pivot])
        .unwrap_or(pivot + 1);
    order.swap(pivot, successor);
    order[pivot + 1..].reverse();
    true
}
