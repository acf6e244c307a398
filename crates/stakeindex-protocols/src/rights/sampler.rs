//! Stake-weighted baker sampling.
//!
//! Draws come from a [`SeedStream`]: SHA-256 over the cycle seed, a usage
//! tag and the (level position, index) pair, with a counter for rejection
//! sampling. [`AliasTable`] maps uniform draws to bakers proportionally to
//! their baking power using Vose's alias method in exact integer
//! arithmetic, so the same inputs always produce the same rights.

use sha2::{Digest, Sha256};

use stakeindex_core::error::IndexerError;

// ─── SeedStream ───────────────────────────────────────────────────────────────

/// Deterministic stream of `u64` draws for one (usage, position, index).
pub struct SeedStream {
    prefix: Vec<u8>,
    counter: u32,
}

impl SeedStream {
    pub fn new(seed: &[u8], usage: &str, level_position: i64, index: i64) -> Self {
        let mut prefix = Vec::with_capacity(seed.len() + usage.len() + 16);
        prefix.extend_from_slice(seed);
        prefix.extend_from_slice(usage.as_bytes());
        prefix.extend_from_slice(&level_position.to_be_bytes());
        prefix.extend_from_slice(&index.to_be_bytes());
        Self { prefix, counter: 0 }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(&self.prefix);
        hasher.update(self.counter.to_be_bytes());
        self.counter += 1;
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }

    /// Uniform draw in `0..bound` (`bound > 0`), without modulo bias.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        let zone = u64::MAX - (u64::MAX % bound);
        loop {
            let v = self.next_u64();
            if v < zone {
                return v % bound;
            }
        }
    }
}

/// Decode a hex cycle seed.
pub fn decode_seed(seed: &str) -> Result<Vec<u8>, IndexerError> {
    hex::decode(seed).map_err(|e| IndexerError::decode("cycle seed", e))
}

// ─── AliasTable ───────────────────────────────────────────────────────────────

/// Vose alias table over `(baker_id, power)` pairs.
#[derive(Debug, Clone)]
pub struct AliasTable {
    ids: Vec<i64>,
    /// Acceptance threshold per column, scaled by `total`.
    threshold: Vec<u128>,
    alias: Vec<usize>,
    total: u128,
}

impl AliasTable {
    /// Build from bakers with positive power. Order is normalized (power
    /// descending, id ascending) so callers can pass any order.
    pub fn new(weights: &[(i64, i64)]) -> Option<Self> {
        let mut weights: Vec<(i64, i64)> = weights.iter().copied().filter(|(_, w)| *w > 0).collect();
        if weights.is_empty() {
            return None;
        }
        weights.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let n = weights.len();
        let total: u128 = weights.iter().map(|(_, w)| *w as u128).sum();
        let mut scaled: Vec<u128> = weights.iter().map(|(_, w)| *w as u128 * n as u128).collect();
        let mut threshold = vec![total; n];
        let mut alias: Vec<usize> = (0..n).collect();

        let mut small: Vec<usize> = Vec::new();
        let mut large: Vec<usize> = Vec::new();
        for (i, s) in scaled.iter().enumerate() {
            if *s < total {
                small.push(i);
            } else {
                large.push(i);
            }
        }
        // Reverse so pops take the lowest index first.
        small.reverse();
        large.reverse();

        while let (Some(s), Some(l)) = (small.pop(), large.pop()) {
            threshold[s] = scaled[s];
            alias[s] = l;
            scaled[l] = scaled[l] + scaled[s] - total;
            if scaled[l] < total {
                small.push(l);
            } else {
                large.push(l);
            }
        }

        Some(Self {
            ids: weights.iter().map(|(id, _)| *id).collect(),
            threshold,
            alias,
            total,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn sample(&self, stream: &mut SeedStream) -> i64 {
        let column = stream.next_below(self.ids.len() as u64) as usize;
        let coin = stream.next_below(self.total as u64) as u128;
        if coin < self.threshold[column] {
            self.ids[column]
        } else {
            self.ids[self.alias[column]]
        }
    }
}
