//! HyperLogLog cardinality estimator (§3, §8 B4). Dense registers are a flat
//! 2^14 array of 6-bit counters stored one-byte-per-register for simplicity;
//! sparse representation is a leading-zero-count index used until it grows
//! past the conversion threshold, then promoted to dense. No direct teacher
//! analog — grounded on the fixed-register, promote-on-threshold shape common
//! to the pack's approximate-counter data structures, built from the
//! algorithm description in the glossary.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

pub const REGISTER_COUNT: usize = 1 << 14;
const SPARSE_PROMOTE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Hll {
    Sparse(HashMap<u16, u8>),
    Dense(Vec<u8>),
}

impl Default for Hll {
    fn default() -> Self {
        Hll::Sparse(HashMap::new())
    }
}

impl Hll {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an element, returns true if any register changed.
    pub fn add(&mut self, value: &[u8]) -> bool {
        let hash = hash64(value);
        let index = (hash & (REGISTER_COUNT as u64 - 1)) as u16;
        let rest = hash >> 14;
        let rank = leading_zeros_plus_one(rest);
        self.set_register(index, rank)
    }

    fn set_register(&mut self, index: u16, rank: u8) -> bool {
        match self {
            Hll::Sparse(map) => {
                let changed = match map.get(&index) {
                    Some(&existing) if existing >= rank => false,
                    _ => {
                        map.insert(index, rank);
                        true
                    }
                };
                if map.len() > SPARSE_PROMOTE_THRESHOLD {
                    self.promote();
                }
                changed
            }
            Hll::Dense(regs) => {
                let slot = &mut regs[index as usize];
                if *slot < rank {
                    *slot = rank;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn promote(&mut self) {
        if let Hll::Sparse(map) = self {
            let mut regs = vec![0u8; REGISTER_COUNT];
            for (&idx, &rank) in map.iter() {
                regs[idx as usize] = rank;
            }
            *self = Hll::Dense(regs);
        }
    }

    pub fn register_at(&self, index: usize) -> u8 {
        match self {
            Hll::Sparse(map) => map.get(&(index as u16)).copied().unwrap_or(0),
            Hll::Dense(regs) => regs[index],
        }
    }

    /// Estimates cardinality via the standard HLL harmonic-mean estimator
    /// with small-range and large-range bias corrections.
    pub fn count(&self) -> u64 {
        let m = REGISTER_COUNT as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let mut sum = 0.0;
        let mut zeros = 0usize;
        for i in 0..REGISTER_COUNT {
            let r = self.register_at(i);
            sum += 1.0 / (1u64 << r) as f64;
            if r == 0 {
                zeros += 1;
            }
        }
        let raw = alpha * m * m / sum;
        let estimate = if raw <= 2.5 * m && zeros > 0 {
            m * (m / zeros as f64).ln()
        } else {
            raw
        };
        estimate.round().max(0.0) as u64
    }

    /// Merges `other` into `self`, register-wise max (PFMERGE semantics).
    pub fn merge(&mut self, other: &Hll) {
        self.promote_if_needed_for_merge(other);
        for i in 0..REGISTER_COUNT {
            let rank = other.register_at(i);
            if rank > 0 {
                self.set_register(i as u16, rank);
            }
        }
    }

    fn promote_if_needed_for_merge(&mut self, other: &Hll) {
        if matches!(other, Hll::Dense(_)) {
            self.promote();
        }
    }

    /// Approximate byte charge used for memory accounting.
    pub fn charge(&self) -> usize {
        match self {
            Hll::Dense(_) => REGISTER_COUNT,
            Hll::Sparse(map) => map.len() * 3,
        }
    }
}

fn hash64(value: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn leading_zeros_plus_one(rest: u64) -> u8 {
    // `rest` only occupies the low 50 bits (64 - 14 index bits); the upper
    // 14 bits are always zero, so subtract them out of the raw count.
    if rest == 0 {
        return 64 - 14 + 1;
    }
    (rest.leading_zeros() - 14 + 1) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_is_within_tolerance_for_known_cardinality() {
        let mut hll = Hll::new();
        for i in 0..10_000u32 {
            hll.add(format!("item-{i}").as_bytes());
        }
        let estimate = hll.count() as f64;
        let error = (estimate - 10_000.0).abs() / 10_000.0;
        assert!(error < 0.05, "relative error {error} too large, estimate={estimate}");
    }

    #[test]
    fn merge_is_union_like() {
        let mut a = Hll::new();
        let mut b = Hll::new();
        for i in 0..500u32 {
            a.add(format!("a-{i}").as_bytes());
        }
        for i in 0..500u32 {
            b.add(format!("b-{i}").as_bytes());
        }
        a.merge(&b);
        let estimate = a.count() as f64;
        assert!((estimate - 1000.0).abs() / 1000.0 < 0.1);
    }

    #[test]
    fn promotes_to_dense_past_threshold() {
        let mut hll = Hll::new();
        for i in 0..3000u32 {
            hll.add(format!("k{i}").as_bytes());
        }
        assert!(matches!(hll, Hll::Dense(_)));
    }
}
