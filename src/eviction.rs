//! Sampled eviction (C3, §4.3). Grounded on the teacher's `metrics.rs`
//! counter-increment idiom (`evicted_keys` mirrors its `EVICTED` counter
//! style) and on `orderbook.rs`'s flat iterate-then-remove pattern,
//! generalized from a single price level to a policy-sorted key sample.

use std::fmt;
use std::str::FromStr;

use crate::keyspace::{now_ms, Keyspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    NoEviction,
    AllKeysRandom,
    AllKeysLru,
    AllKeysLfu,
    VolatileRandom,
    VolatileLru,
    VolatileLfu,
    VolatileTtl,
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no-eviction" => Ok(EvictionPolicy::NoEviction),
            "allkeys-random" => Ok(EvictionPolicy::AllKeysRandom),
            "allkeys-lru" => Ok(EvictionPolicy::AllKeysLru),
            "allkeys-lfu" => Ok(EvictionPolicy::AllKeysLfu),
            "volatile-random" => Ok(EvictionPolicy::VolatileRandom),
            "volatile-lru" => Ok(EvictionPolicy::VolatileLru),
            "volatile-lfu" => Ok(EvictionPolicy::VolatileLfu),
            "volatile-ttl" => Ok(EvictionPolicy::VolatileTtl),
            other => Err(format!("unknown maxmemory-policy {other:?}")),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvictionPolicy::NoEviction => "no-eviction",
            EvictionPolicy::AllKeysRandom => "allkeys-random",
            EvictionPolicy::AllKeysLru => "allkeys-lru",
            EvictionPolicy::AllKeysLfu => "allkeys-lfu",
            EvictionPolicy::VolatileRandom => "volatile-random",
            EvictionPolicy::VolatileLru => "volatile-lru",
            EvictionPolicy::VolatileLfu => "volatile-lfu",
            EvictionPolicy::VolatileTtl => "volatile-ttl",
        };
        f.write_str(s)
    }
}

impl EvictionPolicy {
    fn is_volatile(&self) -> bool {
        matches!(
            self,
            EvictionPolicy::VolatileRandom
                | EvictionPolicy::VolatileLru
                | EvictionPolicy::VolatileLfu
                | EvictionPolicy::VolatileTtl
        )
    }
}

#[derive(Debug)]
pub enum EvictionOutcome {
    /// Enough candidates were removed to admit the incoming write.
    Admitted,
    /// Eviction is disabled and the budget is already exceeded.
    Disabled,
    /// The sample was exhausted without reaching the budget.
    BudgetUnreachable,
}

/// Runs one eviction pass against `ks` to admit a write of `delta` bytes,
/// per the policy and sample size. Caller must not hold the keyspace write
/// lock across this call if eviction itself needs to re-acquire it —
/// here `ks` is taken by `&mut` directly since the server's coarse lock
/// already covers the whole admission-plus-write critical section.
pub fn evict_to_admit(
    ks: &mut Keyspace,
    policy: EvictionPolicy,
    samples: usize,
    delta: i64,
    maxmemory: u64,
) -> EvictionOutcome {
    if maxmemory == 0 || ks.mem + delta < maxmemory as i64 {
        return EvictionOutcome::Admitted;
    }
    if policy == EvictionPolicy::NoEviction {
        return EvictionOutcome::Disabled;
    }

    let mut candidates = ks.sample(samples);
    if policy.is_volatile() {
        candidates.retain(|(_, item)| item.expiry.is_some());
    }

    match policy {
        EvictionPolicy::AllKeysLru | EvictionPolicy::VolatileLru => {
            candidates.sort_by_key(|(_, item)| item.last_accessed);
        }
        EvictionPolicy::AllKeysLfu | EvictionPolicy::VolatileLfu => {
            candidates.sort_by_key(|(_, item)| item.access_count);
        }
        EvictionPolicy::VolatileTtl => {
            candidates.sort_by_key(|(_, item)| item.expiry.unwrap_or(u64::MAX));
        }
        EvictionPolicy::AllKeysRandom | EvictionPolicy::VolatileRandom => {
            // native sample order already approximates randomness
        }
        EvictionPolicy::NoEviction => unreachable!(),
    }

    for (key, _) in &candidates {
        if ks.mem + delta < maxmemory as i64 {
            break;
        }
        if ks.remove(key).is_some() {
            ks.evicted_keys += 1;
        }
    }
    if ks.mem + delta < maxmemory as i64 {
        EvictionOutcome::Admitted
    } else {
        EvictionOutcome::BudgetUnreachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::Keyspace;

    #[test]
    fn no_eviction_policy_refuses_over_budget_write() {
        let mut ks = Keyspace::new();
        ks.put_string(b"a".to_vec(), vec![0u8; 500]);
        let outcome = evict_to_admit(&mut ks, EvictionPolicy::NoEviction, 5, 100, 200);
        assert!(matches!(outcome, EvictionOutcome::Disabled));
    }

    #[test]
    fn allkeys_random_frees_enough_budget() {
        let mut ks = Keyspace::new();
        for i in 0..50 {
            ks.put_string(format!("k{i}").into_bytes(), vec![0u8; 100]);
        }
        let before = ks.dbsize();
        let outcome = evict_to_admit(&mut ks, EvictionPolicy::AllKeysRandom, 50, 100, 1024);
        assert!(matches!(outcome, EvictionOutcome::Admitted));
        assert!(ks.dbsize() < before);
    }

    #[test]
    fn volatile_policy_only_considers_keys_with_ttl() {
        let mut ks = Keyspace::new();
        ks.put_string(b"persistent".to_vec(), vec![0u8; 2000]);
        ks.put_string(b"temp".to_vec(), vec![0u8; 100]);
        ks.set_expiry(b"temp", Some(now_ms() + 10_000));
        evict_to_admit(&mut ks, EvictionPolicy::VolatileRandom, 10, 0, 500);
        assert!(ks.peek(b"persistent").is_some());
    }
}
