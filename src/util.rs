// src/util.rs
//! Shared cross-thread signaling primitive. Grounded on the teacher's
//! `util.rs`, which carried this same `BarrierFlag` alongside pipeline-tuning
//! helpers (core pinning, realtime scheduling, `mlockall`); those helpers
//! have no counterpart in a key-value server and were dropped (see
//! DESIGN.md).

use std::sync::atomic::{AtomicBool, Ordering};

pub struct BarrierFlag(AtomicBool);

impl Default for BarrierFlag {
    fn default() -> Self {
        Self(AtomicBool::new(false))
    }
}

impl BarrierFlag {
    #[inline]
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    #[inline]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
