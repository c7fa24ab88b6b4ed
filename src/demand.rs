//! [`DemandCounter`]: a saturating, "unbounded at max" atomic demand tracker.
//!
//! `requested ≥ produced` is not an invariant here; the emitter side decides
//! when to park by comparing the two directly: it waits when
//! `produced == requested`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel meaning "unbounded demand" - saturating-add clamps here and never
/// overflows past it.
pub(crate) const UNBOUNDED: u64 = u64::MAX;

/// Atomic, saturating demand counter.
///
/// Multi-writer (any downstream thread may call [`DemandCounter::add`]),
/// multi-reader (the worker reads via [`DemandCounter::get`]).
pub(crate) struct DemandCounter {
    requested: AtomicU64,
}

impl DemandCounter {
    pub(crate) fn new() -> Self {
        Self {
            requested: AtomicU64::new(0),
        }
    }

    /// Saturating-adds `n` to the requested demand, clamping at [`UNBOUNDED`].
    pub(crate) fn add(&self, n: u64) {
        if n == 0 {
            return;
        }
        loop {
            let cur = self.requested.load(Ordering::Acquire);
            if cur == UNBOUNDED {
                return;
            }
            let next = cur.saturating_add(n).min(UNBOUNDED);
            if self
                .requested
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Current requested demand, as observed by the emitter.
    pub(crate) fn get(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }
}
