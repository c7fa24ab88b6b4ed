//! [`FiberHandle`]: a cancel-capable handle to the spawned cooperative task.
//!
//! This resolves the race between "spawn task" and "cancel/terminal before
//! the handle is stored": whichever of `set` and `cancel` runs second
//! observes the other's effect and does the right thing, with no step ever
//! blocked on the other.
//!
//! The atomic "self" sentinel is encoded as a tagged union
//! `{empty, handle(H), terminated}` rather than mixing a sentinel pointer
//! with a real handle value; that's exactly `FiberSlot` below. The slot is
//! guarded by a plain [`std::sync::Mutex`] rather than a lock-free CAS
//! because it is written at most twice per pipeline lifetime (install,
//! cancel-or-self-exit) - an ambient-path exception documented in
//! DESIGN.md, not a hot-path primitive (the "no mutexes required" goal
//! applies to the queue/demand/flags, not this rare-event slot).

use crate::scheduler::Cancel;
use std::sync::Mutex;

enum FiberSlot<H> {
    Empty,
    Handle(H),
    Terminated,
}

/// Cancel-capable handle to a pipeline's single spawned cooperative task.
pub(crate) struct FiberHandle<H> {
    slot: Mutex<FiberSlot<H>>,
}

impl<H: Cancel> FiberHandle<H> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(FiberSlot::Empty),
        }
    }

    /// Installs `handle` as the pipeline's task handle.
    ///
    /// If the slot was already terminated (a `cancel()` or the worker's own
    /// self-exit raced ahead of the spawn call returning), `handle` is
    /// cancelled immediately instead of being stored.
    pub(crate) fn set(&self, handle: H) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match *slot {
            FiberSlot::Terminated => handle.cancel(),
            FiberSlot::Empty | FiberSlot::Handle(_) => *slot = FiberSlot::Handle(handle),
        }
    }

    /// Swaps in the terminal sentinel, cancelling whatever handle was
    /// previously stored (if any). Idempotent: a second call is a no-op.
    pub(crate) fn cancel(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        let prev = std::mem::replace(&mut *slot, FiberSlot::Terminated);
        if let FiberSlot::Handle(h) = prev {
            h.cancel();
        }
    }

    /// Marks the slot terminal without cancelling anything, used by the
    /// worker task itself on its own normal-completion exit path so a late
    /// [`FiberHandle::set`] knows to self-cancel instead of leaking.
    pub(crate) fn mark_self_terminated(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = FiberSlot::Terminated;
    }
}
