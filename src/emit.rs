//! Shared state and the public [`FiberEmitter`] handle used by both the
//! `create` and `transform` pipelines.
//!
//! `requested`/`produced`/`consumerReady`/`cancelled` belong to both
//! pipelines equally; this module factors that shared slice out once, since
//! `emit`'s semantics are identical for `create` and `transform` modulo
//! which pipeline owns the rest of the state.

use crate::demand::{DemandCounter, UNBOUNDED};
use crate::error::{BoxError, FiberError};
use crate::latch::{ParkLatch, Stop};
use crate::reactive::Subscriber;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// State an `emit` call needs: the downstream demand counter, the latch an
/// exhausted emitter parks on, the cancellation flag, and the first
/// protocol error raised by a misbehaving downstream (`request(n <= 0)` is
/// treated as a protocol error here - see DESIGN.md's Open Question (a)).
pub(crate) struct EmitShared {
    pub(crate) requested: DemandCounter,
    pub(crate) consumer_ready: ParkLatch,
    pub(crate) cancelled: AtomicBool,
    pub(crate) protocol_error: Mutex<Option<FiberError>>,
    produced: AtomicU64,
}

impl EmitShared {
    pub(crate) fn new() -> Self {
        Self {
            requested: DemandCounter::new(),
            consumer_ready: ParkLatch::new(),
            cancelled: AtomicBool::new(false),
            protocol_error: Mutex::new(None),
            produced: AtomicU64::new(0),
        }
    }

    /// True once either an explicit `cancel()` or a protocol error has
    /// doomed the pipeline; `emit` must stop delivering items in both cases.
    pub(crate) fn should_stop(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.protocol_error.lock().unwrap().is_some()
    }
}

/// Holds the downstream subscriber so it can be reached from `emit` (driven
/// by user code) and from the worker's own terminal-signal delivery,
/// without giving either side a borrow with an awkward lifetime.
///
/// Plain `UnsafeCell` rather than a `Mutex`: access is guarded not by a
/// lock but by a documented single-owner invariant enforced by this
/// crate's call structure - only the pipeline's one worker task (and the
/// user generator/transformer it drives, synchronously, on its behalf)
/// ever calls into the downstream subscriber, and never concurrently with
/// itself.
pub(crate) struct DownstreamSlot<T> {
    cell: UnsafeCell<Box<dyn Subscriber<T> + Send>>,
}

// Safety: see the single-owner invariant documented on `DownstreamSlot`.
unsafe impl<T> Send for DownstreamSlot<T> {}
unsafe impl<T> Sync for DownstreamSlot<T> {}

impl<T> DownstreamSlot<T> {
    pub(crate) fn new(subscriber: Box<dyn Subscriber<T> + Send>) -> Self {
        Self {
            cell: UnsafeCell::new(subscriber),
        }
    }

    /// Runs `f` against the downstream subscriber.
    ///
    /// # Safety
    ///
    /// The caller must guarantee this is only ever invoked from the
    /// pipeline's single worker task, never concurrently with another call
    /// to `with`.
    pub(crate) unsafe fn with<R>(&self, f: impl FnOnce(&mut (dyn Subscriber<T> + Send)) -> R) -> R {
        f(unsafe { &mut *self.cell.get() })
    }
}

/// The handle a [`crate::create::FiberGenerator`] or
/// [`crate::transform::FiberTransformer`] uses to push items downstream.
///
/// Cheap to clone (two `Arc` bumps); every clone refers to the same
/// pipeline state, which is fine because by construction only the
/// pipeline's own worker task ever drives it.
pub struct FiberEmitter<T> {
    shared: Arc<EmitShared>,
    downstream: Arc<DownstreamSlot<T>>,
}

impl<T> Clone for FiberEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            downstream: self.downstream.clone(),
        }
    }
}

impl<T: Send + 'static> FiberEmitter<T> {
    pub(crate) fn new(shared: Arc<EmitShared>, downstream: Arc<DownstreamSlot<T>>) -> Self {
        Self { shared, downstream }
    }

    /// Pushes `item` downstream, parking the calling cooperative task while
    /// downstream demand is exhausted.
    ///
    /// Rust's ownership model makes constructing a "null" owned value of a
    /// generic `T` structurally impossible (unlike a nullable-reference
    /// item type), so the null-rejection check a source language would need
    /// here has no runtime work left to do for a well-typed `T` - see
    /// DESIGN.md for the full reasoning.
    ///
    /// Returns an error boxing the internal `Stop` sentinel if the pipeline
    /// was cancelled while parked or is already cancelled; callers (the
    /// user's generator/transformer body) are expected to propagate this
    /// with `?`. The worker loop recognizes it via `downcast_ref` and
    /// unwinds silently rather than calling `on_error` - `Stop` itself
    /// stays private, so it can never be named or matched on by caller
    /// code, only propagated.
    pub async fn emit(&self, item: T) -> Result<(), BoxError> {
        loop {
            let produced = self.shared.produced.load(Ordering::Relaxed);
            let requested = self.shared.requested.get();
            if requested != produced || requested == UNBOUNDED {
                break;
            }
            if self.shared.should_stop() {
                return Err(Box::new(Stop));
            }
            self.shared.consumer_ready.park().await;
        }

        if self.shared.should_stop() {
            return Err(Box::new(Stop));
        }

        // Safety: only the worker task (directly, or through the
        // generator/transformer it drives) ever calls `emit`.
        unsafe { self.downstream.with(|d| d.on_next(item)) };
        self.shared.produced.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
