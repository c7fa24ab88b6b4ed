//! [`ParkLatch`]: a one-shot-reusable, single-waiter park/unpark primitive.
//!
//! A `resume()` that precedes a `park()` makes the next `park()`
//! non-blocking exactly once; a permit is a boolean, not a count, so
//! repeated `resume()` calls before a `park()` collapse to a single wakeup.
//!
//! The `{empty, armed, permit}` tagged state machine pairs one `AtomicU8`
//! for the permit tag with one [`AtomicWaker`] to carry the actual task
//! wakeup across the suspend/resume boundary.

use futures::task::AtomicWaker;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};

const EMPTY: u8 = 0;
const ARMED: u8 = 1;
const PERMIT: u8 = 2;

/// Single-consumer park/unpark latch.
///
/// Only one task may ever call [`ParkLatch::park`] concurrently (at most one
/// waiter at a time); any number of tasks may call [`ParkLatch::resume`].
pub(crate) struct ParkLatch {
    state: AtomicU8,
    waker: AtomicWaker,
}

impl ParkLatch {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            waker: AtomicWaker::new(),
        }
    }

    /// Deposits a permit, waking the parked task if one is waiting.
    ///
    /// Idempotent: calling `resume` while a permit is already pending does
    /// nothing - calling it multiple times before the next `park()` is
    /// equivalent to calling it once.
    pub(crate) fn resume(&self) {
        loop {
            let cur = self.state.load(Ordering::Acquire);
            match cur {
                PERMIT => return,
                ARMED => {
                    if self
                        .state
                        .compare_exchange(ARMED, PERMIT, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.waker.wake();
                        return;
                    }
                }
                EMPTY => {
                    if self
                        .state
                        .compare_exchange(EMPTY, PERMIT, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                _ => unreachable!("ParkLatch state is one of EMPTY, ARMED, PERMIT"),
            }
        }
    }

    /// Blocks the calling cooperative task until a permit is available,
    /// consuming it atomically.
    pub(crate) fn park(&self) -> Park<'_> {
        Park { latch: self }
    }
}

/// The future returned by [`ParkLatch::park`].
#[must_use = "futures do nothing unless polled"]
pub(crate) struct Park<'a> {
    latch: &'a ParkLatch,
}

impl Future for Park<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let latch = self.latch;

        // Fast path: a permit is already sitting there.
        if latch
            .state
            .compare_exchange(PERMIT, EMPTY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Poll::Ready(());
        }

        latch.waker.register(cx.waker());

        // Re-check after registering: `resume` may have deposited a permit
        // between our first check and the waker registration.
        if latch
            .state
            .compare_exchange(PERMIT, EMPTY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Poll::Ready(());
        }

        // No permit yet: arm the latch so a racing `resume` knows a waker is
        // registered (this transition is only informational; `resume` treats
        // EMPTY and ARMED identically and the waker is already registered).
        let _ = latch
            .state
            .compare_exchange(EMPTY, ARMED, Ordering::AcqRel, Ordering::Acquire);

        Poll::Pending
    }
}

/// Internal cancellation sentinel used to unwind a parked `emit` call.
///
/// Distinguished by type identity via downcasting, never by message: `emit`
/// boxes it directly into a [`crate::error::BoxError`], the `?` operator in
/// a generator/transformer body propagates it unchanged, and
/// the worker loops in [`crate::create`] and [`crate::transform`] recognize
/// it with `downcast_ref::<Stop>()` and exit silently rather than calling
/// `on_error`. Kept private so it can never be named outside this crate;
/// it must never escape to a downstream subscriber.
#[derive(Debug)]
pub(crate) struct Stop;

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("fiberflow: cooperative task unwinding after cancellation")
    }
}

impl std::error::Error for Stop {}
