//! The cooperative-task scheduler collaborator.
//!
//! The scheduler is an external collaborator ("thread pool, virtual-thread
//! executor, or similar"), defined by interface only. This module gives
//! that interface a concrete shape plus the one implementation this crate
//! ships: a thin wrapper over a [`tokio::runtime::Handle`].

use std::future::Future;
use std::pin::Pin;

/// A task submitted to a [`Scheduler`].
pub type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Something that can cancel a previously spawned task.
///
/// This is the cancellable task handle: disposing it cancels the pending
/// task and releases its carrier thread.
pub trait Cancel: Send + Sync + 'static {
    /// Cancels the task. Must be idempotent and must not block.
    fn cancel(&self);
}

/// Creates a disposable worker and accepts exactly one task submission per
/// pipeline: each pipeline instance reserves one scheduler worker and
/// spawns exactly one cooperative task on it.
pub trait Scheduler: Send + Sync + 'static {
    /// The cancel handle returned by [`Scheduler::spawn`].
    type Handle: Cancel;

    /// Spawns `task` as a cooperative task, returning a handle that can
    /// cancel it.
    fn spawn(&self, task: BoxTask) -> Self::Handle;
}

/// A [`Scheduler`] backed by a [`tokio::runtime::Handle`].
///
/// Each `TokioScheduler` is cheap to clone (it wraps a runtime handle) and
/// can be shared across many `create`/`transform` pipelines; each
/// `spawn` still only ever runs one task per call, per the one-worker-per-
/// pipeline contract.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    /// Builds a scheduler around an explicit runtime handle.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Builds a scheduler around the handle of the runtime the caller is
    /// currently running on.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context, same as
    /// [`tokio::runtime::Handle::current`].
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

/// Cancel handle for [`TokioScheduler`]: aborts the underlying
/// [`tokio::task::JoinHandle`].
pub struct TokioTaskHandle {
    join: tokio::task::JoinHandle<()>,
}

impl Cancel for TokioTaskHandle {
    fn cancel(&self) {
        self.join.abort();
    }
}

impl Scheduler for TokioScheduler {
    type Handle = TokioTaskHandle;

    fn spawn(&self, task: BoxTask) -> Self::Handle {
        let join = self.handle.spawn(task);
        TokioTaskHandle { join }
    }
}
