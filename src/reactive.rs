//! The reactive-streams contract this crate's pipelines present downstream
//! and consume from upstream.
//!
//! The full Reactive Streams `Publisher`/`Subscriber`/`Subscription`
//! contract is treated as an external collaborator, named by interface
//! only: serialised signals, non-blocking `request`/`cancel`, at most one
//! terminal signal. This module is that interface, kept deliberately small
//! - just enough surface for `create`/`transform` to be built and tested
//! against, not a general-purpose reactive-streams implementation.

use crate::error::FiberError;

/// A subscription a downstream subscriber uses to signal demand or cancel.
///
/// Both methods are wait-free: they must never block the caller.
pub trait Subscription: Send + Sync {
    /// Requests `n` additional items. `n <= 0` is a protocol error;
    /// implementations route it to `on_error` rather than panic.
    fn request(&self, n: i64);

    /// Cancels the subscription. Idempotent; non-blocking.
    fn cancel(&self);
}

/// A downstream consumer of items produced by a `create`/`transform`
/// pipeline.
///
/// The worker task is the sole caller of `downstream.on_next`/`on_error`/
/// `on_complete`, so these methods take `&mut self` - the pipeline owns
/// its downstream subscriber exclusively for the pipeline's lifetime, as
/// a borrowed collaborator.
pub trait Subscriber<T>: Send {
    /// Called exactly once, before any other signal, with the subscription
    /// the subscriber may use to request items or cancel.
    fn on_subscribe(&mut self, subscription: Box<dyn Subscription>);

    /// Delivers one item. Never called before `on_subscribe`, never called
    /// after a terminal signal or after `cancel()`.
    fn on_next(&mut self, item: T);

    /// Delivers a terminal error. At most one terminal signal is ever
    /// delivered in total (`on_error` xor `on_complete`, or neither if
    /// cancelled first).
    fn on_error(&mut self, error: FiberError);

    /// Delivers normal completion. See `on_error` for the at-most-once rule.
    fn on_complete(&mut self);
}

/// An upstream source of items, as consumed by [`crate::transform`].
pub trait Publisher<T>: Send {
    /// Subscribes `subscriber`, which receives exactly one `on_subscribe`
    /// call before any `on_next`/`on_error`/`on_complete`.
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T> + Send>);
}
