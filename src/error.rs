//! Error kinds surfaced to downstream subscribers.
//!
//! The `STOP` cancellation sentinel is deliberately *not* a variant here -
//! it never reaches a [`Subscriber`](crate::reactive::Subscriber) and lives
//! instead as the private [`crate::latch::Stop`] marker.

use std::fmt;

/// A boxed user-code error, as thrown by a [`FiberGenerator`](crate::create::FiberGenerator)
/// or [`FiberTransformer`](crate::transform::FiberTransformer).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can reach a downstream subscriber's `on_error`, or be returned
/// synchronously from a misuse of the public API.
#[derive(thiserror::Error, Debug)]
pub enum FiberError {
    /// `request(n)` was called with `n <= 0`.
    ///
    /// Treated as a protocol error routed to `on_error` rather than silently
    /// ignored, so that misbehaving downstreams are observable (see
    /// DESIGN.md's Open Question (a)).
    #[error("request({0}) is not a positive demand")]
    InvalidRequest(i64),

    /// The upstream publisher signalled `on_error`.
    #[error("upstream error: {0}")]
    Upstream(#[source] BoxError),

    /// The user-supplied generator or transformer returned an error.
    #[error("user code error: {0}")]
    UserCode(#[source] BoxError),

    /// `prefetch == 0`; a configuration error raised at construction time,
    /// not a runtime protocol error.
    #[error("prefetch must be greater than zero")]
    InvalidPrefetch,
}

/// A minimal `Debug`-only wrapper used in tests and examples to box an
/// arbitrary display message as a [`BoxError`].
pub(crate) fn box_error(msg: impl fmt::Display) -> BoxError {
    #[derive(Debug)]
    struct Msg(String);
    impl fmt::Display for Msg {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }
    impl std::error::Error for Msg {}
    Box::new(Msg(msg.to_string()))
}
