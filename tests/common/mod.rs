//! Shared in-memory test doubles for the integration suite.

use fiberflow::{FiberError, Publisher, Subscriber, Subscription};
use std::sync::{Arc, Mutex};

/// Initializes a `tracing` subscriber for local debugging of the worker
/// lifecycle events `create`/`transform` emit. Idempotent; safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Signal<T> {
    Next(T),
    Error(String),
    Complete,
}

/// Downstream subscriber double recording every signal it receives, plus
/// the subscription handed to it so a test can drive `request`/`cancel`.
pub struct Recording<T> {
    pub signals: Arc<Mutex<Vec<Signal<T>>>>,
    pub subscription: Arc<Mutex<Option<Box<dyn Subscription>>>>,
}

impl<T> Recording<T> {
    pub fn new() -> (Box<Self>, Arc<Mutex<Vec<Signal<T>>>>, Arc<Mutex<Option<Box<dyn Subscription>>>>) {
        let signals = Arc::new(Mutex::new(Vec::new()));
        let subscription = Arc::new(Mutex::new(None));
        (
            Box::new(Self {
                signals: signals.clone(),
                subscription: subscription.clone(),
            }),
            signals,
            subscription,
        )
    }
}

impl<T: Send + 'static> Subscriber<T> for Recording<T> {
    fn on_subscribe(&mut self, subscription: Box<dyn Subscription>) {
        *self.subscription.lock().unwrap() = Some(subscription);
    }
    fn on_next(&mut self, item: T) {
        self.signals.lock().unwrap().push(Signal::Next(item));
    }
    fn on_error(&mut self, error: FiberError) {
        self.signals
            .lock()
            .unwrap()
            .push(Signal::Error(error.to_string()));
    }
    fn on_complete(&mut self) {
        self.signals.lock().unwrap().push(Signal::Complete);
    }
}

/// Boxes an arbitrary display message as a [`fiberflow::BoxError`], for
/// tests that need to hand a generator/transformer a concrete failure.
pub fn box_error(msg: impl std::fmt::Display) -> fiberflow::BoxError {
    #[derive(Debug)]
    struct Msg(String);
    impl std::fmt::Display for Msg {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }
    impl std::error::Error for Msg {}
    Box::new(Msg(msg.to_string()))
}

pub fn next_values<T: Clone>(signals: &[Signal<T>]) -> Vec<T> {
    signals
        .iter()
        .filter_map(|s| match s {
            Signal::Next(v) => Some(v.clone()),
            _ => None,
        })
        .collect()
}

struct NoopSubscription;
impl Subscription for NoopSubscription {
    fn request(&self, _n: i64) {}
    fn cancel(&self) {}
}

/// Upstream publisher double that pushes every item as soon as it is
/// subscribed, then delivers its configured terminal signal, ignoring
/// downstream demand entirely. Fine as long as `items.len() <= prefetch`
/// so every internal `offer` succeeds.
pub struct InstantPublisher<T> {
    pub items: Vec<T>,
    pub error: Option<FiberError>,
}

impl<T: Send + 'static> Publisher<T> for InstantPublisher<T> {
    fn subscribe(self: Box<Self>, mut subscriber: Box<dyn Subscriber<T> + Send>) {
        subscriber.on_subscribe(Box::new(NoopSubscription));
        for item in self.items {
            subscriber.on_next(item);
        }
        match self.error {
            Some(e) => subscriber.on_error(e),
            None => subscriber.on_complete(),
        }
    }
}

/// Upstream publisher double that only releases items once asked via
/// `request`, one-for-one, emitting its terminal signal once the backing
/// list is exhausted. Used by scenarios that assert on the exact upstream
/// `request` total (e.g. the 75% prefetch-refill watermark).
pub struct DemandDrivenPublisher<T> {
    pub items: Vec<T>,
    pub requested_total: Arc<std::sync::atomic::AtomicI64>,
}

impl<T> DemandDrivenPublisher<T> {
    /// Builds a publisher paired with a counter tracking the cumulative
    /// `n` passed to every `request` call it has received so far.
    pub fn new(items: Vec<T>) -> (Self, Arc<std::sync::atomic::AtomicI64>) {
        let requested_total = Arc::new(std::sync::atomic::AtomicI64::new(0));
        (
            Self {
                items,
                requested_total: requested_total.clone(),
            },
            requested_total,
        )
    }
}

struct DemandDrivenState<T> {
    items: Mutex<std::collections::VecDeque<T>>,
    requested_total: Arc<std::sync::atomic::AtomicI64>,
    // `UnsafeCell`, not a `Mutex`: `request()` reenters synchronously into
    // `on_subscribe` (the real pipeline issues its initial `request(prefetch)`
    // from inside `on_subscribe`), which a lock held across that call would
    // deadlock on. Calls are sequential, never concurrent, by construction -
    // same single-owner invariant `crate::emit::DownstreamSlot` documents.
    subscriber: std::cell::UnsafeCell<Box<dyn Subscriber<T> + Send>>,
}

unsafe impl<T> Send for DemandDrivenState<T> {}
unsafe impl<T> Sync for DemandDrivenState<T> {}

struct DemandDrivenSubscription<T> {
    state: Arc<DemandDrivenState<T>>,
}

impl<T: Send + 'static> Subscription for DemandDrivenSubscription<T> {
    fn request(&self, n: i64) {
        self.state
            .requested_total
            .fetch_add(n, std::sync::atomic::Ordering::Relaxed);
        let mut remaining = n.max(0);
        while remaining > 0 {
            let (next, exhausted) = {
                let mut items = self.state.items.lock().unwrap();
                (items.pop_front(), items.is_empty())
            };
            match next {
                Some(item) => {
                    unsafe { &mut *self.state.subscriber.get() }.on_next(item);
                    remaining -= 1;
                    // Signal completion as soon as the backing list runs dry,
                    // even if it happens to exactly satisfy this call's `n` -
                    // otherwise a request landing precisely on the remaining
                    // count would never see the empty-queue branch below, and
                    // the worker would park forever waiting for a completion
                    // that never arrives.
                    if exhausted {
                        unsafe { &mut *self.state.subscriber.get() }.on_complete();
                        return;
                    }
                }
                None => {
                    unsafe { &mut *self.state.subscriber.get() }.on_complete();
                    return;
                }
            }
        }
    }
    fn cancel(&self) {}
}

impl<T: Send + 'static> Publisher<T> for DemandDrivenPublisher<T> {
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<T> + Send>) {
        let state = Arc::new(DemandDrivenState {
            items: Mutex::new(self.items.into()),
            requested_total: self.requested_total,
            subscriber: std::cell::UnsafeCell::new(subscriber),
        });
        let subscription = Box::new(DemandDrivenSubscription {
            state: state.clone(),
        });
        unsafe { &mut *state.subscriber.get() }.on_subscribe(subscription);
    }
}
