//! [`transform`]: consumes an upstream publisher through a bounded buffer,
//! runs a user transformer per item on a cooperative task, and pushes
//! results downstream under backpressure.

use crate::config::PipelineConfig;
use crate::emit::{DownstreamSlot, EmitShared, FiberEmitter};
use crate::error::{BoxError, FiberError};
use crate::handle::FiberHandle;
use crate::latch::{ParkLatch, Stop};
use crate::queue::Queue;
use crate::reactive::{Publisher, Subscriber, Subscription};
use crate::scheduler::{Cancel, Scheduler};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, trace};

/// A user-supplied per-item transformer, invoked once per upstream item with
/// the item and a [`FiberEmitter`] it uses to push results downstream.
/// May call `emit` zero or more times per invocation.
pub type FiberTransformer<T, R> = Box<
    dyn FnMut(T, FiberEmitter<R>) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>> + Send,
>;

/// State specific to the upstream-facing half of a `transform` pipeline -
/// the bounded buffer, the upstream terminal flags, and the work-in-progress
/// handoff counter.
struct UpstreamState<T> {
    queue: Queue<T>,
    producer_ready: ParkLatch,
    wip: AtomicU64,
    done: AtomicBool,
    error: Mutex<Option<FiberError>>,
    /// Set exactly once, in `UpstreamSink::on_subscribe`; read-only after
    /// that, so a `OnceLock` avoids taking a lock on every refill/cancel.
    upstream: OnceLock<Box<dyn Subscription>>,
}

impl<T> UpstreamState<T> {
    fn new(prefetch: usize) -> Self {
        Self {
            queue: Queue::new(prefetch),
            producer_ready: ParkLatch::new(),
            wip: AtomicU64::new(0),
            done: AtomicBool::new(false),
            error: Mutex::new(None),
            upstream: OnceLock::new(),
        }
    }

    /// Records an upstream handoff (`onNext`/terminal signal); resumes the
    /// worker if it was the first pending handoff.
    fn bump_wip(&self) {
        let prev = self.wip.fetch_add(1, Ordering::AcqRel);
        if prev == 0 {
            self.producer_ready.resume();
        }
    }
}

/// The subscriber this pipeline presents to its upstream publisher.
struct UpstreamSink<T> {
    shared: Arc<EmitShared>,
    upstream_state: Arc<UpstreamState<T>>,
    downstream: Arc<dyn DownstreamOnSubscribe>,
    prefetch: i64,
}

/// Narrow seam letting `UpstreamSink::on_subscribe` hand the downstream
/// subscription to the downstream subscriber without knowing `R`.
trait DownstreamOnSubscribe: Send + Sync {
    fn on_subscribe(&self, subscription: Box<dyn Subscription>);
}

struct DownstreamOnSubscribeImpl<R> {
    downstream: Arc<DownstreamSlot<R>>,
}
impl<R: Send + 'static> DownstreamOnSubscribe for DownstreamOnSubscribeImpl<R> {
    fn on_subscribe(&self, subscription: Box<dyn Subscription>) {
        // Safety: called once, before the worker task starts, so there is
        // no concurrent access to the downstream subscriber yet.
        unsafe { self.downstream.with(|d| d.on_subscribe(subscription)) };
    }
}

impl<T: Send + 'static> Subscriber<T> for UpstreamSink<T> {
    fn on_subscribe(&mut self, subscription: Box<dyn Subscription>) {
        let transform_subscription = Box::new(TransformSubscription {
            shared: self.shared.clone(),
            upstream_state: self.upstream_state.clone(),
        });
        self.downstream.on_subscribe(transform_subscription);
        subscription.request(self.prefetch);
        let _ = self.upstream_state.upstream.set(subscription);
    }

    fn on_next(&mut self, item: T) {
        // Guaranteed to succeed: upstream never has more than `prefetch`
        // outstanding.
        let _ = self.upstream_state.queue.offer(item);
        self.upstream_state.bump_wip();
    }

    fn on_error(&mut self, error: FiberError) {
        *self.upstream_state.error.lock().unwrap() = Some(error);
        self.upstream_state.done.store(true, Ordering::Release);
        self.upstream_state.bump_wip();
    }

    fn on_complete(&mut self) {
        self.upstream_state.done.store(true, Ordering::Release);
        self.upstream_state.bump_wip();
    }
}

/// The subscription presented to the downstream subscriber.
struct TransformSubscription<T> {
    shared: Arc<EmitShared>,
    upstream_state: Arc<UpstreamState<T>>,
}

impl<T: Send + 'static> Subscription for TransformSubscription<T> {
    fn request(&self, n: i64) {
        if n <= 0 {
            *self.shared.protocol_error.lock().unwrap() = Some(FiberError::InvalidRequest(n));
            self.shared.consumer_ready.resume();
            return;
        }
        self.shared.requested.add(n as u64);
        self.shared.consumer_ready.resume();
    }

    fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        if let Some(upstream) = self.upstream_state.upstream.get() {
            upstream.cancel();
        }
        self.shared.consumer_ready.resume();
        self.upstream_state.producer_ready.resume();
    }
}

/// Subscribes `upstream` through a `transform` pipeline: spawns one
/// cooperative task that polls the internal queue, invokes `transformer`
/// per item, and pushes results to the eventual downstream subscriber.
pub fn transform<T, R, S>(
    upstream: Box<dyn Publisher<T>>,
    transformer: FiberTransformer<T, R>,
    scheduler: S,
    config: PipelineConfig,
) -> impl Publisher<R>
where
    T: Send + 'static,
    R: Send + 'static,
    S: Scheduler,
{
    TransformPublisher {
        upstream,
        run: transformer,
        scheduler,
        config,
    }
}

struct TransformPublisher<T, R, S: Scheduler> {
    upstream: Box<dyn Publisher<T>>,
    run: FiberTransformer<T, R>,
    scheduler: S,
    config: PipelineConfig,
}

impl<T, R, S> Publisher<R> for TransformPublisher<T, R, S>
where
    T: Send + 'static,
    R: Send + 'static,
    S: Scheduler,
{
    fn subscribe(self: Box<Self>, subscriber: Box<dyn Subscriber<R> + Send>) {
        let Self {
            upstream,
            mut run,
            scheduler,
            config,
        } = *self;

        let shared = Arc::new(EmitShared::new());
        let fiber: Arc<FiberHandle<S::Handle>> = Arc::new(FiberHandle::new());
        let upstream_state = Arc::new(UpstreamState::<T>::new(config.prefetch()));
        let downstream: Arc<DownstreamSlot<R>> = Arc::new(DownstreamSlot::new(subscriber));

        let emitter = FiberEmitter::new(shared.clone(), downstream.clone());

        let sink = Box::new(UpstreamSink {
            shared: shared.clone(),
            upstream_state: upstream_state.clone(),
            downstream: Arc::new(DownstreamOnSubscribeImpl {
                downstream: downstream.clone(),
            }),
            prefetch: config.prefetch() as i64,
        });
        upstream.subscribe(sink);

        let worker_shared = shared.clone();
        let worker_state = upstream_state.clone();
        let worker_downstream = downstream.clone();
        let worker_fiber = fiber.clone();
        let limit = config.refill_limit();
        let initial_prefetch = config.prefetch() as u64;

        let task: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            debug!("transform worker starting");
            let mut consumed = 0usize;
            let mut wip_seen = 0u64;
            // Cumulative amount ever requested from upstream, starting with the
            // initial `request(prefetch)` issued from `on_subscribe`. A refill is
            // only worth issuing up to what downstream demand can still absorb -
            // otherwise the watermark keeps firing every `limit` polled items
            // regardless of whether downstream ever asked for that many.
            let mut granted = initial_prefetch;

            let deliver_protocol_error = |cancelled: bool| {
                if !cancelled {
                    if let Some(err) = worker_shared.protocol_error.lock().unwrap().take() {
                        unsafe { worker_downstream.with(|d| d.on_error(err)) };
                    }
                }
            };

            'worker: loop {
                if worker_shared.should_stop() {
                    let cancelled = worker_shared.cancelled.load(Ordering::Acquire);
                    deliver_protocol_error(cancelled);
                    break 'worker;
                }

                let done = worker_state.done.load(Ordering::Acquire);
                let item = worker_state.queue.poll();

                match item {
                    Some(v) => {
                        consumed += 1;
                        if consumed == limit {
                            consumed = 0;
                            if !worker_state.done.load(Ordering::Acquire) {
                                let demand = worker_shared.requested.get();
                                let need = demand.saturating_sub(granted).min(limit as u64);
                                if need > 0 {
                                    if let Some(s) = worker_state.upstream.get() {
                                        s.request(need as i64);
                                    }
                                    granted += need;
                                }
                            }
                        }
                        let result = run(v, emitter.clone()).await;
                        match result {
                            Ok(()) => continue 'worker,
                            Err(e) if e.downcast_ref::<Stop>().is_some() => {
                                trace!("transform unwound via STOP");
                                let cancelled = worker_shared.cancelled.load(Ordering::Acquire);
                                deliver_protocol_error(cancelled);
                                break 'worker;
                            }
                            Err(e) => {
                                trace!("transformer raised a user-code error");
                                if let Some(s) = worker_state.upstream.get() {
                                    s.cancel();
                                }
                                if !worker_shared.cancelled.load(Ordering::Acquire) {
                                    unsafe {
                                        worker_downstream.with(|d| d.on_error(FiberError::UserCode(e)))
                                    };
                                }
                                break 'worker;
                            }
                        }
                    }
                    None if done => {
                        let err = worker_state.error.lock().unwrap().take();
                        if !worker_shared.cancelled.load(Ordering::Acquire) {
                            match err {
                                Some(e) => unsafe { worker_downstream.with(|d| d.on_error(e)) },
                                None => unsafe { worker_downstream.with(|d| d.on_complete()) },
                            }
                        }
                        break 'worker;
                    }
                    None => {
                        let prev = worker_state.wip.fetch_add(0u64.wrapping_sub(wip_seen), Ordering::AcqRel);
                        wip_seen = prev.wrapping_sub(wip_seen);
                        if wip_seen == 0 {
                            worker_state.producer_ready.park().await;
                        }
                    }
                }
            }

            worker_state.queue.clear();
            worker_fiber.mark_self_terminated();
            debug!("transform worker finished");
        });

        let handle = scheduler.spawn(task);
        fiber.set(handle);
    }
}
