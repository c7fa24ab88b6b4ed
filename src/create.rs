//! [`create`]: runs a user generator on a cooperative task, letting it push
//! items to a downstream subscriber under backpressure.

use crate::config::PipelineConfig;
use crate::emit::{DownstreamSlot, EmitShared, FiberEmitter};
use crate::error::FiberError;
use crate::handle::FiberHandle;
use crate::latch::Stop;
use crate::reactive::{Publisher, Subscriber, Subscription};
use crate::scheduler::{Cancel, Scheduler};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};

/// A user-supplied generator, invoked exactly once with a [`FiberEmitter`]
/// it uses to push items downstream.
///
/// Boxed as a one-shot async closure (rather than a single-method trait)
/// so a generator body can itself be an `async` block capturing its own
/// state, matching how the rest of this crate's public callback shapes are
/// expressed.
pub type FiberGenerator<T> = Box<
    dyn FnOnce(FiberEmitter<T>) -> Pin<Box<dyn Future<Output = Result<(), crate::error::BoxError>> + Send>>
        + Send,
>;

struct CreateSubscription<H> {
    shared: Arc<EmitShared>,
    fiber: Arc<FiberHandle<H>>,
}

impl<H: Cancel> Subscription for CreateSubscription<H> {
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
        self.fiber.cancel();
        self.shared.consumer_ready.resume();
    }
}

/// Subscribes to a `create` pipeline: spawns one cooperative task that runs
/// `generator` once, driven by the scheduler in `config`.
pub fn create<T, S>(generator: FiberGenerator<T>, scheduler: S, config: PipelineConfig) -> impl Publisher<T>
where
    T: Send + 'static,
    S: Scheduler,
{
    CreatePublisher {
        generator,
        scheduler,
        config,
    }
}

struct CreatePublisher<T, S: Scheduler> {
    generator: FiberGenerator<T>,
    scheduler: S,
    config: PipelineConfig,
}

impl<T, S> Publisher<T> for CreatePublisher<T, S>
where
    T: Send + 'static,
    S: Scheduler,
{
    fn subscribe(self: Box<Self>, mut subscriber: Box<dyn Subscriber<T> + Send>) {
        // `create` has no queue to size with `prefetch`; `config` is
        // accepted only so `create`/`transform` share one construction API.
        let Self {
            generator,
            scheduler,
            config: _config,
        } = *self;

        let shared = Arc::new(EmitShared::new());
        let fiber: Arc<FiberHandle<S::Handle>> = Arc::new(FiberHandle::new());

        let subscription = Box::new(CreateSubscription {
            shared: shared.clone(),
            fiber: fiber.clone(),
        });
        subscriber.on_subscribe(subscription);

        let downstream: Arc<DownstreamSlot<T>> = Arc::new(DownstreamSlot::new(subscriber));
        let emitter = FiberEmitter::new(shared.clone(), downstream.clone());

        let worker_shared = shared.clone();
        let worker_fiber = fiber.clone();
        let task: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            debug!("create worker starting");
            let result = generator(emitter).await;
            let cancelled = worker_shared.cancelled.load(Ordering::Acquire);
            let protocol_error = worker_shared.protocol_error.lock().unwrap().take();

            if let Some(err) = protocol_error {
                if !cancelled {
                    trace!("create generator stopped on a protocol error");
                    unsafe { downstream.with(|d| d.on_error(err)) };
                }
            } else {
                match result {
                    Ok(()) if !cancelled => {
                        trace!("create generator completed normally");
                        unsafe { downstream.with(|d| d.on_complete()) };
                    }
                    Ok(()) => {
                        trace!("create generator completed but pipeline was cancelled");
                    }
                    Err(e) if e.downcast_ref::<Stop>().is_some() => {
                        trace!("create generator unwound via STOP");
                    }
                    Err(e) if !cancelled => {
                        trace!("create generator raised a user-code error");
                        unsafe { downstream.with(|d| d.on_error(FiberError::UserCode(e))) };
                    }
                    Err(_) => {
                        trace!("create generator errored after cancellation; swallowing");
                    }
                }
            }

            worker_fiber.mark_self_terminated();
            debug!("create worker finished");
        });

        let handle = scheduler.spawn(task);
        fiber.set(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    enum Signal<T> {
        Next(T),
        Error(String),
        Complete,
    }

    struct Recording<T> {
        signals: Arc<Mutex<Vec<Signal<T>>>>,
        subscription: Arc<Mutex<Option<Box<dyn Subscription>>>>,
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

    fn gen_1_to_5() -> FiberGenerator<i32> {
        Box::new(|emitter: FiberEmitter<i32>| {
            Box::pin(async move {
                for i in 1..=5 {
                    emitter.emit(i).await?;
                }
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn bounded_demand_delivers_in_order_then_completes() {
        let scheduler = crate::scheduler::TokioScheduler::current();
        let config = PipelineConfig::new(4).unwrap();
        let signals = Arc::new(Mutex::new(Vec::new()));
        let subscription = Arc::new(Mutex::new(None));
        let subscriber = Box::new(Recording {
            signals: signals.clone(),
            subscription: subscription.clone(),
        });

        let publisher = create(gen_1_to_5(), scheduler, config);
        Box::new(publisher).subscribe(subscriber);

        let sub = subscription.lock().unwrap().take().unwrap();
        sub.request(3);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        sub.request(2);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let got = signals.lock().unwrap();
        let values: Vec<i32> = got
            .iter()
            .filter_map(|s| match s {
                Signal::Next(v) => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
        assert!(matches!(got.last(), Some(Signal::Complete)));
    }

    #[tokio::test]
    async fn early_cancel_stops_delivery_with_no_terminal_signal() {
        let scheduler = crate::scheduler::TokioScheduler::current();
        let config = PipelineConfig::new(16).unwrap();
        let signals = Arc::new(Mutex::new(Vec::new()));
        let subscription = Arc::new(Mutex::new(None));
        let subscriber = Box::new(Recording {
            signals: signals.clone(),
            subscription: subscription.clone(),
        });

        let generator: FiberGenerator<i32> = Box::new(|emitter: FiberEmitter<i32>| {
            Box::pin(async move {
                let mut i = 1;
                loop {
                    emitter.emit(i).await?;
                    i += 1;
                }
            })
        });

        let publisher = create(generator, scheduler, config);
        Box::new(publisher).subscribe(subscriber);

        let sub = subscription.lock().unwrap().take().unwrap();
        sub.request(10);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        sub.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let got = signals.lock().unwrap();
        let values: Vec<i32> = got
            .iter()
            .filter_map(|s| match s {
                Signal::Next(v) => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(values, (1..=10).collect::<Vec<_>>());
        assert!(!got.iter().any(|s| matches!(s, Signal::Complete | Signal::Error(_))));
    }
}
