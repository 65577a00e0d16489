//! The scaling engine.
//!
//! [`Scaler`] holds the immutable configuration of a run and
//! [`Scaler::exec`] starts one. The run is driven by a dispatcher task that
//! reads the input stream and hands each item to the shared intake queue.
//! When no worker takes an item within the scale-up delay, the dispatcher
//! spawns another one. Workers exit on their own once idle, so a quiet run
//! shrinks back to zero workers without any outside control.
//!
//! ## Shutdown ordering
//!
//! - The intake queue lives for the whole run and is released only after
//!   every worker has exited.
//! - Each worker writes to a private channel that a relay task forwards into
//!   the shared output. Workers and relays are tracked by one [`TaskTracker`].
//! - The dispatcher holds the last output sender and drops it only once its
//!   own loop has finished and the tracker has drained, so the output closes
//!   exactly once and never while a relay could still send.

use crate::{
    error::{Error, Result},
    handoff::{self, Handoff, Intake},
    intercept::{Intercept, InterceptFn, erase},
    recover::{recovered, spawn_recovered},
    relay,
    timer::Countdown,
    worker::{Headcount, Worker},
};
use core::{fmt, future::Future, num::NonZeroUsize, pin::pin, time::Duration};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::{sync::CancellationToken, task::TaskTracker};


/// Smallest scale-up delay. A zero delay is raised to this, which in practice
/// means "always spawn rather than wait".
pub const MIN_WAIT: Duration = Duration::from_nanos(1);

/// Floor for the worker idle lifetime.
pub const MIN_LIFE: Duration = Duration::from_micros(1);

/// Auto-scaling stream processor.
///
/// A `Scaler` starts with no workers at all. Items read from the input are
/// offered to the pool through an unbuffered hand-off; whenever an item waits
/// longer than [`with_wait`](Self::with_wait) for a taker, a new worker is
/// spawned. Each worker applies the interceptor and exits after
/// [`with_life`](Self::with_life) without receiving anything, bringing the
/// pool back to zero once the input goes quiet.
///
/// The interceptor is required. Everything else has a default:
///
/// - `wait`: zero, raised to [`MIN_WAIT`].
/// - `life`: zero, raised to [`MIN_LIFE`].
/// - `max_workers`: unbounded.
/// - `buffer`: output channel capacity of 1.
///
/// Outputs are not ordered relative to inputs. Items lost to cancellation or
/// to a panicking interceptor are dropped silently.
///
/// ```
/// use core::time::Duration;
/// use surge::Scaler;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let scaler = Scaler::new()
///     .with_wait(Duration::from_millis(1))
///     .with_life(Duration::from_millis(50))
///     .with_intercept(|_token, n: u64| async move { (n % 2 == 0).then(|| n * 10) });
///
/// let (tx, rx) = mpsc::channel(8);
/// let mut out = scaler.exec(CancellationToken::new(), rx).unwrap();
///
/// tokio::spawn(async move {
///     for n in 0..10 {
///         tx.send(n).await.unwrap();
///     }
/// });
///
/// let mut total = 0;
/// while let Some(v) = out.recv().await {
///     total += v;
/// }
/// assert_eq!(total, 200);
/// # });
/// ```
pub struct Scaler<T, U> {
    wait: Duration,
    life: Duration,
    max_workers: Option<NonZeroUsize>,
    buffer: usize,
    intercept: Option<InterceptFn<T, U>>,
}

impl<T, U> Scaler<T, U> {
    pub const fn new() -> Self {
        Self {
            wait: Duration::ZERO,
            life: Duration::ZERO,
            max_workers: None,
            buffer: 1,
            intercept: None,
        }
    }

    /// How long an item may wait for a free worker before another worker is
    /// spawned.
    #[must_use]
    pub const fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// How long a worker survives without receiving an item.
    #[must_use]
    pub const fn with_life(mut self, life: Duration) -> Self {
        self.life = life;
        self
    }

    /// Caps the number of live workers. Once reached, items wait for an
    /// existing worker instead of spawning a new one.
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: NonZeroUsize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Capacity of the output channel returned by [`exec`](Self::exec). Zero
    /// is treated as one.
    #[must_use]
    pub const fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    /// Sets the interceptor from a closure.
    ///
    /// The closure returns `Some(value)` to emit `value` and `None` to drop the
    /// item.
    #[must_use]
    pub fn with_intercept<F, Fut>(self, intercept: F) -> Self
    where
        F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<U>> + Send + 'static,
    {
        self.with_interceptor(intercept)
    }

    /// Sets the interceptor from any [`Intercept`] implementation.
    #[must_use]
    pub fn with_interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Intercept<T, U>,
    {
        self.intercept = Some(erase(interceptor));
        self
    }

    /// Applies the defaulting policy once, at the start of a run.
    fn settings(&self) -> Settings {
        Settings {
            wait: self.wait.max(MIN_WAIT),
            life: self.life.max(MIN_LIFE),
            max_workers: self.max_workers,
            buffer: self.buffer.max(1),
        }
    }
}

impl<T, U> Scaler<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    /// Starts a run over `input` and returns the output channel.
    ///
    /// The run ends, and the returned receiver closes, once `input` is closed
    /// and every worker has idled out, or as soon as `token` is cancelled.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingIntercept`] if no interceptor was configured.
    /// Nothing is spawned in that case.
    pub fn exec(
        &self,
        token: CancellationToken,
        input: mpsc::Receiver<T>,
    ) -> Result<mpsc::Receiver<U>> {
        self.exec_stream(token, ReceiverStream::new(input))
    }

    /// Like [`exec`](Self::exec), but reads from any [`Stream`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingIntercept`] if no interceptor was configured.
    pub fn exec_stream<S>(&self, token: CancellationToken, input: S) -> Result<mpsc::Receiver<U>>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let intercept = self.intercept.clone().ok_or(Error::MissingIntercept)?;
        let settings = self.settings();
        let (tx, rx) = mpsc::channel(settings.buffer);

        let dispatcher = Dispatcher {
            token,
            intercept,
            settings,
            tracker: TaskTracker::new(),
            headcount: Headcount::default(),
            spawned: 0,
        };
        tokio::spawn(dispatcher.run(input, tx));

        Ok(rx)
    }
}

impl<T, U> Default for Scaler<T, U> {
    fn default() -> Self {
        Self::new()
    }
}

// Derive would require `T: Clone, U: Clone`.
impl<T, U> Clone for Scaler<T, U> {
    fn clone(&self) -> Self {
        Self {
            wait: self.wait,
            life: self.life,
            max_workers: self.max_workers,
            buffer: self.buffer,
            intercept: self.intercept.clone(),
        }
    }
}

impl<T, U> fmt::Debug for Scaler<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scaler")
            .field("wait", &self.wait)
            .field("life", &self.life)
            .field("max_workers", &self.max_workers)
            .field("buffer", &self.buffer)
            .field("intercept", &self.intercept.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Effective configuration of a single run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Settings {
    wait: Duration,
    life: Duration,
    max_workers: Option<NonZeroUsize>,
    buffer: usize,
}

enum Event<T> {
    Cancelled,
    Ready(Option<handoff::Ticket<T>>),
    Saturated,
}

/// Owns one run: reads input, grows the worker set, and closes the output.
struct Dispatcher<T, U> {
    token: CancellationToken,
    intercept: InterceptFn<T, U>,
    settings: Settings,
    tracker: TaskTracker,
    headcount: Headcount,
    spawned: usize,
}

impl<T, U> Dispatcher<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    async fn run<S>(mut self, input: S, output: mpsc::Sender<U>)
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let (mut handoff, intake) = handoff::channel();

        recovered("dispatcher", self.dispatch(input, &mut handoff, &intake, &output)).await;

        // === Drain: wait for every worker and relay to finish ===
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Dispatcher draining {} live workers ({} spawned)",
            self.headcount.live(),
            self.spawned
        );
        self.tracker.close();
        self.tracker.wait().await;

        // The intake queue outlives every worker, and the output closes here
        // once the last sender goes away.
        drop(intake);
        drop(handoff);
        drop(output);

        #[cfg(feature = "tracing")]
        tracing::debug!("Run complete after {} workers", self.spawned);
    }

    async fn dispatch<S>(
        &mut self,
        input: S,
        handoff: &mut Handoff<T>,
        intake: &Intake<T>,
        output: &mpsc::Sender<U>,
    ) where
        S: Stream<Item = T>,
    {
        let mut input = pin!(input);
        let mut ticker = Countdown::new(self.settings.wait);

        loop {
            let mut item = tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Dispatcher cancelled while reading input");
                    return;
                }
                item = input.next() => match item {
                    Some(item) => item,
                    None => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Input exhausted");
                        return;
                    }
                },
            };

            // A fresh wait window for every item.
            ticker.rearm();

            loop {
                let event = tokio::select! {
                    biased;
                    () = self.token.cancelled() => Event::Cancelled,
                    ticket = handoff.ready() => Event::Ready(ticket),
                    () = ticker.fired() => Event::Saturated,
                };

                match event {
                    Event::Cancelled => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Dispatcher cancelled with an item in flight");
                        return;
                    }
                    Event::Ready(Some(ticket)) => match ticket.deliver(item) {
                        Ok(()) => break,
                        // The worker gave up waiting before we got to it.
                        Err(back) => item = back,
                    },
                    // Unreachable while `intake` is held, kept for totality.
                    Event::Ready(None) => return,
                    Event::Saturated => {
                        self.scale_up(intake, output);
                        ticker.rearm();
                    }
                }
            }
        }
    }

    /// Spawns one worker plus the relay that forwards its output.
    fn scale_up(&mut self, intake: &Intake<T>, output: &mpsc::Sender<U>) {
        let Some(badge) = self.headcount.hire(self.settings.max_workers) else {
            #[cfg(feature = "tracing")]
            tracing::trace!("Worker cap reached ({} live)", self.headcount.live());
            return;
        };

        let id = self.spawned;
        self.spawned += 1;

        #[cfg(feature = "tracing")]
        tracing::debug!("Scaling up: worker {id} ({} live)", self.headcount.live());

        let (worker_tx, worker_rx) = mpsc::channel(1);
        let worker = Worker::new(
            id,
            self.token.clone(),
            intake.clone(),
            Arc::clone(&self.intercept),
            self.settings.life,
            badge,
        );

        spawn_recovered(&self.tracker, "worker", async move {
            worker.run(worker_tx).await;
        });
        spawn_recovered(
            &self.tracker,
            "relay",
            relay::pipe(self.token.clone(), worker_rx, output.clone()),
        );
    }
}
