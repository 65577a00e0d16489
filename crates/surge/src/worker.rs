use crate::{handoff::Intake, intercept::InterceptFn, timer::Countdown};
use core::{num::NonZeroUsize, time::Duration};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why a worker stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Exit {
    /// The run's token was cancelled.
    Cancelled,
    /// No item arrived within the idle lifetime.
    Idle,
    /// The intake queue was closed.
    Closed,
    /// Nobody is reading the worker's output anymore.
    Detached,
}

enum Wake<T> {
    Cancelled,
    Idle,
    Item(Option<T>),
}

/// A single self-terminating worker bound to the shared intake queue.
///
/// Workers are spawned by the dispatcher and never stopped from the outside.
/// Each one waits for an item, applies the interceptor, forwards the result to
/// its private output when asked to, and exits on its own once it has been
/// idle for `life`, the token is cancelled, or the intake queue closes.
pub(crate) struct Worker<T, U> {
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    id: usize,
    token: CancellationToken,
    intake: Intake<T>,
    intercept: InterceptFn<T, U>,
    life: Duration,
    _badge: Badge,
}

impl<T, U> Worker<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    pub(crate) fn new(
        id: usize,
        token: CancellationToken,
        intake: Intake<T>,
        intercept: InterceptFn<T, U>,
        life: Duration,
        badge: Badge,
    ) -> Self {
        Self {
            id,
            token,
            intake,
            intercept,
            life,
            _badge: badge,
        }
    }

    /// Runs the worker loop until one of its exit conditions is met.
    ///
    /// `output` is the worker's private channel. Dropping it on return is what
    /// tells the relay to stop.
    pub(crate) async fn run(self, output: mpsc::Sender<U>) -> Exit {
        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {} started", self.id);

        let exit = self.work(&output).await;

        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {} stopped: {:?}", self.id, exit);

        exit
    }

    async fn work(&self, output: &mpsc::Sender<U>) -> Exit {
        let mut idle = Countdown::new(self.life);

        loop {
            let Some(mut slot) = self.intake.offer() else {
                return Exit::Closed;
            };

            let wake = tokio::select! {
                biased;
                () = self.token.cancelled() => Wake::Cancelled,
                () = idle.fired() => Wake::Idle,
                item = slot.recv() => Wake::Item(item),
            };

            let item = match wake {
                Wake::Cancelled => return Exit::Cancelled,
                // The dispatcher may have filled the slot in the same instant
                // the timer fired. That item was handed to us, so process it.
                Wake::Idle => match slot.retract() {
                    Some(item) => item,
                    None => return Exit::Idle,
                },
                Wake::Item(Some(item)) => item,
                Wake::Item(None) => return Exit::Closed,
            };

            if let Some(exit) = self.process(item, output).await {
                return exit;
            }

            // Any received item extends the worker's life, emitted or not.
            idle.rearm();
        }
    }

    /// Applies the interceptor to one item and forwards the result.
    ///
    /// Returns `Some` if the worker has to stop.
    async fn process(&self, item: T, output: &mpsc::Sender<U>) -> Option<Exit> {
        let intercepted = tokio::select! {
            biased;
            () = self.token.cancelled() => return Some(Exit::Cancelled),
            value = (self.intercept)(self.token.clone(), item) => value,
        };

        let value = intercepted?;

        tokio::select! {
            biased;
            () = self.token.cancelled() => Some(Exit::Cancelled),
            sent = output.send(value) => match sent {
                Ok(()) => None,
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {} output detached", self.id);
                    Some(Exit::Detached)
                }
            },
        }
    }
}

/// Count of live workers, used to enforce an optional cap.
///
/// Only the dispatcher hires, so a plain load-then-increment is race free with
/// respect to the cap. Workers decrement on exit through their [`Badge`].
#[derive(Clone, Debug, Default)]
pub(crate) struct Headcount(Arc<AtomicUsize>);

impl Headcount {
    /// Reserves a place for one more worker, unless `cap` is already reached.
    pub(crate) fn hire(&self, cap: Option<NonZeroUsize>) -> Option<Badge> {
        if cap.is_some_and(|cap| self.live() >= cap.get()) {
            return None;
        }
        self.0.fetch_add(1, Ordering::AcqRel);
        Some(Badge(Arc::clone(&self.0)))
    }

    pub(crate) fn live(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

/// Held by a worker for as long as it runs.
#[derive(Debug)]
pub(crate) struct Badge(Arc<AtomicUsize>);

impl Drop for Badge {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
