use core::future::Future;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The transform applied by every worker.
///
/// An interceptor receives the run's [`CancellationToken`] and one input item,
/// and resolves to `Some(output)` when the result should be emitted or `None`
/// when it should be dropped.
///
/// Workers call `intercept` concurrently and without any synchronization, so
/// implementations must be safe to share across tasks. Any
/// `Fn(CancellationToken, T) -> impl Future<Output = Option<U>>` closure can be
/// handed to [`crate::Scaler::with_intercept`] directly; implement this trait
/// for stateful transforms and use [`crate::Scaler::with_interceptor`].
pub trait Intercept<T, U>: Send + Sync + 'static {
    /// The future is polled on whichever worker picked up the item, so it must
    /// be `Send` and own everything it touches.
    type Future: Future<Output = Option<U>> + Send + 'static;

    fn intercept(&self, token: CancellationToken, item: T) -> Self::Future;
}

impl<T, U, F, Fut> Intercept<T, U> for F
where
    F: Fn(CancellationToken, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<U>> + Send + 'static,
{
    type Future = Fut;

    fn intercept(&self, token: CancellationToken, item: T) -> Self::Future {
        self(token, item)
    }
}

/// Type-erased interceptor shared by the dispatcher and all of its workers.
pub(crate) type InterceptFn<T, U> =
    Arc<dyn Fn(CancellationToken, T) -> BoxFuture<'static, Option<U>> + Send + Sync>;

pub(crate) fn erase<T, U, I>(interceptor: I) -> InterceptFn<T, U>
where
    I: Intercept<T, U>,
{
    Arc::new(move |token, item| Box::pin(interceptor.intercept(token, item)))
}
