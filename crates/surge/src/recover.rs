use core::{future::Future, panic::AssertUnwindSafe};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

/// Drives `fut` to completion and discards any panic raised while polling it.
///
/// Every concurrent unit of a run (the dispatcher, each worker and each relay)
/// executes inside this guard. A fault in one task ends that task quietly; it
/// is never propagated to the coordinator or to the caller's runtime.
#[allow(clippy::used_underscore_binding)]
pub(crate) async fn recovered<F>(_task: &'static str, fut: F)
where
    F: Future<Output = ()>,
{
    if let Err(_panic) = AssertUnwindSafe(fut).catch_unwind().await {
        #[cfg(feature = "tracing")]
        tracing::warn!("{_task} task panicked: {}", panic_message(&*_panic));
    }
}

/// Spawns `fut` as a recovered task tracked by `tracker`.
pub(crate) fn spawn_recovered<F>(tracker: &TaskTracker, task: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracker.spawn(recovered(task, fut))
}

#[cfg(feature = "tracing")]
fn panic_message(panic: &(dyn core::any::Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };
    use tokio::time::timeout;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_is_contained_in_the_task() {
        let tracker = TaskTracker::new();
        let handle = spawn_recovered(&tracker, "test", async {
            panic!("boom");
        });

        // The join handle resolves normally because the panic never left the
        // task body.
        assert!(handle.await.is_ok());

        tracker.close();
        timeout(Duration::from_secs(1), tracker.wait())
            .await
            .expect("tracker should drain after a panicking task");
    }

    #[tokio::test]
    async fn normal_completion_runs_body() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        recovered("test", async move {
            flag.store(true, Ordering::SeqCst);
        })
        .await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panic_after_await_is_contained() {
        recovered("test", async {
            tokio::task::yield_now().await;
            let items: Vec<u8> = Vec::new();
            core::hint::black_box(items[3]);
        })
        .await;
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn core::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn core::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn core::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&*payload), "<non-string panic payload>");
    }
}
