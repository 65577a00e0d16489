use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Forwards every value from `source` into `destination` until `source` is
/// closed or `token` is cancelled.
///
/// Each worker's private output is relayed into the run's shared output with
/// this function. `pipe` never closes the destination: it only drops its own
/// sender handle, so the channel stays open for as long as any other sender
/// (ultimately the dispatcher's) is alive.
///
/// Both the receive and the forward are raced against cancellation, so a
/// relay blocked on a slow consumer still exits promptly. The value in hand at
/// that point is dropped. If the destination's receiver goes away, the relay
/// stops as well.
pub async fn pipe<U>(
    token: CancellationToken,
    mut source: mpsc::Receiver<U>,
    destination: mpsc::Sender<U>,
) {
    loop {
        let value = tokio::select! {
            biased;
            () = token.cancelled() => return,
            value = source.recv() => match value {
                Some(value) => value,
                None => return,
            },
        };

        tokio::select! {
            biased;
            () = token.cancelled() => return,
            sent = destination.send(value) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}
