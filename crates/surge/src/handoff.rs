//! Unbuffered hand-off channel between the dispatcher and its workers.
//!
//! Tokio has no zero-capacity `mpsc`, so the rendezvous is built from
//! readiness tickets: every worker that is waiting for an item posts a
//! [`oneshot::Sender`] into a shared queue, and the dispatcher completes one of
//! them. A hand-off therefore only succeeds while a worker is actually waiting,
//! which is exactly the signal the dispatcher needs to detect backpressure.
//!
//! A worker that stops waiting [`Slot::retract`]s its ticket. Retraction is
//! atomic with respect to delivery: either the dispatcher's
//! [`Ticket::deliver`] fails and the item comes back to the dispatcher, or the
//! worker receives the item from `retract`. An item is never lost in between.

use tokio::sync::{mpsc, oneshot};

/// Creates a connected hand-off pair.
///
/// The [`Handoff`] end belongs to the dispatcher. The [`Intake`] end is cloned
/// into every worker. Dropping the `Handoff` closes the channel for all
/// workers.
pub(crate) fn channel<T>() -> (Handoff<T>, Intake<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Handoff { tickets: rx }, Intake { tickets: tx })
}

/// Dispatcher end of the intake queue.
pub(crate) struct Handoff<T> {
    tickets: mpsc::UnboundedReceiver<oneshot::Sender<T>>,
}

impl<T> Handoff<T> {
    /// Waits until some worker is ready to take an item.
    ///
    /// Tickets whose worker already went away are skipped. Returns `None` only
    /// once every [`Intake`] handle has been dropped.
    ///
    /// Cancel safe: no ticket is consumed unless it is returned.
    pub(crate) async fn ready(&mut self) -> Option<Ticket<T>> {
        while let Some(slot) = self.tickets.recv().await {
            if !slot.is_closed() {
                return Some(Ticket { slot });
            }
        }
        None
    }
}

/// A waiting worker, as seen from the dispatcher.
pub(crate) struct Ticket<T> {
    slot: oneshot::Sender<T>,
}

impl<T> Ticket<T> {
    /// Hands `item` to the worker that issued this ticket.
    ///
    /// # Errors
    ///
    /// Gives the item back if the worker retracted its slot first.
    pub(crate) fn deliver(self, item: T) -> Result<(), T> {
        self.slot.send(item)
    }
}

/// Worker end of the intake queue.
pub(crate) struct Intake<T> {
    tickets: mpsc::UnboundedSender<oneshot::Sender<T>>,
}

// Derive would require `T: Clone`.
impl<T> Clone for Intake<T> {
    fn clone(&self) -> Self {
        Self {
            tickets: self.tickets.clone(),
        }
    }
}

impl<T> Intake<T> {
    /// Announces that the caller is ready for one item.
    ///
    /// Returns `None` if the dispatcher end has been dropped.
    pub(crate) fn offer(&self) -> Option<Slot<T>> {
        let (tx, rx) = oneshot::channel();
        self.tickets.send(tx).ok()?;
        Some(Slot { item: rx })
    }
}

/// A posted readiness ticket, as seen from the worker.
pub(crate) struct Slot<T> {
    item: oneshot::Receiver<T>,
}

impl<T> Slot<T> {
    /// Waits for the dispatcher to fill this slot.
    ///
    /// Returns `None` if the dispatcher end was dropped with the ticket still
    /// queued. Cancel safe. Must not be awaited again after it resolved.
    pub(crate) async fn recv(&mut self) -> Option<T> {
        (&mut self.item).await.ok()
    }

    /// Withdraws the ticket, returning an item that was delivered before the
    /// withdrawal took effect.
    pub(crate) fn retract(mut self) -> Option<T> {
        self.item.close();
        self.item.try_recv().ok()
    }
}
