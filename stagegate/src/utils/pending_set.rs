//! A counted set of in-flight computations.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Counts in-flight computations and lets callers wait until none are left.
///
/// The set does no locking of its own; the owner keeps it behind whatever
/// lock guards the rest of its state, so that "became empty" is observed in
/// the same critical section as the removal that caused it.
#[derive(Debug, Default)]
pub struct PendingSet {
    count: usize,
    waiters: Vec<oneshot::Sender<()>>,
}

impl PendingSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the number of computations in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Adds a computation. Returns true if the set was empty before.
    pub fn add(&mut self) -> bool {
        self.count += 1;
        self.count == 1
    }

    /// Removes a computation. Returns true if this emptied the set.
    ///
    /// Everything waiting in [`PendingSet::on_empty`] is woken when the set
    /// drains. Removing from an empty set is a no-op.
    pub fn remove(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }

        self.count -= 1;
        if self.count > 0 {
            return false;
        }

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(());
        }
        true
    }

    /// Returns a future that completes the next time the set is empty.
    ///
    /// Completes immediately if the set is already empty.
    pub fn on_empty(&mut self) -> OnEmpty {
        if self.is_empty() {
            return OnEmpty { rx: None };
        }

        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        OnEmpty { rx: Some(rx) }
    }
}

/// Future returned by [`PendingSet::on_empty`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct OnEmpty {
    rx: Option<oneshot::Receiver<()>>,
}

impl Future for OnEmpty {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.rx.as_mut() {
            // A dropped set can never drain again; treat it as drained.
            Some(rx) => Pin::new(rx).poll(cx).map(|_| ()),
            None => Poll::Ready(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_add_reports_first_entry() {
        let mut set = PendingSet::new();
        assert!(set.is_empty());
        assert!(set.add());
        assert!(!set.add());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_remove_reports_drain() {
        let mut set = PendingSet::new();
        set.add();
        set.add();

        assert!(!set.remove());
        assert!(set.remove());
        assert!(set.is_empty());
        assert!(!set.remove());
    }

    #[test]
    fn test_on_empty_ready_when_empty() {
        let mut set = PendingSet::new();
        let mut fut = task::spawn(set.on_empty());
        assert_ready!(fut.poll());
    }

    #[test]
    fn test_on_empty_waits_for_drain() {
        let mut set = PendingSet::new();
        set.add();
        set.add();

        let mut fut = task::spawn(set.on_empty());
        assert_pending!(fut.poll());

        set.remove();
        assert_pending!(fut.poll());

        set.remove();
        assert!(fut.is_woken());
        assert_ready!(fut.poll());
    }

    #[test]
    fn test_on_empty_is_per_drain() {
        let mut set = PendingSet::new();
        set.add();
        set.remove();

        set.add();
        let mut fut = task::spawn(set.on_empty());
        assert_pending!(fut.poll());
        set.remove();
        assert_ready!(fut.poll());
    }
}
