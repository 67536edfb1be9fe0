//! Shared progress state of a stage manager.
//!
//! Every job run of one stage manager goes through the same [`Barrier`]. Jobs
//! at or below the frontier are admitted into the current wave; jobs beyond
//! it wait on the wave's transition, which settles when the last member of
//! the wave leaves. On a clean drain every waiting job is seated in the next
//! wave before anyone is woken, so the next wave cannot drain until all of
//! them have run their handler.

use crate::errors::{SharedError, StageError};
use crate::utils::{OnEmpty, PendingSet};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Settles once the current wave has drained.
pub(crate) type Transition = Shared<BoxFuture<'static, Result<(), StageError>>>;

/// Result of asking the barrier to let a job run a stage.
pub(crate) enum Admission<'a> {
    /// The job is a member of the current wave and may run its handler.
    Admitted(WaveTicket<'a>),
    /// The job waits for the current wave to drain.
    Wait(Reservation<'a>),
    /// The wave this job just left failed and nothing is left to wait for.
    Rejected(StageError),
}

enum Gate {
    Open,
    Wait { epoch: u64, transition: Transition },
    Rejected(StageError),
}

struct BarrierState {
    frontier: usize,
    wave: PendingSet,
    /// Highest stage index admitted into the current wave.
    wave_stage: usize,
    failure: Option<SharedError>,
    transition: Transition,
    settle: Option<oneshot::Sender<Result<(), StageError>>>,
    /// Number of settled transitions.
    epoch: u64,
    /// Jobs waiting on the current transition.
    waiting: usize,
    /// Epoch whose waiters were seated in the current wave.
    seated_epoch: Option<u64>,
    last_poisoned: Option<StageError>,
}

impl BarrierState {
    fn admit(&mut self, index: usize) -> Gate {
        if index > self.frontier {
            if self.wave.is_empty() {
                if let Some(err) = &self.last_poisoned {
                    return Gate::Rejected(err.clone());
                }
            } else {
                self.waiting += 1;
                return Gate::Wait {
                    epoch: self.epoch,
                    transition: self.transition.clone(),
                };
            }
        }

        if self.wave.add() {
            self.open_wave(index);
        } else {
            self.wave_stage = self.wave_stage.max(index);
        }
        Gate::Open
    }

    fn open_wave(&mut self, stage_index: usize) {
        let (tx, rx) = oneshot::channel();
        self.settle = Some(tx);
        // The sender lives as long as the barrier, which outlives every waiter.
        self.transition = rx.map(|settled| settled.unwrap_or(Ok(()))).boxed().shared();
        self.wave_stage = stage_index;
        debug!(stage_index, frontier = self.frontier, "stage wave opened");
    }

    fn leave(&mut self, failure: Option<SharedError>) {
        if failure.is_some() {
            self.failure = failure;
        }

        if !self.wave.remove() {
            return;
        }

        let settle = self.settle.take();
        let waiting = std::mem::take(&mut self.waiting);
        let drained_epoch = self.epoch;
        self.epoch += 1;

        let outcome = match self.failure.take() {
            None => {
                self.frontier = self.frontier.max(self.wave_stage + 1);
                self.seated_epoch = Some(drained_epoch);
                debug!(frontier = self.frontier, waiting, "stage wave drained");

                if waiting > 0 {
                    for _ in 0..waiting {
                        self.wave.add();
                    }
                    self.open_wave(self.frontier);
                }
                Ok(())
            }
            Some(cause) => {
                self.frontier = 0;
                self.seated_epoch = None;
                let err = StageError::collateral(cause);
                warn!(error = %err.cause, waiting, "stage wave failed, frontier reset");
                self.last_poisoned = Some(err.clone());
                Err(err)
            }
        };

        if let Some(settle) = settle {
            let _ = settle.send(outcome);
        }
    }

    fn abandon(&mut self, epoch: u64) {
        if self.epoch == epoch {
            self.waiting = self.waiting.saturating_sub(1);
        } else if self.seated_epoch == Some(epoch) {
            // Seated in the wave that followed; give the seat back.
            self.leave(None);
        }
    }
}

/// Barrier shared by all job runs of one stage manager.
pub(crate) struct Barrier {
    state: Mutex<BarrierState>,
}

impl Barrier {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState {
                frontier: 0,
                wave: PendingSet::new(),
                wave_stage: 0,
                failure: None,
                transition: futures::future::ready(Ok(())).boxed().shared(),
                settle: None,
                epoch: 0,
                waiting: 0,
                seated_epoch: None,
                last_poisoned: None,
            }),
        }
    }

    pub(crate) fn frontier(&self) -> usize {
        self.state.lock().frontier
    }

    pub(crate) fn wave_len(&self) -> usize {
        self.state.lock().wave.len()
    }

    pub(crate) fn on_idle(&self) -> OnEmpty {
        self.state.lock().wave.on_empty()
    }

    /// Asks to run the stage at `index`.
    pub(crate) fn admit(&self, index: usize) -> Admission<'_> {
        let gate = self.state.lock().admit(index);
        self.admission(gate)
    }

    fn admission(&self, gate: Gate) -> Admission<'_> {
        match gate {
            Gate::Open => Admission::Admitted(WaveTicket {
                barrier: self,
                active: true,
            }),
            Gate::Wait { epoch, transition } => Admission::Wait(Reservation {
                barrier: self,
                epoch,
                transition,
                armed: true,
            }),
            Gate::Rejected(err) => Admission::Rejected(err),
        }
    }
}

/// Membership of one job in the current wave.
///
/// Dropping an active ticket leaves the wave without recording a failure, so
/// an abandoned job run never blocks the wave from draining.
pub(crate) struct WaveTicket<'a> {
    barrier: &'a Barrier,
    active: bool,
}

impl<'a> WaveTicket<'a> {
    /// Leaves the wave, poisoning its transition if `failure` is set.
    pub(crate) fn leave(mut self, failure: Option<SharedError>) {
        self.active = false;
        self.barrier.state.lock().leave(failure);
    }

    /// Leaves the wave and asks for the next stage in one critical section, so
    /// the job waits on the transition of the wave it just left.
    pub(crate) fn advance(mut self, next_index: usize) -> Admission<'a> {
        self.active = false;
        let gate = {
            let mut state = self.barrier.state.lock();
            state.leave(None);
            state.admit(next_index)
        };
        self.barrier.admission(gate)
    }
}

impl std::fmt::Debug for WaveTicket<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveTicket")
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Drop for WaveTicket<'_> {
    fn drop(&mut self) {
        if self.active {
            self.barrier.state.lock().leave(None);
        }
    }
}

/// A job waiting for the current wave to drain.
///
/// Dropping an unresolved reservation withdraws the job, or gives back the
/// seat it was already given in the next wave.
pub(crate) struct Reservation<'a> {
    barrier: &'a Barrier,
    epoch: u64,
    transition: Transition,
    armed: bool,
}

impl<'a> Reservation<'a> {
    /// Waits for the transition; on success the job is already a member of
    /// the next wave.
    pub(crate) async fn seat(mut self) -> Result<WaveTicket<'a>, StageError> {
        let outcome = self.transition.clone().await;
        self.armed = false;
        outcome.map(|()| WaveTicket {
            barrier: self.barrier,
            active: true,
        })
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.barrier.state.lock().abandon(self.epoch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    fn admitted(barrier: &Barrier, index: usize) -> WaveTicket<'_> {
        match barrier.admit(index) {
            Admission::Admitted(ticket) => ticket,
            _ => panic!("expected admission at {index}"),
        }
    }

    fn reserved(admission: Admission<'_>) -> Reservation<'_> {
        match admission {
            Admission::Wait(reservation) => reservation,
            _ => panic!("expected to wait"),
        }
    }

    #[test]
    fn test_frontier_advances_after_wave_drains() {
        let barrier = Barrier::new();
        let a = admitted(&barrier, 0);
        let b = admitted(&barrier, 0);
        assert_eq!(barrier.wave_len(), 2);

        let mut seat = task::spawn(reserved(a.advance(1)).seat());
        assert_pending!(seat.poll());
        assert_eq!(barrier.frontier(), 0);

        b.leave(None);
        assert!(seat.is_woken());
        let ticket = assert_ready!(seat.poll()).unwrap();
        assert_eq!(barrier.frontier(), 1);
        assert_eq!(barrier.wave_len(), 1);

        ticket.leave(None);
        assert_eq!(barrier.frontier(), 2);
    }

    #[test]
    fn test_waiters_are_seated_before_waking() {
        let barrier = Barrier::new();
        let a = admitted(&barrier, 0);
        let b = admitted(&barrier, 0);
        let c = admitted(&barrier, 0);

        let wait_a = reserved(a.advance(1));
        let wait_b = reserved(b.advance(1));

        // The last member moves on at once, but the next wave already holds
        // the two waiters, so it cannot drain without them.
        let Admission::Admitted(fast) = c.advance(1) else {
            panic!("last member should be admitted");
        };
        assert_eq!(barrier.wave_len(), 3);
        let Admission::Wait(_) = fast.advance(2) else {
            panic!("fast job must wait for the seated jobs");
        };
        assert_eq!(barrier.frontier(), 1);

        drop(wait_a);
        drop(wait_b);
        assert_eq!(barrier.wave_len(), 0);
        assert_eq!(barrier.frontier(), 2);
    }

    #[test]
    fn test_failure_rejects_waiters_and_resets() {
        let barrier = Barrier::new();
        let a = admitted(&barrier, 0);
        let b = admitted(&barrier, 0);

        let mut seat = task::spawn(reserved(a.advance(1)).seat());
        b.leave(Some(SharedError::new(anyhow::anyhow!("bad"))));

        let err = assert_ready!(seat.poll()).err().unwrap();
        assert_eq!(err.cause.to_string(), "bad");
        assert_eq!(barrier.frontier(), 0);
        assert_eq!(barrier.wave_len(), 0);
    }

    #[test]
    fn test_last_member_of_failed_wave_is_rejected() {
        let barrier = Barrier::new();
        let a = admitted(&barrier, 0);
        let b = admitted(&barrier, 0);

        a.leave(Some(SharedError::new(anyhow::anyhow!("bad"))));
        match b.advance(1) {
            Admission::Rejected(err) => assert_eq!(err.cause.to_string(), "bad"),
            _ => panic!("expected rejection"),
        };
    }

    #[test]
    fn test_dropped_ticket_leaves_wave() {
        let barrier = Barrier::new();
        drop(admitted(&barrier, 0));

        assert_eq!(barrier.wave_len(), 0);
        assert_eq!(barrier.frontier(), 1);
    }

    #[test]
    fn test_withdrawn_waiter_is_not_seated() {
        let barrier = Barrier::new();
        let a = admitted(&barrier, 0);
        let b = admitted(&barrier, 0);

        drop(reserved(a.advance(1)));
        b.leave(None);

        assert_eq!(barrier.wave_len(), 0);
        assert_eq!(barrier.frontier(), 1);
    }

    #[test]
    fn test_late_joiner_does_not_regress_frontier() {
        let barrier = Barrier::new();
        admitted(&barrier, 0).leave(None);
        admitted(&barrier, 1).leave(None);
        assert_eq!(barrier.frontier(), 2);

        // A new job at stage 0 opens a wave that a job at stage 2 then joins.
        let late = admitted(&barrier, 0);
        let front = admitted(&barrier, 2);
        let waiting = reserved(front.advance(3));

        late.leave(None);
        assert_eq!(barrier.frontier(), 3);
        drop(waiting);
        assert_eq!(barrier.wave_len(), 0);
    }

    #[test]
    fn test_on_idle() {
        let barrier = Barrier::new();
        let a = admitted(&barrier, 0);
        let mut idle = task::spawn(barrier.on_idle());
        assert_pending!(idle.poll());

        a.leave(None);
        assert_ready!(idle.poll());
    }
}
