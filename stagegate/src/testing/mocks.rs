//! Recording stage handlers for testing.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::stages::{StageFlow, StageHandlers};

/// Whether a recorded event marks the start or the end of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    /// The handler was entered.
    Start,
    /// The handler finished.
    End,
}

/// One handler start or end observed by a [`StageRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageEvent {
    /// Position of the stage in the stage list.
    pub stage_index: usize,
    /// Caller-chosen job number.
    pub job: usize,
    /// Start or end.
    pub mark: Mark,
}

/// Builds stage handlers that record when they run.
///
/// Clones share the same event log, so one recorder can hand out handlers
/// for many concurrent jobs.
#[derive(Debug, Clone, Default)]
pub struct StageRecorder {
    events: Arc<Mutex<Vec<StageEvent>>>,
}

impl StageRecorder {
    /// Creates a recorder with an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns handlers for `stages` that record start and end, sleep for
    /// `delay` in between and add one to their input.
    #[must_use]
    pub fn counting_handlers(&self, job: usize, stages: &[&str], delay: Duration) -> StageHandlers<u32> {
        stages
            .iter()
            .enumerate()
            .fold(StageHandlers::new(), |handlers, (stage_index, stage)| {
                let recorder = self.clone();
                handlers.on(*stage, move |value: u32| {
                    let recorder = recorder.clone();
                    async move {
                        recorder.record(stage_index, job, Mark::Start);
                        tokio::time::sleep(delay).await;
                        recorder.record(stage_index, job, Mark::End);
                        Ok(StageFlow::Next(value + 1))
                    }
                })
            })
    }

    /// Appends an event to the log.
    pub fn record(&self, stage_index: usize, job: usize, mark: Mark) {
        self.events.lock().push(StageEvent {
            stage_index,
            job,
            mark,
        });
    }

    /// Returns the events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<StageEvent> {
        self.events.lock().clone()
    }

    /// Returns how many handlers were entered.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.mark == Mark::Start)
            .count()
    }

    /// Clears the log.
    pub fn reset(&self) {
        self.events.lock().clear();
    }
}
