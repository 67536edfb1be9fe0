//! The stage manager: drives jobs through an ordered stage list in lockstep.

use super::barrier::{Admission, Barrier};
use super::{JobOutcome, StageFlow, StageHandlers, StageManagerConfig};
use crate::errors::{panic_message, ConfigError, JobError, SharedError, StageError};
use crate::utils::generate_job_id;
use futures::FutureExt;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, debug_span, Instrument};

struct StageManagerInner {
    stages: Vec<String>,
    non_critical: HashSet<String>,
    barrier: Barrier,
}

/// Drives any number of concurrent jobs through a fixed, ordered list of
/// stages. While the shared frontier is at stage *i*, no job starts stage
/// *i + 1* before every job admitted at stage *i* has finished it.
///
/// The frontier only moves back on a critical failure. Stages at or behind it
/// are open, so once a batch has crossed the whole list, later jobs pass
/// through without waiting on each other until a failure resets it.
///
/// A failure in a critical stage fails the job that raised it and every job
/// waiting behind the same barrier transition, then resets the frontier to
/// the first stage. A failure in a non-critical stage only fails its own job.
///
/// Cloning is cheap; clones share the same barrier.
#[derive(Clone)]
pub struct StageManager {
    inner: Arc<StageManagerInner>,
}

impl StageManager {
    /// Creates a stage manager with a fresh barrier.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: StageManagerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let StageManagerConfig {
            stages,
            non_critical_stages,
        } = config;

        Ok(Self {
            inner: Arc::new(StageManagerInner {
                stages,
                non_critical: non_critical_stages.into_iter().collect(),
                barrier: Barrier::new(),
            }),
        })
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stages(&self) -> &[String] {
        &self.inner.stages
    }

    /// Returns true if failures in this stage only fail their own job.
    #[must_use]
    pub fn is_non_critical(&self, stage: &str) -> bool {
        self.inner.non_critical.contains(stage)
    }

    /// Returns the index of the furthest stage all jobs may currently enter.
    #[must_use]
    pub fn frontier(&self) -> usize {
        self.inner.barrier.frontier()
    }

    /// Returns true if no stage handler is currently running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.barrier.wave_len() == 0
    }

    /// Waits until no stage handler is running.
    pub async fn wait_idle(&self) {
        self.inner.barrier.on_idle().await;
    }

    /// Runs one job through every stage, starting from the first.
    ///
    /// Each handler receives the output of the previous stage; stages without
    /// a handler pass their input through.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Handler`] with the original error if one of this
    /// job's handlers fails or panics, and [`JobError::Stage`] if a different
    /// job's critical failure poisoned the transition this job was waiting on.
    pub async fn run<T: Send + 'static>(
        &self,
        handlers: &StageHandlers<T>,
        input: T,
    ) -> Result<JobOutcome<T>, JobError> {
        let job_id = generate_job_id();
        self.drive(handlers, input)
            .instrument(debug_span!("stage_job", job_id = %job_id))
            .await
    }

    async fn drive<T: Send + 'static>(
        &self,
        handlers: &StageHandlers<T>,
        mut input: T,
    ) -> Result<JobOutcome<T>, JobError> {
        let stages = &self.inner.stages;
        let barrier = &self.inner.barrier;

        let mut index = 0;
        let mut admission = barrier.admit(index);

        loop {
            let member = match admission {
                Admission::Admitted(member) => member,
                Admission::Wait(reservation) => match reservation.seat().await {
                    Ok(member) => member,
                    Err(err) => return Err(self.stranded(err, index).into()),
                },
                Admission::Rejected(err) => return Err(self.stranded(err, index).into()),
            };

            let stage = &stages[index];
            debug!(stage = %stage, stage_index = index, "running stage handler");

            match self.invoke(handlers, stage, input).await {
                Ok(StageFlow::Next(output)) => {
                    input = output;
                    index += 1;

                    if index == stages.len() {
                        member.leave(None);
                        debug!("job completed all stages");
                        return Ok(JobOutcome::Completed(input));
                    }

                    admission = member.advance(index);
                }
                Ok(StageFlow::Cancel) => {
                    member.leave(None);
                    debug!(stage = %stage, "job cancelled by stage handler");
                    return Ok(JobOutcome::Cancelled);
                }
                Err(error) => {
                    let critical = !self.is_non_critical(stage);
                    debug!(stage = %stage, critical, error = %error, "stage handler failed");
                    member.leave(critical.then(|| error.clone()));
                    return Err(JobError::Handler(error));
                }
            }
        }
    }

    /// Runs one handler, turning a panic into a handler failure.
    async fn invoke<T: Send + 'static>(
        &self,
        handlers: &StageHandlers<T>,
        stage: &str,
        input: T,
    ) -> Result<StageFlow<T>, SharedError> {
        let outcome = AssertUnwindSafe(async { handlers.invoke(stage, input).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(flow)) => Ok(flow),
            Ok(Err(error)) => Err(SharedError::new(error)),
            Err(panic) => Err(SharedError::new(anyhow::anyhow!(
                "stage handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    fn stranded(&self, err: StageError, index: usize) -> StageError {
        match index.checked_sub(1).and_then(|i| self.inner.stages.get(i)) {
            Some(reached) => err.with_stage_reached(reached.clone()),
            None => err,
        }
    }
}

impl fmt::Debug for StageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageManager")
            .field("stages", &self.inner.stages)
            .field("frontier", &self.frontier())
            .finish()
    }
}
