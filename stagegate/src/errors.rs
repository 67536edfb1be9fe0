//! Error types for stagegate.
//!
//! Stage handlers and task bodies report failures as [`anyhow::Error`]; the
//! coordination primitives wrap them in the typed errors below so callers can
//! tell a job's own failure apart from collateral damage or task contention.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A cloneable handle to a handler failure.
///
/// A single critical failure has to reach the job that raised it as well as
/// every job waiting on the poisoned barrier transition, so the original
/// error is shared behind an `Arc`. It stays inspectable through
/// [`SharedError::downcast_ref`] and [`std::error::Error::source`].
#[derive(Clone)]
pub struct SharedError(Arc<anyhow::Error>);

impl SharedError {
    /// Wraps an error.
    #[must_use]
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    /// Attempts to downcast the wrapped error to a concrete type.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Returns true if both handles point at the same original error.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<anyhow::Error> for SharedError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Raised for jobs that were waiting on a barrier transition poisoned by a
/// different job's critical-stage failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StageError {
    /// The error message.
    pub message: String,
    /// The failure that poisoned the transition.
    #[source]
    pub cause: SharedError,
    /// The last stage the job had reached before it started waiting.
    pub stage_reached: Option<String>,
}

impl StageError {
    /// Creates the error handed to jobs caught behind a failed wave.
    #[must_use]
    pub fn collateral(cause: SharedError) -> Self {
        Self {
            message: "A different job failed to arrive at its current stage.".to_string(),
            cause,
            stage_reached: None,
        }
    }

    /// Sets the stage the job had reached.
    #[must_use]
    pub fn with_stage_reached(mut self, stage: impl Into<String>) -> Self {
        self.stage_reached = Some(stage.into());
        self
    }
}

/// The ways a job run through a stage manager can fail.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The job's own handler failed; the original error is passed through.
    #[error(transparent)]
    Handler(SharedError),

    /// Another job's critical failure poisoned the transition this job was waiting on.
    #[error(transparent)]
    Stage(#[from] StageError),
}

impl JobError {
    /// Returns the stage error if this failure was collateral.
    #[must_use]
    pub fn as_stage_error(&self) -> Option<&StageError> {
        match self {
            Self::Stage(err) => Some(err),
            Self::Handler(_) => None,
        }
    }

    /// Returns the original handler failure, whether direct or collateral.
    #[must_use]
    pub fn root_cause(&self) -> &SharedError {
        match self {
            Self::Handler(err) => err,
            Self::Stage(err) => &err.cause,
        }
    }
}

/// Contention on a task slot. These are expected outcomes, not defects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskConflict {
    /// A task with the same intent is already running.
    #[error("There already is a running {intent} task for this item.")]
    AlreadyRunning {
        /// The conflicting intent.
        intent: String,
    },

    /// A task with the same intent is already queued.
    #[error("There already is a scheduled {intent} task for this item.")]
    AlreadyScheduled {
        /// The conflicting intent.
        intent: String,
    },

    /// The queued task was preempted by a newer request.
    #[error("This task was replaced by another one.")]
    Replaced,
}

/// The ways a task submitted to a task manager can fail.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The request was rejected or preempted because of slot contention.
    #[error(transparent)]
    Conflict(#[from] TaskConflict),

    /// The task body failed.
    #[error(transparent)]
    Failed(anyhow::Error),

    /// The task body panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was dropped before it settled, e.g. because the runtime shut down.
    #[error("task was abandoned before it settled")]
    Abandoned,
}

impl TaskError {
    /// Returns the slot conflict, if that is why the task failed.
    #[must_use]
    pub fn as_conflict(&self) -> Option<&TaskConflict> {
        match self {
            Self::Conflict(conflict) => Some(conflict),
            _ => None,
        }
    }
}

/// Raised when a stage manager configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No stages were configured.
    #[error("stage list is empty")]
    NoStages,

    /// A stage name is empty or whitespace-only.
    #[error("stage names cannot be empty or whitespace-only")]
    EmptyStageName,

    /// A stage name appears more than once.
    #[error("duplicate stage '{0}'")]
    DuplicateStage(String),

    /// A non-critical stage is not part of the stage list.
    #[error("non-critical stage '{0}' is not a configured stage")]
    UnknownNonCriticalStage(String),

    /// The configuration could not be deserialized.
    #[error("malformed stage configuration: {0}")]
    Malformed(String),
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
