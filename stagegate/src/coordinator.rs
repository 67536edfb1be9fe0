//! One task manager and one stage manager working as a unit.

use crate::errors::ConfigError;
use crate::lifecycle::LifecycleIntent;
use crate::stages::{JobOutcome, StageHandlers, StageManager, StageManagerConfig};
use crate::tasks::{TaskFuture, TaskManager};
use std::fmt;
use std::hash::Hash;

/// Bundles a [`TaskManager`] with a [`StageManager`].
///
/// The task manager keeps operations on one instance apart; the stage
/// manager keeps the stage jobs of all instances in lockstep. Cloning is
/// cheap; clones share both.
pub struct Coordinator<K, I = LifecycleIntent> {
    tasks: TaskManager<K, I>,
    stages: StageManager,
}

impl<K, I> Coordinator<K, I>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    I: Eq + Clone + fmt::Display + Send + Sync + 'static,
{
    /// Creates a coordinator with a stage manager built from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(config: StageManagerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            tasks: TaskManager::new(),
            stages: StageManager::new(config)?,
        })
    }

    /// Creates a coordinator for the plugin and runner lifecycle.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in preset; the result mirrors [`Coordinator::new`].
    pub fn lifecycle() -> Result<Self, ConfigError> {
        Self::new(StageManagerConfig::lifecycle())
    }

    /// Returns the task manager.
    #[must_use]
    pub fn tasks(&self) -> &TaskManager<K, I> {
        &self.tasks
    }

    /// Returns the stage manager.
    #[must_use]
    pub fn stages(&self) -> &StageManager {
        &self.stages
    }

    /// Runs a stage job for `id` as a task, so it is serialized with every
    /// other operation on the same identifier.
    ///
    /// Stage failures surface as [`TaskError::Failed`](crate::errors::TaskError::Failed)
    /// wrapping the [`JobError`](crate::errors::JobError).
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn run_job<T: Send + 'static>(
        &self,
        id: K,
        handlers: StageHandlers<T>,
        input: T,
        intent: Option<I>,
    ) -> TaskFuture<JobOutcome<T>> {
        let stages = self.stages.clone();
        self.tasks.add_task(
            id,
            move || async move { Ok(stages.run(&handlers, input).await?) },
            intent,
        )
    }
}

impl<K, I> Clone for Coordinator<K, I> {
    fn clone(&self) -> Self {
        Self {
            tasks: self.tasks.clone(),
            stages: self.stages.clone(),
        }
    }
}

impl<K, I> fmt::Debug for Coordinator<K, I>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("tasks", &self.tasks)
            .field("stages", &self.stages)
            .finish()
    }
}
