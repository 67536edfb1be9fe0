//! Per-job stage handler maps.

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a stage handler hands back to the stage manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageFlow<T> {
    /// Continue with this value as the input of the next stage.
    Next(T),
    /// Stop this job without failing it. No later stage runs for it.
    Cancel,
}

impl<T> StageFlow<T> {
    /// Returns true for [`StageFlow::Cancel`].
    #[must_use]
    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel)
    }
}

/// How a job run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome<T> {
    /// The job passed every stage; holds the output of the last one.
    Completed(T),
    /// A handler returned [`StageFlow::Cancel`].
    Cancelled,
}

impl<T> JobOutcome<T> {
    /// Returns the final value of a completed job.
    #[must_use]
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Cancelled => None,
        }
    }

    /// Returns true if the job was cancelled by one of its handlers.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A type-erased stage handler.
pub(crate) type StageHandler<T> =
    Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<StageFlow<T>>> + Send + Sync>;

/// Maps stage names to the handlers one job runs at each stage.
///
/// Stages without a handler pass their input through unchanged.
pub struct StageHandlers<T> {
    handlers: HashMap<String, StageHandler<T>>,
}

impl<T: Send + 'static> StageHandlers<T> {
    /// Creates an empty handler map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers an async handler for a stage, replacing any previous one.
    #[must_use]
    pub fn on<F, Fut>(mut self, stage: impl Into<String>, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<StageFlow<T>>> + Send + 'static,
    {
        let handler: StageHandler<T> = Arc::new(move |input| handler(input).boxed());
        self.handlers.insert(stage.into(), handler);
        self
    }

    /// Registers a synchronous handler for a stage.
    #[must_use]
    pub fn on_sync<F>(self, stage: impl Into<String>, handler: F) -> Self
    where
        F: Fn(T) -> anyhow::Result<StageFlow<T>> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.on(stage, move |input| {
            let handler = Arc::clone(&handler);
            async move { (*handler)(input) }
        })
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invokes the handler for a stage, or passes the input through.
    pub(crate) fn invoke(&self, stage: &str, input: T) -> BoxFuture<'static, anyhow::Result<StageFlow<T>>> {
        match self.handlers.get(stage) {
            Some(handler) => (**handler)(input),
            None => futures::future::ready(Ok(StageFlow::Next(input))).boxed(),
        }
    }
}

impl<T: Send + 'static> Default for StageHandlers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for StageHandlers<T> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<T> fmt::Debug for StageHandlers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stages: Vec<_> = self.handlers.keys().collect();
        stages.sort();
        f.debug_struct("StageHandlers")
            .field("stages", &stages)
            .finish()
    }
}
