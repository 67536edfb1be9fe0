//! # Stagegate
//!
//! Coordination primitives for loading and mutating a fleet of plugin-like
//! instances concurrently.
//!
//! Stagegate provides:
//!
//! - **Lockstep stages**: a [`StageManager`](stages::StageManager) drives any
//!   number of concurrent jobs through one ordered stage list, so no job
//!   enters stage *i + 1* before every job has finished stage *i*
//! - **Failure propagation**: a failing critical stage fails every job waiting
//!   behind it and resets the barrier; non-critical stages only fail their own job
//! - **Per-identifier tasks**: a [`TaskManager`](tasks::TaskManager) runs one
//!   operation at a time per identifier, with one queued follow-up and
//!   intent-based deduplication
//! - **Cooperative cancellation**: running tasks are asked to stop through a
//!   [`CancellationToken`](cancellation::CancellationToken) when they are superseded
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stagegate::prelude::*;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let stages = StageManager::new(StageManagerConfig::new(["fetch", "index"]))?;
//! let handlers = StageHandlers::new()
//!     .on("fetch", |n: u32| async move { Ok(StageFlow::Next(n + 1)) })
//!     .on_sync("index", |n: u32| Ok(StageFlow::Next(n * 2)));
//!
//! let (a, b) = tokio::join!(stages.run(&handlers, 1), stages.run(&handlers, 2));
//! assert_eq!(a?, JobOutcome::Completed(4));
//! assert_eq!(b?, JobOutcome::Completed(6));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod coordinator;
pub mod errors;
pub mod lifecycle;
pub mod stages;
pub mod tasks;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::coordinator::Coordinator;
    pub use crate::errors::{
        ConfigError, JobError, SharedError, StageError, TaskConflict, TaskError,
    };
    pub use crate::lifecycle::{LifecycleIntent, LifecycleStage};
    pub use crate::stages::{
        JobOutcome, StageFlow, StageHandlers, StageManager, StageManagerConfig,
    };
    pub use crate::tasks::{TaskFuture, TaskManager};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[tokio::test]
    async fn test_prelude_covers_both_managers() {
        let coordinator: Coordinator<u32> = Coordinator::lifecycle().unwrap();
        let handlers = StageHandlers::<u32>::new();

        let outcome = coordinator
            .run_job(1, handlers, 5, Some(LifecycleIntent::Start))
            .await
            .unwrap();

        assert_eq!(outcome, JobOutcome::Completed(5));
    }
}
