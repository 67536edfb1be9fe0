//! Per-identifier task serialization.
//!
//! A [`TaskManager`] keeps at most one running task and one queued follow-up
//! per identifier. Requests carry an optional intent; a request whose intent
//! is already queued or running for the same identifier is rejected with a
//! [`TaskConflict`](crate::errors::TaskConflict), and a newer request replaces
//! an older queued one.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use stagegate::tasks::TaskManager;
//!
//! let tasks: TaskManager<String, &str> = TaskManager::new();
//! let installed = tasks.add_task("plugin-a".to_string(), || async { Ok(42) }, Some("install"));
//! assert_eq!(installed.await?, 42);
//! # Ok(())
//! # }
//! ```

mod manager;
mod slot;

pub use manager::TaskManager;
pub use slot::TaskFuture;
