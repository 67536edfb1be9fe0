//! Stage barrier: lockstep execution of concurrent jobs through named stages.
//!
//! A [`StageManager`] is built from a [`StageManagerConfig`]. Each call to
//! [`StageManager::run`] is one job, carrying its own [`StageHandlers`] and
//! input value through every stage. All jobs of one manager share a barrier,
//! so no job enters stage *i + 1* while another is still running stage *i*.
//!
//! A handler may return [`StageFlow::Cancel`] to drop its job out of the
//! remaining stages without failing it.

mod barrier;
mod config;
mod handlers;
mod manager;

pub use config::StageManagerConfig;
pub use handlers::{JobOutcome, StageFlow, StageHandlers};
pub use manager::StageManager;
