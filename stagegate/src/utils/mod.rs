//! Small building blocks shared by the stage and task managers.

mod pending_set;

pub use pending_set::{OnEmpty, PendingSet};

/// Generates the id attached to a job run for tracing.
#[must_use]
pub fn generate_job_id() -> uuid::Uuid {
    uuid::Uuid::new_v4()
}
