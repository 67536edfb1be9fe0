//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is the cancel capability handed to cancellable
//! tasks: the task manager cancels it when a follow-up task is queued for the
//! same identifier, and the task decides whether to stop early.

mod token;

pub use token::CancellationToken;
