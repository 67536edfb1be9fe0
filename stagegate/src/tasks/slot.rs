//! Per-identifier task slots and the type-erased tasks they hold.

use crate::cancellation::CancellationToken;
use crate::errors::{panic_message, TaskConflict, TaskError};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Hands a settled result to the caller that submitted the task.
pub(crate) type Deliver = Box<dyn FnOnce() + Send>;

/// The body of a task, created lazily when the task starts.
pub(crate) type TaskBody<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// A submitted task with its result type erased.
pub(crate) trait PendingTask: Send {
    /// The token handed to the task body, if the task is cancellable.
    fn cancel_token(&self) -> Option<Arc<CancellationToken>>;

    /// Runs the body to completion and returns the thunk that delivers its
    /// result. Panics in the body are caught.
    fn start(self: Box<Self>) -> BoxFuture<'static, Deliver>;

    /// Settles the caller's future with a conflict; the body never runs.
    fn reject(self: Box<Self>, conflict: TaskConflict);
}

pub(crate) struct Pending<T> {
    body: TaskBody<T>,
    token: Option<Arc<CancellationToken>>,
    reply: oneshot::Sender<Result<T, TaskError>>,
}

impl<T: Send + 'static> Pending<T> {
    pub(crate) fn new(body: TaskBody<T>, token: Option<Arc<CancellationToken>>) -> (Self, TaskFuture<T>) {
        let (reply, rx) = oneshot::channel();
        (Self { body, token, reply }, TaskFuture { rx })
    }
}

impl<T: Send + 'static> PendingTask for Pending<T> {
    fn cancel_token(&self) -> Option<Arc<CancellationToken>> {
        self.token.clone()
    }

    fn start(self: Box<Self>) -> BoxFuture<'static, Deliver> {
        let Self { body, reply, .. } = *self;

        async move {
            let outcome = match AssertUnwindSafe(async move { body().await }).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(TaskError::Failed(error)),
                Err(panic) => Err(TaskError::Panicked(panic_message(panic.as_ref()))),
            };

            let deliver: Deliver = Box::new(move || {
                let _ = reply.send(outcome);
            });
            deliver
        }
        .boxed()
    }

    fn reject(self: Box<Self>, conflict: TaskConflict) {
        let _ = self.reply.send(Err(conflict.into()));
    }
}

/// The operation running for an identifier.
pub(crate) struct Running<I> {
    pub(crate) intent: Option<I>,
    pub(crate) cancel: Option<Arc<CancellationToken>>,
}

/// The single follow-up operation queued behind the running one.
pub(crate) struct Queued<I> {
    pub(crate) intent: Option<I>,
    // Only touched under the slot's entry lock; the mutex makes the slot `Sync`.
    task: Mutex<Box<dyn PendingTask>>,
}

impl<I> Queued<I> {
    pub(crate) fn new(intent: Option<I>, task: Box<dyn PendingTask>) -> Self {
        Self {
            intent,
            task: Mutex::new(task),
        }
    }

    pub(crate) fn into_task(self) -> Box<dyn PendingTask> {
        self.task.into_inner()
    }
}

/// Current and next operation for one identifier.
pub(crate) struct TaskSlot<I> {
    pub(crate) current: Option<Running<I>>,
    pub(crate) next: Option<Queued<I>>,
}

impl<I> TaskSlot<I> {
    pub(crate) fn new() -> Self {
        Self {
            current: None,
            next: None,
        }
    }
}

/// Resolves with the result of a task submitted to a
/// [`TaskManager`](super::TaskManager).
///
/// The task runs whether or not this future is polled; dropping it only
/// discards the result.
#[must_use = "the task runs regardless, but its result is lost if this future is dropped"]
pub struct TaskFuture<T> {
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> Future for TaskFuture<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(TaskError::Abandoned)))
    }
}

impl<T> std::fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(value: anyhow::Result<u32>) -> (Box<dyn PendingTask>, TaskFuture<u32>) {
        let (task, future) = Pending::new(Box::new(move || async move { value }.boxed()), None);
        (Box::new(task), future)
    }

    #[tokio::test]
    async fn test_start_delivers_result() {
        let (task, future) = pending(Ok(5));
        let deliver = task.start().await;
        deliver();
        assert_eq!(future.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_failed_body() {
        let (task, future) = pending(Err(anyhow::anyhow!("nope")));
        (task.start().await)();

        let err = future.await.unwrap_err();
        assert!(matches!(err, TaskError::Failed(_)));
        assert_eq!(err.to_string(), "nope");
    }

    #[tokio::test]
    async fn test_panicking_body() {
        let body: TaskBody<u32> = Box::new(|| -> BoxFuture<'static, anyhow::Result<u32>> { panic!("boom") });
        let (task, future) = Pending::new(body, None);
        (Box::new(task).start().await)();

        assert_eq!(future.await.unwrap_err().to_string(), "task panicked: boom");
    }

    #[tokio::test]
    async fn test_reject_skips_body() {
        let body: TaskBody<u32> =
            Box::new(|| -> BoxFuture<'static, anyhow::Result<u32>> { panic!("must not run") });
        let (task, future) = Pending::new(body, None);
        Box::new(task).reject(TaskConflict::Replaced);

        let err = future.await.unwrap_err();
        assert_eq!(err.as_conflict(), Some(&TaskConflict::Replaced));
    }

    #[tokio::test]
    async fn test_dropped_task_is_abandoned() {
        let (task, future) = pending(Ok(1));
        drop(task);
        assert!(matches!(future.await, Err(TaskError::Abandoned)));
    }

    #[test]
    fn test_queued_hands_back_task() {
        let token = Arc::new(CancellationToken::new());
        let (task, _future) = Pending::<u32>::new(Box::new(|| async { Ok::<_, anyhow::Error>(1) }.boxed()), Some(token.clone()));
        let queued = Queued::new(Some("install"), Box::new(task) as Box<dyn PendingTask>);

        assert_eq!(queued.intent, Some("install"));
        let handed_back = queued.into_task().cancel_token().unwrap();
        assert!(Arc::ptr_eq(&handed_back, &token));
    }
}
