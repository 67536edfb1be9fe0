//! Per-identifier task serialization with one queued follow-up.

use super::slot::{Pending, PendingTask, Queued, Running, TaskBody, TaskFuture, TaskSlot};
use crate::cancellation::CancellationToken;
use crate::errors::{TaskConflict, TaskError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Outcome of submitting a task to a slot, applied after the slot lock is released.
enum Submission {
    Start(Box<dyn PendingTask>),
    Queued {
        preempted: Option<Box<dyn PendingTask>>,
        cancel: Option<Arc<CancellationToken>>,
    },
    Rejected {
        task: Box<dyn PendingTask>,
        conflict: TaskConflict,
        preempted: Option<Box<dyn PendingTask>>,
    },
}

struct TaskManagerInner<K, I> {
    slots: DashMap<K, TaskSlot<I>>,
}

/// Serializes operations per identifier.
///
/// Each identifier has at most one running task and one queued follow-up.
/// Intents deduplicate requests: a request is rejected if a task with the
/// same intent is already queued or running for that identifier. A newer
/// request preempts an older queued one, and queueing a follow-up asks the
/// running task to stop through its [`CancellationToken`] when it has one.
///
/// Tasks run eagerly on the tokio runtime, so every submitting method must be
/// called from within one. Cloning is cheap; clones share the same slots.
pub struct TaskManager<K, I> {
    inner: Arc<TaskManagerInner<K, I>>,
}

impl<K, I> Clone for TaskManager<K, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, I> Default for TaskManager<K, I>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inner: Arc::new(TaskManagerInner {
                slots: DashMap::new(),
            }),
        }
    }
}

impl<K, I> TaskManager<K, I>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    I: Eq + Clone + fmt::Display + Send + Sync + 'static,
{
    /// Creates a task manager with no slots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Submits a task for `id`.
    ///
    /// The task starts at once if nothing runs for `id`; otherwise it becomes
    /// the queued follow-up and starts when the running task settles. The
    /// returned future resolves with the task's result, or with a
    /// [`TaskConflict`] if the request is rejected or later preempted.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn add_task<T, F, Fut>(&self, id: K, task: F, intent: Option<I>) -> TaskFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.submit(id, intent, None, Box::new(move || task().boxed()))
    }

    /// Submits a task that receives a [`CancellationToken`].
    ///
    /// The token is cancelled when a follow-up gets queued behind the task.
    /// Honouring it is up to the task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn add_cancellable_task<T, F, Fut>(&self, id: K, task: F, intent: Option<I>) -> TaskFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<CancellationToken>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let token = Arc::new(CancellationToken::new());
        let handle = Arc::clone(&token);
        self.submit(id, intent, Some(token), Box::new(move || task(handle).boxed()))
    }

    /// Wraps `task` so that every call is submitted under its argument as
    /// the identifier.
    pub fn taskify<T, F, Fut>(&self, task: F, intent: Option<I>) -> impl Fn(K) -> TaskFuture<T> + Clone + Send + Sync
    where
        T: Send + 'static,
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.taskify_with(task, K::clone, intent)
    }

    /// Wraps `task` so that every call is submitted under the identifier
    /// `id_of` computes from the argument.
    pub fn taskify_with<A, T, F, S, Fut>(
        &self,
        task: F,
        id_of: S,
        intent: Option<I>,
    ) -> impl Fn(A) -> TaskFuture<T> + Clone + Send + Sync
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        S: Fn(&A) -> K + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let manager = self.clone();
        let task = Arc::new(task);
        let id_of = Arc::new(id_of);

        move |arg: A| {
            let id = (*id_of)(&arg);
            let task = Arc::clone(&task);
            manager.add_task(id, move || (*task)(arg), intent.clone())
        }
    }

    /// Submits an already running operation for `id`.
    ///
    /// `existing` is spawned at once and keeps running whatever happens to the
    /// entry; the entry only tracks it. The returned future resolves as soon
    /// as the entry becomes the running task for `id`, not when `existing`
    /// settles, and fails if the entry is rejected or preempted first. Once it
    /// has resolved, `existing` only decides when the slot moves on.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn delay<T, Fut>(&self, id: K, existing: Fut, intent: Option<I>) -> impl Future<Output = Result<(), TaskError>>
    where
        T: Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let operation = tokio::spawn(existing);
        let (ready, promoted) = oneshot::channel();
        let settled = self.add_task(
            id,
            move || {
                let _ = ready.send(());
                async move {
                    match operation.await {
                        Ok(outcome) => outcome,
                        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                        Err(err) => Err(anyhow::anyhow!("delayed operation was aborted: {err}")),
                    }
                }
            },
            intent,
        );

        async move {
            tokio::select! {
                biased;
                Ok(()) = promoted => Ok(()),
                outcome = settled => outcome.map(|_| ()),
            }
        }
    }

    /// Returns true if a task is running or queued for `id`.
    #[must_use]
    pub fn is_busy(&self, id: &K) -> bool {
        self.inner.slots.contains_key(id)
    }

    /// Returns the intent of the task running for `id`.
    #[must_use]
    pub fn running_intent(&self, id: &K) -> Option<I> {
        self.inner
            .slots
            .get(id)
            .and_then(|slot| slot.current.as_ref().and_then(|running| running.intent.clone()))
    }

    /// Returns the intent of the follow-up queued for `id`.
    #[must_use]
    pub fn queued_intent(&self, id: &K) -> Option<I> {
        self.inner
            .slots
            .get(id)
            .and_then(|slot| slot.next.as_ref().and_then(|queued| queued.intent.clone()))
    }

    /// Returns the number of identifiers with a running task.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    /// Returns true if no task is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    fn submit<T: Send + 'static>(
        &self,
        id: K,
        intent: Option<I>,
        token: Option<Arc<CancellationToken>>,
        body: TaskBody<T>,
    ) -> TaskFuture<T> {
        let (pending, future) = Pending::new(body, token);
        let task: Box<dyn PendingTask> = Box::new(pending);
        let label = intent_label(intent.as_ref());

        match self.place(&id, intent, task) {
            Submission::Start(task) => {
                debug!(task_id = ?id, intent = %label, "starting task");
                self.launch(id, task);
            }
            Submission::Queued { preempted, cancel } => {
                if let Some(preempted) = preempted {
                    debug!(task_id = ?id, "queued task replaced");
                    preempted.reject(TaskConflict::Replaced);
                }
                debug!(task_id = ?id, intent = %label, cancel = cancel.is_some(), "task queued");
                if let Some(token) = cancel {
                    token.cancel("a follow-up task was queued");
                }
            }
            Submission::Rejected {
                task,
                conflict,
                preempted,
            } => {
                if let Some(preempted) = preempted {
                    debug!(task_id = ?id, "queued task replaced");
                    preempted.reject(TaskConflict::Replaced);
                }
                debug!(task_id = ?id, %conflict, "task rejected");
                task.reject(conflict);
            }
        }

        future
    }

    /// Decides what happens to a new task while holding the slot lock.
    fn place(&self, id: &K, intent: Option<I>, task: Box<dyn PendingTask>) -> Submission {
        let mut slot = self.inner.slots.entry(id.clone()).or_insert_with(TaskSlot::new);

        let Some(running_intent) = slot.current.as_ref().map(|running| running.intent.clone()) else {
            slot.current = Some(Running {
                intent,
                cancel: task.cancel_token(),
            });
            return Submission::Start(task);
        };

        let mut preempted = None;
        if let Some(queued) = slot.next.take() {
            if intent.is_some() && queued.intent == intent {
                slot.next = Some(queued);
                return Submission::Rejected {
                    task,
                    conflict: TaskConflict::AlreadyScheduled {
                        intent: intent_label(intent.as_ref()),
                    },
                    preempted: None,
                };
            }
            preempted = Some(queued.into_task());
        }

        // A follow-up preempted above stays lost when the new request is rejected here.
        if intent.is_some() && running_intent == intent {
            return Submission::Rejected {
                task,
                conflict: TaskConflict::AlreadyRunning {
                    intent: intent_label(intent.as_ref()),
                },
                preempted,
            };
        }

        let cancel = slot.current.as_ref().and_then(|running| running.cancel.clone());
        slot.next = Some(Queued::new(intent, task));
        Submission::Queued { preempted, cancel }
    }

    fn launch(&self, id: K, task: Box<dyn PendingTask>) {
        let mut guard = SlotGuard {
            manager: self.clone(),
            id: Some(id),
        };
        tokio::spawn(async move {
            let deliver = task.start().await;
            if let Some(id) = guard.id.take() {
                guard.manager.finish(id);
            }
            deliver();
        });
    }

    /// Clears the running task of `id` and starts the queued follow-up, if any.
    fn finish(&self, id: K) {
        if let Some(task) = self.promote(&id) {
            self.launch(id, task);
        }
    }

    /// Clears the running task of `id` and makes the queued follow-up, if
    /// any, the running one. Removes the slot when nothing is queued.
    fn promote(&self, id: &K) -> Option<Box<dyn PendingTask>> {
        let Entry::Occupied(mut entry) = self.inner.slots.entry(id.clone()) else {
            return None;
        };

        let slot = entry.get_mut();
        slot.current = None;
        let Some(queued) = slot.next.take() else {
            entry.remove();
            debug!(task_id = ?id, "task slot released");
            return None;
        };

        debug!(task_id = ?id, intent = %intent_label(queued.intent.as_ref()), "promoting queued task");
        let intent = queued.intent.clone();
        let task = queued.into_task();
        slot.current = Some(Running {
            intent,
            cancel: task.cancel_token(),
        });
        Some(task)
    }
}

/// Releases the slot of a running task whose future was dropped before it
/// settled, as happens when the runtime shuts down.
struct SlotGuard<K, I>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    I: Eq + Clone + fmt::Display + Send + Sync + 'static,
{
    manager: TaskManager<K, I>,
    id: Option<K>,
}

impl<K, I> Drop for SlotGuard<K, I>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    I: Eq + Clone + fmt::Display + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };

        debug!(task_id = ?id, "running task dropped before it settled");
        // Without a runtime the promoted follow-up cannot start; dropping it
        // settles its caller with `TaskError::Abandoned`.
        while let Some(task) = self.manager.promote(&id) {
            if tokio::runtime::Handle::try_current().is_ok() {
                self.manager.launch(id, task);
                return;
            }
            drop(task);
        }
    }
}

impl<K, I> fmt::Debug for TaskManager<K, I>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("active", &self.inner.slots.len())
            .finish()
    }
}

fn intent_label<I: fmt::Display>(intent: Option<&I>) -> String {
    intent.map_or_else(|| "untagged".to_string(), ToString::to_string)
}
