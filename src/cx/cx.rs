//! Task context with cancellation.
//!
//! A [`Cx`] identifies the cooperative task performing a lock operation
//! and carries its cancellation flag. It is threaded explicitly through
//! every acquire; there is no ambient "current task" state, so the lock
//! works under any scheduler that hands each task its own context.
//!
//! # Cloning
//!
//! `Cx` is cheaply clonable (it wraps an `Arc`). Clones share the same
//! underlying state, so a cancellation request is visible to all clones.

use crate::types::TaskId;
use core::fmt;
use std::sync::Arc;

/// Error returned by [`Cx::checkpoint`] when cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled {
    task: TaskId,
}

impl Cancelled {
    /// The task whose cancellation was observed.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task
    }
}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} cancelled", self.task)
    }
}

impl std::error::Error for Cancelled {}

#[derive(Debug)]
struct CxInner {
    task: TaskId,
    cancel_requested: bool,
}

/// The context of a cooperative task: identity plus cancellation state.
#[derive(Debug, Clone)]
pub struct Cx {
    inner: Arc<std::sync::RwLock<CxInner>>,
}

impl Cx {
    /// Creates a context for the given task.
    #[must_use]
    pub fn new(task: TaskId) -> Self {
        Self {
            inner: Arc::new(std::sync::RwLock::new(CxInner {
                task,
                cancel_requested: false,
            })),
        }
    }

    /// Creates a context for testing purposes.
    ///
    /// Uses a default task ID; tests that exercise multi-task behavior
    /// should construct contexts with distinct [`TaskId`]s instead.
    #[must_use]
    pub fn for_testing() -> Self {
        Self::new(TaskId::testing_default())
    }

    /// Returns the identity of the task this context belongs to.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.inner.read().expect("cx state poisoned").task
    }

    /// Returns true if cancellation has been requested for this task.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner
            .read()
            .expect("cx state poisoned")
            .cancel_requested
    }

    /// Requests (or withdraws) cancellation for this task.
    pub fn set_cancel_requested(&self, value: bool) {
        self.inner
            .write()
            .expect("cx state poisoned")
            .cancel_requested = value;
    }

    /// Checks for cancellation, returning an error if it was requested.
    ///
    /// This is a checkpoint where cancellation can be observed; the lock
    /// calls it at every suspension point so a parked acquire resolves
    /// promptly once its task is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if cancellation is pending.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        let (task, cancel_requested) = {
            let inner = self.inner.read().expect("cx state poisoned");
            (inner.task, inner.cancel_requested)
        };
        if cancel_requested {
            tracing::trace!(task = %task, "cancellation observed at checkpoint");
            Err(Cancelled { task })
        } else {
            Ok(())
        }
    }
}
