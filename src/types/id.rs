//! Identifier types for cooperative tasks.
//!
//! A [`TaskId`] identifies the cooperative task on whose behalf a lock
//! operation runs. It is opaque and compared by identity, never by value:
//! the lock uses it only to recognize "the same task again" (writer
//! self-upgrade, release validation).

use crate::util::ArenaIndex;
use core::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

static EPHEMERAL_TASK_COUNTER: AtomicU32 = AtomicU32::new(1);

/// A unique identifier for a cooperative task.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) ArenaIndex);

impl TaskId {
    /// Creates a new ephemeral task ID.
    ///
    /// Intended for contexts created outside a scheduler that still need
    /// a unique identity. Each call returns a distinct ID.
    #[must_use]
    pub fn new_ephemeral() -> Self {
        let index = EPHEMERAL_TASK_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(ArenaIndex::new(index, 1))
    }

    /// Creates a task ID for testing/benchmarking purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(index: u32, generation: u32) -> Self {
        Self(ArenaIndex::new(index, generation))
    }

    /// Creates a default task ID for testing purposes.
    ///
    /// Index 0, generation 0; suitable for unit tests that don't care
    /// about specific ID values.
    #[doc(hidden)]
    #[must_use]
    pub const fn testing_default() -> Self {
        Self(ArenaIndex::new(0, 0))
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}:{})", self.0.index(), self.0.generation())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0.index())
    }
}
