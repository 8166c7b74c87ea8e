//! Identifier types for zones and tasks.
//!
//! These identifiers exist for diagnostics only: they appear in `Debug`
//! output, log events and fatal messages, and they never participate in
//! semantics. Zone and task identity is handle identity.

use core::fmt;
use std::cell::Cell;

thread_local! {
    static NEXT_ZONE_ID: Cell<u64> = const { Cell::new(0) };
    static NEXT_TASK_ID: Cell<u64> = const { Cell::new(0) };
}

/// A per-thread unique identifier for a zone.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId(u64);

impl ZoneId {
    /// Mints the next zone identifier on this thread.
    #[must_use]
    pub(crate) fn next() -> Self {
        NEXT_ZONE_ID.with(|c| {
            let id = c.get();
            c.set(id + 1);
            Self(id)
        })
    }

    /// Creates a zone ID with a fixed value for tests.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Debug for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZoneId({})", self.0)
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Z{}", self.0)
    }
}

/// A per-thread unique identifier for a task.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Mints the next task identifier on this thread.
    #[must_use]
    pub(crate) fn next() -> Self {
        NEXT_TASK_ID.with(|c| {
            let id = c.get();
            c.set(id + 1);
            Self(id)
        })
    }

    /// Creates a task ID with a fixed value for tests.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}
