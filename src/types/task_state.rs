//! Task kinds, lifecycle states, and the `has_task` counter snapshot.
//!
//! The lifecycle is a strict state machine:
//!
//! ```text
//! notScheduled → scheduling → scheduled → running → scheduled     (periodic macro / event)
//!                                               ↘ notScheduled    (one-shot)
//! scheduled|running → canceling → notScheduled
//! any scheduling-or-canceling error → unknown
//! ```
//!
//! `Display` renders the wire-level names (`microTask`, `notScheduled`, …)
//! that appear in fatal transition messages and log events.

use core::fmt;
use serde::Serialize;

/// The kind of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskKind {
    /// Non-cancellable work run at the trailing edge of the current task,
    /// before the host regains control.
    MicroTask,
    /// Cancellable work run after a host-governed delay; may be periodic.
    MacroTask,
    /// A listener whose callback may fire zero or more times at
    /// unpredictable intervals.
    EventTask,
}

impl TaskKind {
    /// All kinds, in counter-index order.
    pub const ALL: [Self; 3] = [Self::MicroTask, Self::MacroTask, Self::EventTask];

    /// Stable index used by per-delegate counters.
    #[must_use]
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::MicroTask => 0,
            Self::MacroTask => 1,
            Self::EventTask => 2,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MicroTask => "microTask",
            Self::MacroTask => "macroTask",
            Self::EventTask => "eventTask",
        };
        f.write_str(name)
    }
}

/// The lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskStatus {
    /// Not owned by any zone; the resting state.
    NotScheduled,
    /// A `schedule_task` call is in flight.
    Scheduling,
    /// Scheduled with the host; waiting to fire.
    Scheduled,
    /// Currently executing.
    Running,
    /// A `cancel_task` call is in flight.
    Canceling,
    /// A scheduling or canceling hook failed; terminal for this attempt.
    Unknown,
}

impl TaskStatus {
    /// Returns true if the task currently contributes to zone task counts.
    #[must_use]
    pub const fn is_counted(self) -> bool {
        matches!(self, Self::Scheduled | Self::Running | Self::Canceling)
    }

    /// Returns true if this state admits no further transitions for the
    /// current scheduling attempt.
    #[must_use]
    pub const fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotScheduled => "notScheduled",
            Self::Scheduling => "scheduling",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Canceling => "canceling",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Snapshot of a zone's task counts at a 0↔1 crossing.
///
/// Delivered to `on_has_task` observers whenever a kind's count becomes
/// empty or non-empty. `change` names the kind whose counter crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HasTaskState {
    /// True if at least one micro task is outstanding.
    pub micro_task: bool,
    /// True if at least one macro task is outstanding.
    pub macro_task: bool,
    /// True if at least one event task is outstanding.
    pub event_task: bool,
    /// The kind whose counter crossed the empty/non-empty boundary.
    pub change: TaskKind,
}
