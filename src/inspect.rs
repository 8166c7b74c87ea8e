//! Serializable diagnostic snapshots.
//!
//! Snapshots freeze the observable state of a task or a zone chain into
//! plain serializable records, for structured logging and for test
//! assertions that want a stable shape rather than live handles.

use crate::task::Task;
use crate::types::{TaskKind, TaskStatus};
use crate::zone::Zone;
use serde::Serialize;

/// The observable state of a task at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSnapshot {
    /// Diagnostic identifier (`T{n}`).
    pub id: String,
    /// Task kind.
    pub kind: TaskKind,
    /// Lifecycle state.
    pub state: TaskStatus,
    /// Debug source string.
    pub source: String,
    /// Entries since the task was last scheduled.
    pub run_count: u64,
    /// Owning zone name, when scheduled.
    pub zone: Option<String>,
}

impl TaskSnapshot {
    /// Captures the task's current state.
    #[must_use]
    pub fn capture(task: &Task) -> Self {
        Self {
            id: task.id().to_string(),
            kind: task.kind(),
            state: task.state(),
            source: task.source().to_string(),
            run_count: task.run_count(),
            zone: task.zone().map(|zone| zone.name().to_string()),
        }
    }
}

/// A zone's chain of ancestors, self first, root last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZonePathSnapshot {
    /// Diagnostic identifiers, one per zone.
    pub ids: Vec<String>,
    /// Zone names, one per zone.
    pub names: Vec<String>,
}

impl ZonePathSnapshot {
    /// Captures the ancestry of `zone`.
    #[must_use]
    pub fn capture(zone: &Zone) -> Self {
        let mut ids = Vec::new();
        let mut names = Vec::new();
        for ancestor in zone.ancestry() {
            ids.push(ancestor.id().to_string());
            names.push(ancestor.name().to_string());
        }
        Self { ids, names }
    }
}
