//! Thread-local engine state.
//!
//! Each host event-loop thread owns one engine: the current-zone frame
//! stack (bottom frame always the root zone), the current task, and the
//! nested task-frame counter that detects outermost task boundaries for
//! microtask draining. The engine is constructed on first touch and lives
//! for the thread; a second construction on the same thread is
//! unrepresentable.
//!
//! State changes go through RAII guards so the stack discipline survives
//! every exit path, panics included.

use crate::task::Task;
use crate::zone::Zone;
use std::cell::{Cell, RefCell};

struct EngineState {
    root: Zone,
    frames: RefCell<Vec<Zone>>,
    current_task: RefCell<Option<Task>>,
    nested_task_frames: Cell<usize>,
}

impl EngineState {
    fn new() -> Self {
        let root = Zone::new_root();
        Self {
            frames: RefCell::new(vec![root.clone()]),
            root,
            current_task: RefCell::new(None),
            nested_task_frames: Cell::new(0),
        }
    }
}

thread_local! {
    static ENGINE: EngineState = EngineState::new();
}

/// The root zone of this thread's tree.
#[must_use]
pub fn root_zone() -> Zone {
    ENGINE.with(|engine| engine.root.clone())
}

/// The zone of the innermost active frame.
#[must_use]
pub fn current_zone() -> Zone {
    ENGINE.with(|engine| {
        engine
            .frames
            .borrow()
            .last()
            .expect("zone frame stack must never be empty")
            .clone()
    })
}

/// The task currently being executed, if any.
#[must_use]
pub fn current_task() -> Option<Task> {
    ENGINE.with(|engine| engine.current_task.borrow().clone())
}

/// Depth of the current-zone frame stack (the root frame counts).
#[must_use]
pub fn frame_depth() -> usize {
    ENGINE.with(|engine| engine.frames.borrow().len())
}

/// Depth of nested host task invocations.
#[must_use]
pub fn nested_task_frames() -> usize {
    ENGINE.with(|engine| engine.nested_task_frames.get())
}

/// Pushes a zone frame for the guard's lifetime.
pub(crate) struct ZoneFrameGuard {
    zone: Zone,
}

impl ZoneFrameGuard {
    pub(crate) fn push(zone: Zone) -> Self {
        ENGINE.with(|engine| engine.frames.borrow_mut().push(zone.clone()));
        Self { zone }
    }
}

impl Drop for ZoneFrameGuard {
    fn drop(&mut self) {
        ENGINE.with(|engine| {
            let popped = engine.frames.borrow_mut().pop();
            debug_assert!(
                popped.as_ref() == Some(&self.zone),
                "zone frame stack corrupted: popped {popped:?}"
            );
        });
    }
}

/// Swaps the current task for the guard's lifetime.
pub(crate) struct CurrentTaskGuard {
    previous: Option<Task>,
}

impl CurrentTaskGuard {
    pub(crate) fn swap(task: Option<Task>) -> Self {
        let previous = ENGINE.with(|engine| engine.current_task.replace(task));
        Self { previous }
    }
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ENGINE.with(|engine| {
            *engine.current_task.borrow_mut() = previous;
        });
    }
}

/// Brackets one host task invocation.
///
/// On the unwind of the outermost frame the microtask queue is drained
/// *before* the counter returns to zero, so nothing scheduled during the
/// drain can re-arm a second drain.
pub(crate) struct TaskFrameGuard;

impl TaskFrameGuard {
    pub(crate) fn enter() -> Self {
        ENGINE.with(|engine| {
            engine
                .nested_task_frames
                .set(engine.nested_task_frames.get() + 1);
        });
        Self
    }
}

impl Drop for TaskFrameGuard {
    fn drop(&mut self) {
        if ENGINE.with(|engine| engine.nested_task_frames.get()) == 1 {
            crate::microtask::drain_micro_task_queue();
        }
        ENGINE.with(|engine| {
            engine
                .nested_task_frames
                .set(engine.nested_task_frames.get() - 1);
        });
    }
}
