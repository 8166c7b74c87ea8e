//! Task records and the task state machine.
//!
//! A [`Task`] is a first-class handle for a deferred unit of work. Tasks
//! are created by the `schedule_*_task` methods on [`Zone`] and move
//! through a strict lifecycle; any transition that does not match the
//! expected source state is a fatal invariant violation.
//!
//! The host enters a task through the static entry point
//! [`Task::invoke_task`], which brackets execution with the nested
//! task-frame counter and drains the microtask queue on the outermost
//! unwind — after the task's own microtasks were enqueued, before the
//! host regains control.

use crate::delegate::ZoneDelegate;
use crate::engine;
use crate::tracing_compat::trace;
use crate::types::{TaskId, TaskKind, TaskStatus};
use crate::zone::Zone;
use core::fmt;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

/// The stored task callback.
///
/// `Fn` rather than `FnMut`: event tasks may legally re-enter their own
/// callback (a listener dispatching its own event synchronously), which
/// rules out exclusive borrows. Mutable callback state lives in `Cell` or
/// `RefCell` captures.
pub type TaskCallback = Rc<dyn Fn()>;

/// Host scheduling function attached to macro and event tasks.
pub type ScheduleFn = Box<dyn Fn(&Task)>;

/// Host cancellation function attached to macro and event tasks.
pub type CancelFn = Box<dyn Fn(&Task)>;

pub(crate) type DelegateList = Rc<RefCell<Vec<Rc<ZoneDelegate>>>>;

/// Optional data bag describing a task to the host.
#[derive(Debug, Clone, Default)]
pub struct TaskData {
    /// True for macro tasks that re-arm after each run (intervals).
    pub is_periodic: bool,
    /// Host delay before the task fires, when applicable.
    pub delay: Option<Duration>,
    /// Host handle for the scheduled work (timer id and the like).
    pub handle_id: Option<u64>,
    /// For event tasks: the host promises to enter the task through the
    /// static [`Task::invoke_task`] entry point, so no per-task invoke
    /// closure needs to be allocated. A host that sets this and then
    /// calls a closure obtained elsewhere mis-dispatches; keep the
    /// default unless the call site is audited.
    pub use_static_invoke: bool,
}

struct TaskInner {
    id: TaskId,
    kind: TaskKind,
    source: String,
    callback: TaskCallback,
    data: Option<TaskData>,
    schedule_fn: Option<ScheduleFn>,
    cancel_fn: RefCell<Option<CancelFn>>,
    state: Cell<TaskStatus>,
    run_count: Cell<u64>,
    zone: RefCell<Option<Zone>>,
    zone_delegates: RefCell<Option<DelegateList>>,
}

/// A first-class handle for a deferred unit of work.
///
/// Cheap to clone; all clones observe the same record.
#[derive(Clone)]
pub struct Task {
    inner: Rc<TaskInner>,
}

impl Task {
    pub(crate) fn new(
        kind: TaskKind,
        source: &str,
        callback: TaskCallback,
        data: Option<TaskData>,
        schedule_fn: Option<ScheduleFn>,
        cancel_fn: Option<CancelFn>,
    ) -> Self {
        Self {
            inner: Rc::new(TaskInner {
                id: TaskId::next(),
                kind,
                source: source.to_string(),
                callback,
                data,
                schedule_fn,
                cancel_fn: RefCell::new(cancel_fn),
                state: Cell::new(TaskStatus::NotScheduled),
                run_count: Cell::new(0),
                zone: RefCell::new(None),
                zone_delegates: RefCell::new(None),
            }),
        }
    }

    /// The diagnostic identifier of this task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// The task kind.
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.inner.kind
    }

    /// The debug source string given at scheduling.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskStatus {
        self.inner.state.get()
    }

    /// How many times this task has been entered since it was last
    /// scheduled.
    #[must_use]
    pub fn run_count(&self) -> u64 {
        self.inner.run_count.get()
    }

    /// The zone this task was scheduled in, if any.
    #[must_use]
    pub fn zone(&self) -> Option<Zone> {
        self.inner.zone.borrow().clone()
    }

    /// The host data bag, if any.
    #[must_use]
    pub fn data(&self) -> Option<&TaskData> {
        self.inner.data.as_ref()
    }

    /// True for event tasks and periodic macro tasks.
    #[must_use]
    pub fn is_periodic(&self) -> bool {
        self.inner.data.as_ref().is_some_and(|d| d.is_periodic)
    }

    /// Two handles to the same task record compare equal.
    #[must_use]
    pub fn same_task(&self, other: &Task) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Host-facing static entry point.
    ///
    /// Brackets execution with the nested task-frame counter; when the
    /// outermost frame unwinds, the microtask queue is drained before the
    /// counter drops to zero, so every microtask enqueued during the task
    /// runs before the host regains control.
    pub fn invoke_task(task: &Task) {
        let _frame = engine::TaskFrameGuard::enter();
        task.inner.run_count.set(task.inner.run_count.get() + 1);
        let zone = task
            .zone()
            .unwrap_or_else(|| panic!("task '{}' has no owning zone; was it scheduled?", task.source()));
        zone.run_task(task);
    }

    /// The per-task closure shape of the entry point.
    ///
    /// Allocates a thunk that forwards into [`Task::invoke_task`]. Event
    /// tasks with [`TaskData::use_static_invoke`] set skip this allocation
    /// and are entered through the static shape directly.
    #[must_use]
    pub fn invoke_fn(&self) -> Box<dyn Fn()> {
        let task = self.clone();
        Box::new(move || Task::invoke_task(&task))
    }

    /// Rejects an in-flight scheduling attempt.
    ///
    /// Legal only while an `on_schedule_task` hook is running (state
    /// `Scheduling`); returns the task to `NotScheduled` without passing
    /// through `Unknown`, so it can be scheduled again later.
    pub fn cancel_schedule_request(&self) {
        self.transition_to(TaskStatus::NotScheduled, TaskStatus::Scheduling, None);
    }

    /// Moves the task to `to`, requiring the current state to be `from1`
    /// (or `from2` when given). A mismatch is fatal.
    pub(crate) fn transition_to(
        &self,
        to: TaskStatus,
        from1: TaskStatus,
        from2: Option<TaskStatus>,
    ) {
        let current = self.inner.state.get();
        if current == from1 || from2 == Some(current) {
            self.inner.state.set(to);
            trace!(task = %self.inner.id, from = %current, to = %to, "task transition");
            if to == TaskStatus::NotScheduled {
                *self.inner.zone_delegates.borrow_mut() = None;
            }
        } else {
            let expected = match from2 {
                Some(second) => format!("'{from1}' or '{second}'"),
                None => format!("'{from1}'"),
            };
            panic!(
                "{} '{}': can not transition to '{to}', expecting state {expected}, was '{current}'",
                self.inner.kind, self.inner.source
            );
        }
    }

    /// Forces a transition, for external test harnesses.
    #[cfg(feature = "test-internals")]
    #[doc(hidden)]
    pub fn force_transition(&self, to: TaskStatus, from1: TaskStatus, from2: Option<TaskStatus>) {
        self.transition_to(to, from1, from2);
    }

    pub(crate) fn set_zone(&self, zone: Option<Zone>) {
        *self.inner.zone.borrow_mut() = zone;
    }

    /// Installs a fresh delegate list and returns a second handle to it
    /// for the caller's identity check.
    pub(crate) fn install_zone_delegates(&self) -> DelegateList {
        let list: DelegateList = Rc::new(RefCell::new(Vec::new()));
        *self.inner.zone_delegates.borrow_mut() = Some(Rc::clone(&list));
        list
    }

    /// True when the task still carries the given delegate list (no nested
    /// reschedule replaced it).
    pub(crate) fn zone_delegates_is(&self, list: &DelegateList) -> bool {
        self.inner
            .zone_delegates
            .borrow()
            .as_ref()
            .is_some_and(|current| Rc::ptr_eq(current, list))
    }

    pub(crate) fn push_zone_delegate(&self, delegate: Rc<ZoneDelegate>) {
        if let Some(list) = self.inner.zone_delegates.borrow().as_ref() {
            list.borrow_mut().push(delegate);
        }
    }

    /// Applies `delta` to every registered delegate's counter for this
    /// task's kind. A decrement ends the task's contribution and detaches
    /// the list before any `has_task` observer runs.
    pub(crate) fn update_task_counts(&self, delta: i64) {
        let list = {
            let mut slot = self.inner.zone_delegates.borrow_mut();
            let current = slot.clone();
            if delta == -1 {
                *slot = None;
            }
            current
        };
        let Some(list) = list else {
            return;
        };
        let delegates: Vec<Rc<ZoneDelegate>> = list.borrow().clone();
        for delegate in delegates {
            delegate.update_task_count(self.inner.kind, delta);
        }
    }

    pub(crate) fn set_run_count(&self, value: u64) {
        self.inner.run_count.set(value);
    }

    pub(crate) fn increment_run_count(&self) {
        self.inner.run_count.set(self.inner.run_count.get() + 1);
    }

    pub(crate) fn has_schedule_fn(&self) -> bool {
        self.inner.schedule_fn.is_some()
    }

    pub(crate) fn call_schedule_fn(&self) {
        if let Some(schedule) = &self.inner.schedule_fn {
            schedule(self);
        }
    }

    pub(crate) fn has_cancel_fn(&self) -> bool {
        self.inner.cancel_fn.borrow().is_some()
    }

    /// One-shot macro tasks cannot be cancelled once they fire.
    pub(crate) fn clear_cancel_fn(&self) {
        *self.inner.cancel_fn.borrow_mut() = None;
    }

    pub(crate) fn call_cancel_fn(&self) {
        // Take the function out for the duration of the call so a
        // re-entrant clear cannot collide with the borrow.
        let cancel = self.inner.cancel_fn.borrow_mut().take();
        if let Some(cancel) = cancel {
            cancel(self);
            let mut slot = self.inner.cancel_fn.borrow_mut();
            if slot.is_none() {
                *slot = Some(cancel);
            }
        }
    }

    pub(crate) fn call_callback(&self) {
        (self.inner.callback)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("source", &self.inner.source)
            .field("state", &self.inner.state.get())
            .field("run_count", &self.inner.run_count.get())
            .finish_non_exhaustive()
    }
}
