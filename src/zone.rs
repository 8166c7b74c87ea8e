//! The zone tree and its public API.
//!
//! A [`Zone`] is a node in a rooted tree of execution contexts. Zones are
//! immutable after construction and cheap to clone; identity is node
//! identity. The tree is reachable only through the thread-local current
//! stack and explicit user references — there is no child enumeration.
//!
//! Entering a zone (`run`, `run_guarded`, `run_task`) pushes a frame on
//! the current-zone stack; the frame is popped on every exit path,
//! normal or panicking.

use crate::delegate::ZoneDelegate;
use crate::engine;
use crate::error::CaughtError;
use crate::spec::{Callback, PropertyValue, ZoneSpec};
use crate::task::{CancelFn, ScheduleFn, Task, TaskData};
use crate::tracing_compat::{debug, trace};
use crate::types::{TaskKind, TaskStatus, ZoneId};
use core::fmt;
use std::cell::OnceCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

pub(crate) struct ZoneInner {
    pub(crate) parent: Option<Zone>,
    pub(crate) name: String,
    pub(crate) id: ZoneId,
    pub(crate) spec: Option<Rc<ZoneSpec>>,
    pub(crate) delegate: OnceCell<Rc<ZoneDelegate>>,
}

/// An ambient execution context; a node in the zone tree.
#[derive(Clone)]
pub struct Zone {
    pub(crate) inner: Rc<ZoneInner>,
}

impl Zone {
    /// The root of this thread's zone tree.
    #[must_use]
    pub fn root() -> Zone {
        engine::root_zone()
    }

    /// The zone of the innermost active frame.
    #[must_use]
    pub fn current() -> Zone {
        engine::current_zone()
    }

    /// The task currently being executed, if any.
    #[must_use]
    pub fn current_task() -> Option<Task> {
        engine::current_task()
    }

    pub(crate) fn new_root() -> Zone {
        Self::construct(None, None)
    }

    pub(crate) fn new_child(parent: &Zone, spec: ZoneSpec) -> Zone {
        Self::construct(Some(parent.clone()), Some(spec))
    }

    fn construct(parent: Option<Zone>, spec: Option<ZoneSpec>) -> Zone {
        let name = spec
            .as_ref()
            .map_or_else(|| "<root>".to_string(), |s| s.name().to_string());
        let spec = spec.map(Rc::new);
        let zone = Zone {
            inner: Rc::new(ZoneInner {
                parent: parent.clone(),
                name,
                id: ZoneId::next(),
                spec: spec.clone(),
                delegate: OnceCell::new(),
            }),
        };
        let parent_delegate = parent.as_ref().map(Zone::delegate);
        let delegate = Rc::new(ZoneDelegate::new(&zone, parent_delegate.as_ref(), spec));
        ZoneDelegate::bind_self(&delegate);
        if zone.inner.delegate.set(delegate).is_err() {
            unreachable!("zone delegate installed twice");
        }
        trace!(zone = %zone.inner.id, name = %zone.inner.name, "zone created");
        zone
    }

    pub(crate) fn delegate(&self) -> Rc<ZoneDelegate> {
        Rc::clone(
            self.inner
                .delegate
                .get()
                .expect("zone delegate not yet installed"),
        )
    }

    /// The parent zone; `None` only for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Zone> {
        self.inner.parent.clone()
    }

    /// The zone name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The diagnostic identifier of this zone.
    #[must_use]
    pub fn id(&self) -> ZoneId {
        self.inner.id
    }

    /// Walks from this zone to the root, self first.
    pub fn ancestry(&self) -> impl Iterator<Item = Zone> {
        Ancestry {
            next: Some(self.clone()),
        }
    }

    fn own_property(&self, key: &str) -> Option<PropertyValue> {
        self.inner
            .spec
            .as_ref()
            .and_then(|spec| spec.properties.get(key).cloned())
    }

    /// The first value for `key` walking from this zone to the root.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<PropertyValue> {
        self.get_zone_with(key).and_then(|zone| zone.own_property(key))
    }

    /// The nearest zone (self included) whose spec defines `key`.
    #[must_use]
    pub fn get_zone_with(&self, key: &str) -> Option<Zone> {
        self.ancestry().find(|zone| zone.own_property(key).is_some())
    }

    /// Forks a child zone configured by `spec`, via the `on_fork` chain.
    #[must_use]
    pub fn fork(&self, spec: ZoneSpec) -> Zone {
        self.delegate().fork(self, spec)
    }

    /// Runs `f` with this zone current; the callback's value is returned
    /// and errors propagate unchanged.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = engine::ZoneFrameGuard::push(self.clone());
        let delegate = self.delegate();
        let mut result: Option<R> = None;
        {
            let mut f = Some(f);
            let mut body = || {
                let f = f.take().expect("invoke continuation called more than once");
                result = Some(f());
            };
            delegate.invoke(self, &mut body, "");
        }
        result.unwrap_or_else(|| {
            panic!(
                "an on_invoke hook elided the callback invocation in zone '{}'",
                self.name()
            )
        })
    }

    /// As [`Zone::run`], but catches errors and routes them through the
    /// `handle_error` chain. Returns `None` when the error was suppressed
    /// (or when a hook elided the invocation).
    pub fn run_guarded<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        self.run_guarded_inner(f, "")
    }

    fn run_guarded_inner<R>(&self, f: impl FnOnce() -> R, source: &str) -> Option<R> {
        let _frame = engine::ZoneFrameGuard::push(self.clone());
        let delegate = self.delegate();
        let mut result: Option<R> = None;
        let outcome = {
            let mut f = Some(f);
            let result = &mut result;
            catch_unwind(AssertUnwindSafe(|| {
                let mut body = || {
                    let f = f.take().expect("invoke continuation called more than once");
                    *result = Some(f());
                };
                delegate.invoke(self, &mut body, source);
            }))
        };
        match outcome {
            Ok(()) => result,
            Err(payload) => {
                let error = CaughtError::new(payload, self.name());
                if delegate.handle_error(self, &error) {
                    error.rethrow();
                }
                debug!(zone = %self.name(), message = %error.message(), "error suppressed");
                None
            }
        }
    }

    /// Binds `callback` to this zone: the returned closure re-enters the
    /// zone via the guarded path on every call, after routing the callback
    /// through the `intercept` chain once.
    #[must_use]
    pub fn wrap(&self, callback: impl Fn() + 'static, source: &str) -> impl Fn() + 'static {
        let callback: Callback = Rc::new(callback);
        let intercepted = self.delegate().intercept(self, callback, source);
        let zone = self.clone();
        let source = source.to_string();
        move || {
            let intercepted = Rc::clone(&intercepted);
            zone.run_guarded_inner(move || intercepted(), &source);
        }
    }

    /// Schedules `task` in this zone.
    ///
    /// The task must be `NotScheduled` and either unowned or owned by this
    /// zone or one of its descendants' ancestors — scheduling a task into
    /// a subtree of its owning zone is fatal.
    pub fn schedule_task(&self, task: Task) -> Task {
        if let Some(owner) = task.zone() {
            if owner != *self {
                // walking rootward from here: meeting the owner means this
                // zone lives inside the owner's subtree
                for ancestor in self.ancestry() {
                    assert!(
                        ancestor != owner,
                        "can not reschedule task '{}' to '{}' which is a descendant of the original zone '{}'",
                        task.source(),
                        self.name(),
                        owner.name()
                    );
                }
            }
        }
        task.transition_to(TaskStatus::Scheduling, TaskStatus::NotScheduled, None);
        let delegates = task.install_zone_delegates();
        task.set_zone(Some(self.clone()));
        debug!(zone = %self.name(), task = %task.id(), kind = %task.kind(), "scheduling task");

        let delegate = self.delegate();
        let scheduled = {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                delegate.schedule_task(self, task.clone())
            }));
            match outcome {
                Ok(scheduled) => scheduled,
                Err(payload) => {
                    task.transition_to(TaskStatus::Unknown, TaskStatus::Scheduling, None);
                    let error = CaughtError::new(payload, self.name())
                        .with_task_source(task.source());
                    // the hook failed; report, then surface to the caller
                    let _ = delegate.handle_error(self, &error);
                    error.rethrow();
                }
            }
        };

        if scheduled.same_task(&task) && scheduled.zone_delegates_is(&delegates) {
            scheduled.update_task_counts(1);
        }
        if scheduled.state() == TaskStatus::Scheduling {
            scheduled.transition_to(TaskStatus::Scheduled, TaskStatus::Scheduling, None);
        }
        scheduled
    }

    /// Schedules a microtask: queue-backed, non-cancellable, drained
    /// before the host regains control.
    pub fn schedule_micro_task(&self, source: &str, callback: impl Fn() + 'static) -> Task {
        self.schedule_task(Task::new(
            TaskKind::MicroTask,
            source,
            Rc::new(callback),
            None,
            None,
            None,
        ))
    }

    /// Schedules a macro task backed by host scheduling primitives.
    pub fn schedule_macro_task(
        &self,
        source: &str,
        callback: impl Fn() + 'static,
        data: Option<TaskData>,
        schedule_fn: Option<ScheduleFn>,
        cancel_fn: Option<CancelFn>,
    ) -> Task {
        self.schedule_task(Task::new(
            TaskKind::MacroTask,
            source,
            Rc::new(callback),
            data,
            schedule_fn,
            cancel_fn,
        ))
    }

    /// Schedules an event task: a listener that may fire any number of
    /// times.
    pub fn schedule_event_task(
        &self,
        source: &str,
        callback: impl Fn() + 'static,
        data: Option<TaskData>,
        schedule_fn: Option<ScheduleFn>,
        cancel_fn: Option<CancelFn>,
    ) -> Task {
        self.schedule_task(Task::new(
            TaskKind::EventTask,
            source,
            Rc::new(callback),
            data,
            schedule_fn,
            cancel_fn,
        ))
    }

    /// Executes `task` with this zone current.
    ///
    /// Must be called on the task's owning zone. Cancelled event tasks
    /// that still fire (the cancel/dispatch race) return without effect.
    pub fn run_task(&self, task: &Task) {
        let owner = task.zone();
        assert!(
            owner.as_ref() == Some(self),
            "A task can only be run in the zone of creation! (Creation: {}; Execution: {})",
            owner.as_ref().map_or("<none>", Zone::name),
            self.name()
        );
        if task.state() == TaskStatus::NotScheduled && task.kind() == TaskKind::EventTask {
            return;
        }
        let reentry = task.state() != TaskStatus::Running;
        if reentry {
            task.transition_to(TaskStatus::Running, TaskStatus::Scheduled, None);
        }
        task.increment_run_count();

        let _task_guard = engine::CurrentTaskGuard::swap(Some(task.clone()));
        let _frame = engine::ZoneFrameGuard::push(self.clone());
        trace!(zone = %self.name(), task = %task.id(), reentry, "running task");

        // a one-shot timer cannot be cancelled once it has fired
        if task.kind() == TaskKind::MacroTask && !task.is_periodic() {
            task.clear_cancel_fn();
        }

        let delegate = self.delegate();
        let outcome = catch_unwind(AssertUnwindSafe(|| delegate.invoke_task(self, task)));
        let propagating = match outcome {
            Ok(()) => None,
            Err(payload) => {
                let error =
                    CaughtError::new(payload, self.name()).with_task_source(task.source());
                if delegate.handle_error(self, &error) {
                    Some(error)
                } else {
                    debug!(zone = %self.name(), task = %task.id(), "task error suppressed");
                    None
                }
            }
        };

        // a cancel during the run has already settled the task's state
        if task.state() != TaskStatus::NotScheduled && task.state() != TaskStatus::Unknown {
            if task.kind() == TaskKind::EventTask || task.is_periodic() {
                if reentry {
                    task.transition_to(TaskStatus::Scheduled, TaskStatus::Running, None);
                }
            } else {
                task.set_run_count(0);
                task.update_task_counts(-1);
                task.transition_to(
                    TaskStatus::NotScheduled,
                    TaskStatus::Running,
                    Some(TaskStatus::NotScheduled),
                );
            }
        }

        if let Some(error) = propagating {
            error.rethrow();
        }
    }

    /// Cancels a scheduled or running task.
    ///
    /// Synchronous and effective on return: the task leaves in
    /// `NotScheduled` with `run_count` 0 and its counter contribution
    /// withdrawn. Whether a running callback is actually interrupted is
    /// the `cancel_fn`'s concern.
    pub fn cancel_task(&self, task: &Task) {
        let owner = task.zone();
        assert!(
            owner.as_ref() == Some(self),
            "A task can only be cancelled in the zone of creation! (Creation: {}; Execution: {})",
            owner.as_ref().map_or("<none>", Zone::name),
            self.name()
        );
        task.transition_to(
            TaskStatus::Canceling,
            TaskStatus::Scheduled,
            Some(TaskStatus::Running),
        );
        debug!(zone = %self.name(), task = %task.id(), "cancelling task");

        let delegate = self.delegate();
        let outcome = catch_unwind(AssertUnwindSafe(|| delegate.cancel_task(self, task)));
        if let Err(payload) = outcome {
            task.transition_to(TaskStatus::Unknown, TaskStatus::Canceling, None);
            let error = CaughtError::new(payload, self.name()).with_task_source(task.source());
            let _ = delegate.handle_error(self, &error);
            error.rethrow();
        }

        task.update_task_counts(-1);
        task.transition_to(TaskStatus::NotScheduled, TaskStatus::Canceling, None);
        task.set_run_count(0);
    }
}

impl PartialEq for Zone {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Zone {}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("parent", &self.inner.parent.as_ref().map(|p| p.name()))
            .finish()
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct Ancestry {
    next: Option<Zone>,
}

impl Iterator for Ancestry {
    type Item = Zone;

    fn next(&mut self) -> Option<Zone> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}
