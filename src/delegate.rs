//! The per-zone hook-dispatch delegate chain.
//!
//! Each zone owns exactly one [`ZoneDelegate`]. At construction the
//! delegate resolves, for every hook, the nearest ancestor spec that
//! defines it; dispatch is then a single indirect call regardless of tree
//! depth. A delegate with no resolved chain for a hook performs that
//! hook's default action directly.
//!
//! The one place short-circuiting yields to correctness: when the owning
//! spec or any ancestor observes `has_task`, the three task hooks are
//! forced through the built-in forwarding spec so this delegate sees (and
//! counts) every task transition in its subtree.

use crate::error::CaughtError;
use crate::spec::{forwarding_spec, Callback, ZoneSpec};
use crate::task::Task;
use crate::tracing_compat::trace;
use crate::types::{HasTaskState, TaskKind};
use crate::zone::{Zone, ZoneInner};
use core::fmt;
use std::cell::{Cell, OnceCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

/// A resolved hook chain: the spec that defines the hook, the delegate to
/// pass into it for forwarding, and the zone that declared it.
///
/// Zone references are weak to keep the zone ↔ delegate graph acyclic;
/// the strong parent chain guarantees every declaring zone outlives any
/// delegate that can reach it.
struct HookChain {
    spec: Rc<ZoneSpec>,
    delegate: Rc<ZoneDelegate>,
    zone: Weak<ZoneInner>,
}

impl HookChain {
    fn new(spec: Rc<ZoneSpec>, delegate: Rc<ZoneDelegate>, zone: &Zone) -> Self {
        Self {
            spec,
            delegate,
            zone: Rc::downgrade(&zone.inner),
        }
    }

    fn zone(&self) -> Zone {
        Zone {
            inner: self
                .zone
                .upgrade()
                .expect("declaring zone dropped while its hook chain was reachable"),
        }
    }
}

impl Clone for HookChain {
    fn clone(&self) -> Self {
        Self {
            spec: Rc::clone(&self.spec),
            delegate: Rc::clone(&self.delegate),
            zone: Weak::clone(&self.zone),
        }
    }
}

/// Dispatches hooks on behalf of its owning zone.
///
/// Delegates are handed to every hook as the forwarding target: calling
/// the same operation on the received delegate continues the chain one
/// level up, ending in the default action.
pub struct ZoneDelegate {
    zone: Weak<ZoneInner>,
    fork: Option<HookChain>,
    intercept: Option<HookChain>,
    invoke: Option<HookChain>,
    handle_error: Option<HookChain>,
    schedule_task: Option<HookChain>,
    invoke_task: Option<HookChain>,
    cancel_task: Option<HookChain>,
    has_task: Option<HookChain>,
    /// Set iff the `has_task` chain is active; registered on every task
    /// scheduled through this delegate so counters can be kept.
    has_task_owner: OnceCell<Weak<ZoneDelegate>>,
    task_counts: [Cell<i64>; 3],
}

impl ZoneDelegate {
    pub(crate) fn new(
        zone: &Zone,
        parent: Option<&Rc<ZoneDelegate>>,
        spec: Option<Rc<ZoneSpec>>,
    ) -> Self {
        let mut fork = parent.and_then(|p| p.fork.clone());
        let mut intercept = parent.and_then(|p| p.intercept.clone());
        let mut invoke = parent.and_then(|p| p.invoke.clone());
        let mut handle_error = parent.and_then(|p| p.handle_error.clone());
        let mut schedule_task = parent.and_then(|p| p.schedule_task.clone());
        let mut invoke_task = parent.and_then(|p| p.invoke_task.clone());
        let mut cancel_task = parent.and_then(|p| p.cancel_task.clone());
        // has_task is never inherited as a copied chain: each level either
        // participates in counting (set below) or stays silent.
        let mut has_task = None;

        if let (Some(spec_rc), Some(parent_rc)) = (&spec, parent) {
            let own = |chain: &mut Option<HookChain>, defined: bool| {
                if defined {
                    *chain = Some(HookChain::new(
                        Rc::clone(spec_rc),
                        Rc::clone(parent_rc),
                        zone,
                    ));
                }
            };
            own(&mut fork, spec_rc.on_fork.is_some());
            own(&mut intercept, spec_rc.on_intercept.is_some());
            own(&mut invoke, spec_rc.on_invoke.is_some());
            own(&mut handle_error, spec_rc.on_handle_error.is_some());
            own(&mut schedule_task, spec_rc.on_schedule_task.is_some());
            own(&mut invoke_task, spec_rc.on_invoke_task.is_some());
            own(&mut cancel_task, spec_rc.on_cancel_task.is_some());

            let spec_has_task = spec_rc.on_has_task.is_some();
            let parent_has_task = parent_rc.has_task.is_some();
            if spec_has_task || parent_has_task {
                // Counting requires observing every task transition in the
                // subtree, so the task hooks may not short-circuit past
                // this delegate.
                let has_task_spec = if spec_has_task {
                    Rc::clone(spec_rc)
                } else {
                    forwarding_spec()
                };
                has_task = Some(HookChain::new(has_task_spec, Rc::clone(parent_rc), zone));
                let force = |chain: &mut Option<HookChain>, defined: bool| {
                    if !defined {
                        *chain =
                            Some(HookChain::new(forwarding_spec(), Rc::clone(parent_rc), zone));
                    }
                };
                force(&mut schedule_task, spec_rc.on_schedule_task.is_some());
                force(&mut invoke_task, spec_rc.on_invoke_task.is_some());
                force(&mut cancel_task, spec_rc.on_cancel_task.is_some());
            }
        }

        Self {
            zone: Rc::downgrade(&zone.inner),
            fork,
            intercept,
            invoke,
            handle_error,
            schedule_task,
            invoke_task,
            cancel_task,
            has_task,
            has_task_owner: OnceCell::new(),
            task_counts: [Cell::new(0), Cell::new(0), Cell::new(0)],
        }
    }

    /// Completes construction once the delegate is behind an `Rc`.
    pub(crate) fn bind_self(this: &Rc<Self>) {
        if this.has_task.is_some() {
            let _ = this.has_task_owner.set(Rc::downgrade(this));
        }
    }

    /// The zone this delegate dispatches for.
    #[must_use]
    pub fn zone(&self) -> Zone {
        Zone {
            inner: self
                .zone
                .upgrade()
                .expect("zone dropped while its delegate was reachable"),
        }
    }

    /// Current count of outstanding tasks of `kind` in this delegate's
    /// zone (including its counting subtree).
    #[must_use]
    pub fn task_count(&self, kind: TaskKind) -> i64 {
        self.task_counts[kind.index()].get()
    }

    /// Forks a child of `target`, via the `on_fork` chain or directly.
    pub fn fork(&self, target: &Zone, spec: ZoneSpec) -> Zone {
        match &self.fork {
            Some(chain) => {
                let hook = chain
                    .spec
                    .on_fork
                    .as_ref()
                    .expect("fork chain resolved to a spec without on_fork");
                hook(&chain.delegate, &chain.zone(), target, spec)
            }
            None => Zone::new_child(target, spec),
        }
    }

    /// Rewrites a callback at `wrap` time, via the `on_intercept` chain;
    /// the default returns the callback unchanged.
    pub fn intercept(&self, target: &Zone, callback: Callback, source: &str) -> Callback {
        match &self.intercept {
            Some(chain) => {
                let hook = chain
                    .spec
                    .on_intercept
                    .as_ref()
                    .expect("intercept chain resolved to a spec without on_intercept");
                hook(&chain.delegate, &chain.zone(), target, callback, source)
            }
            None => callback,
        }
    }

    /// Invokes `body` via the `on_invoke` chain; the default calls it
    /// directly.
    pub fn invoke(&self, target: &Zone, body: &mut dyn FnMut(), source: &str) {
        match &self.invoke {
            Some(chain) => {
                let hook = chain
                    .spec
                    .on_invoke
                    .as_ref()
                    .expect("invoke chain resolved to a spec without on_invoke");
                hook(&chain.delegate, &chain.zone(), target, body, source);
            }
            None => body(),
        }
    }

    /// Routes a caught error through the `on_handle_error` chain.
    ///
    /// Returns `true` when the error should propagate (the default).
    pub fn handle_error(&self, target: &Zone, error: &CaughtError) -> bool {
        match &self.handle_error {
            Some(chain) => {
                let hook = chain
                    .spec
                    .on_handle_error
                    .as_ref()
                    .expect("error chain resolved to a spec without on_handle_error");
                hook(&chain.delegate, &chain.zone(), target, error)
            }
            None => true,
        }
    }

    /// Schedules `task` via the `on_schedule_task` chain or the default
    /// action (`schedule_fn`, or the microtask queue for micro tasks).
    ///
    /// Returns the task that was actually scheduled.
    pub fn schedule_task(&self, target: &Zone, task: Task) -> Task {
        match &self.schedule_task {
            Some(chain) => {
                if self.has_task.is_some() {
                    if let Some(owner) = self.has_task_owner.get().and_then(Weak::upgrade) {
                        task.push_zone_delegate(owner);
                    }
                }
                let hook = chain
                    .spec
                    .on_schedule_task
                    .as_ref()
                    .expect("schedule chain resolved to a spec without on_schedule_task");
                hook(&chain.delegate, &chain.zone(), target, task)
            }
            None => {
                if task.has_schedule_fn() {
                    task.call_schedule_fn();
                } else if task.kind() == TaskKind::MicroTask {
                    crate::microtask::schedule_micro_task(Some(task.clone()));
                } else {
                    panic!(
                        "task '{}' ({}) is missing a schedule_fn",
                        task.source(),
                        task.kind()
                    );
                }
                task
            }
        }
    }

    /// Runs `task`'s callback via the `on_invoke_task` chain or directly.
    pub fn invoke_task(&self, target: &Zone, task: &Task) {
        match &self.invoke_task {
            Some(chain) => {
                let hook = chain
                    .spec
                    .on_invoke_task
                    .as_ref()
                    .expect("invoke-task chain resolved to a spec without on_invoke_task");
                hook(&chain.delegate, &chain.zone(), target, task);
            }
            None => task.call_callback(),
        }
    }

    /// Cancels `task` via the `on_cancel_task` chain or its `cancel_fn`.
    pub fn cancel_task(&self, target: &Zone, task: &Task) {
        match &self.cancel_task {
            Some(chain) => {
                let hook = chain
                    .spec
                    .on_cancel_task
                    .as_ref()
                    .expect("cancel chain resolved to a spec without on_cancel_task");
                hook(&chain.delegate, &chain.zone(), target, task);
            }
            None => {
                assert!(
                    task.has_cancel_fn(),
                    "task '{}' ({}) is not cancelable",
                    task.source(),
                    task.kind()
                );
                task.call_cancel_fn();
            }
        }
    }

    /// Fires the `on_has_task` chain with a counter snapshot.
    ///
    /// Hook errors are caught here and routed through `handle_error`; they
    /// never reach the counter updater.
    pub fn has_task(&self, target: &Zone, state: &HasTaskState) {
        let Some(chain) = &self.has_task else {
            return;
        };
        let hook = chain
            .spec
            .on_has_task
            .as_ref()
            .expect("has-task chain resolved to a spec without on_has_task");
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            hook(&chain.delegate, &chain.zone(), target, state);
        }));
        if let Err(payload) = outcome {
            let error = CaughtError::new(payload, target.name());
            let _ = self.handle_error(target, &error);
        }
    }

    /// Applies a counter delta and fires `has_task` on the 0↔1 crossing.
    ///
    /// A delta that would drive a counter negative is a fatal invariant
    /// violation.
    pub fn update_task_count(&self, kind: TaskKind, delta: i64) {
        let cell = &self.task_counts[kind.index()];
        let prev = cell.get();
        let next = prev + delta;
        assert!(
            next >= 0,
            "more {kind}s executed than were scheduled in zone '{}'",
            self.zone().name()
        );
        cell.set(next);
        trace!(kind = %kind, prev, next, "task count updated");
        if prev == 0 || next == 0 {
            let state = HasTaskState {
                micro_task: self.task_counts[TaskKind::MicroTask.index()].get() > 0,
                macro_task: self.task_counts[TaskKind::MacroTask.index()].get() > 0,
                event_task: self.task_counts[TaskKind::EventTask.index()].get() > 0,
                change: kind,
            };
            self.has_task(&self.zone(), &state);
        }
    }
}

impl fmt::Debug for ZoneDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZoneDelegate")
            .field("zone", &self.zone.upgrade().map(|z| z.name.clone()))
            .field("counts_tasks", &self.has_task.is_some())
            .field("micro", &self.task_counts[0].get())
            .field("macro", &self.task_counts[1].get())
            .field("event", &self.task_counts[2].get())
            .finish_non_exhaustive()
    }
}
