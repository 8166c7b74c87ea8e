//! Zone specs: the configuration record that creates a zone.
//!
//! A [`ZoneSpec`] is a bag of eight optional hooks plus a name and a
//! property map. It is consumed once, when the forked zone's delegate is
//! constructed, and never mutated by the engine afterwards.
//!
//! Every hook receives the *parent* delegate (for forwarding), the zone
//! whose spec declared the hook, and the zone the operation was invoked on.
//! A hook that does not forward replaces the default behavior entirely.

use crate::delegate::ZoneDelegate;
use crate::error::CaughtError;
use crate::task::Task;
use crate::types::HasTaskState;
use crate::zone::Zone;
use core::fmt;
use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

/// A value stored in a zone's property map.
pub type PropertyValue = Rc<dyn Any>;

/// A type-erased callback as passed through `intercept` and produced by
/// `wrap`. Zero-argument by design: Rust closures capture their
/// environment, so there is nothing to forward.
pub type Callback = Rc<dyn Fn()>;

/// Hook observing zone forking.
///
/// Receives the spec for the new child and must return the forked zone,
/// typically by forwarding to `delegate.fork(target, spec)`.
pub type ForkHook = Box<dyn Fn(&ZoneDelegate, &Zone, &Zone, ZoneSpec) -> Zone>;

/// Hook rewriting callbacks at `wrap` time.
pub type InterceptHook = Box<dyn Fn(&ZoneDelegate, &Zone, &Zone, Callback, &str) -> Callback>;

/// Hook bracketing synchronous invocation (`run` / `run_guarded`).
///
/// The fourth argument is the continuation that performs the actual call;
/// a conforming hook invokes it exactly once (usually via
/// `delegate.invoke`). Eliding it makes `run` fail fatally, since a typed
/// return value cannot be conjured; `run_guarded` returns `None` instead.
pub type InvokeHook = Box<dyn Fn(&ZoneDelegate, &Zone, &Zone, &mut dyn FnMut(), &str)>;

/// Hook deciding the fate of errors caught at zone boundaries.
///
/// Returning `true` propagates the error (re-raises the original payload);
/// `false` swallows it.
pub type HandleErrorHook = Box<dyn Fn(&ZoneDelegate, &Zone, &Zone, &CaughtError) -> bool>;

/// Hook observing task scheduling.
///
/// Must return the task that was scheduled — either the one passed in
/// (after forwarding), or a replacement, in which case the hook takes full
/// responsibility for that task's counter bookkeeping: the engine bumps
/// counters only when the returned task is the original one and its
/// delegate list was not replaced by a nested reschedule.
pub type ScheduleTaskHook = Box<dyn Fn(&ZoneDelegate, &Zone, &Zone, Task) -> Task>;

/// Hook bracketing task execution.
pub type InvokeTaskHook = Box<dyn Fn(&ZoneDelegate, &Zone, &Zone, &Task)>;

/// Hook observing task cancellation.
pub type CancelTaskHook = Box<dyn Fn(&ZoneDelegate, &Zone, &Zone, &Task)>;

/// Hook observing empty/non-empty transitions of a zone's task sets.
pub type HasTaskHook = Box<dyn Fn(&ZoneDelegate, &Zone, &Zone, &HasTaskState)>;

/// Configuration record consumed by [`Zone::fork`].
///
/// ```
/// use zonal::spec::ZoneSpec;
/// use zonal::zone::Zone;
/// use std::rc::Rc;
///
/// let spec = ZoneSpec::new("request")
///     .property("request-id", Rc::new(7_u64))
///     .on_handle_error(|_, _, _, _| false);
/// let zone = Zone::root().fork(spec);
/// assert_eq!(zone.name(), "request");
/// ```
pub struct ZoneSpec {
    pub(crate) name: String,
    pub(crate) properties: HashMap<String, PropertyValue>,
    pub(crate) on_fork: Option<ForkHook>,
    pub(crate) on_intercept: Option<InterceptHook>,
    pub(crate) on_invoke: Option<InvokeHook>,
    pub(crate) on_handle_error: Option<HandleErrorHook>,
    pub(crate) on_schedule_task: Option<ScheduleTaskHook>,
    pub(crate) on_invoke_task: Option<InvokeTaskHook>,
    pub(crate) on_cancel_task: Option<CancelTaskHook>,
    pub(crate) on_has_task: Option<HasTaskHook>,
}

impl ZoneSpec {
    /// Creates a spec with the given name and no hooks.
    ///
    /// An empty name is normalized to `"unnamed"`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if name.is_empty() {
            name = "unnamed".to_string();
        }
        Self {
            name,
            properties: HashMap::new(),
            on_fork: None,
            on_intercept: None,
            on_invoke: None,
            on_handle_error: None,
            on_schedule_task: None,
            on_invoke_task: None,
            on_cancel_task: None,
            on_has_task: None,
        }
    }

    /// The zone name this spec configures.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a property, fixed at construction of the forked zone.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Installs the fork hook.
    #[must_use]
    pub fn on_fork(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, &Zone, ZoneSpec) -> Zone + 'static,
    ) -> Self {
        self.on_fork = Some(Box::new(hook));
        self
    }

    /// Installs the intercept hook.
    #[must_use]
    pub fn on_intercept(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, &Zone, Callback, &str) -> Callback + 'static,
    ) -> Self {
        self.on_intercept = Some(Box::new(hook));
        self
    }

    /// Installs the invoke hook.
    #[must_use]
    pub fn on_invoke(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, &Zone, &mut dyn FnMut(), &str) + 'static,
    ) -> Self {
        self.on_invoke = Some(Box::new(hook));
        self
    }

    /// Installs the error hook.
    #[must_use]
    pub fn on_handle_error(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, &Zone, &CaughtError) -> bool + 'static,
    ) -> Self {
        self.on_handle_error = Some(Box::new(hook));
        self
    }

    /// Installs the schedule hook.
    #[must_use]
    pub fn on_schedule_task(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, &Zone, Task) -> Task + 'static,
    ) -> Self {
        self.on_schedule_task = Some(Box::new(hook));
        self
    }

    /// Installs the task-invocation hook.
    #[must_use]
    pub fn on_invoke_task(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, &Zone, &Task) + 'static,
    ) -> Self {
        self.on_invoke_task = Some(Box::new(hook));
        self
    }

    /// Installs the cancellation hook.
    #[must_use]
    pub fn on_cancel_task(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, &Zone, &Task) + 'static,
    ) -> Self {
        self.on_cancel_task = Some(Box::new(hook));
        self
    }

    /// Installs the task-count hook.
    #[must_use]
    pub fn on_has_task(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, &Zone, &HasTaskState) + 'static,
    ) -> Self {
        self.on_has_task = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for ZoneSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hooks = Vec::new();
        if self.on_fork.is_some() {
            hooks.push("on_fork");
        }
        if self.on_intercept.is_some() {
            hooks.push("on_intercept");
        }
        if self.on_invoke.is_some() {
            hooks.push("on_invoke");
        }
        if self.on_handle_error.is_some() {
            hooks.push("on_handle_error");
        }
        if self.on_schedule_task.is_some() {
            hooks.push("on_schedule_task");
        }
        if self.on_invoke_task.is_some() {
            hooks.push("on_invoke_task");
        }
        if self.on_cancel_task.is_some() {
            hooks.push("on_cancel_task");
        }
        if self.on_has_task.is_some() {
            hooks.push("on_has_task");
        }
        f.debug_struct("ZoneSpec")
            .field("name", &self.name)
            .field("properties", &self.properties.len())
            .field("hooks", &hooks)
            .finish()
    }
}

thread_local! {
    static FORWARDING_SPEC: Rc<ZoneSpec> = Rc::new(build_forwarding_spec());
}

/// The built-in spec installed by the `has_task` amplification rule.
///
/// Forwards the four task hooks one level up the delegate chain so that a
/// delegate whose ancestors observe `has_task` sees every task transition
/// in its subtree.
pub(crate) fn forwarding_spec() -> Rc<ZoneSpec> {
    FORWARDING_SPEC.with(Rc::clone)
}

fn build_forwarding_spec() -> ZoneSpec {
    ZoneSpec::new("")
        .on_schedule_task(|delegate, _current, target, task| delegate.schedule_task(target, task))
        .on_invoke_task(|delegate, _current, target, task| delegate.invoke_task(target, task))
        .on_cancel_task(|delegate, _current, target, task| delegate.cancel_task(target, task))
        .on_has_task(|delegate, _current, target, state| delegate.has_task(target, state))
}
