//! Host-API patch registry and the private patch API.
//!
//! Patches are the sole mechanism by which host-API interception enters
//! the system. Each patch is registered once under a unique name, gated
//! by a host disable flag, and handed a [`PrivateApi`] through which it
//! reaches engine internals: the microtask scheduler, the unhandled-error
//! and drain-done hooks, native primitive registration, and the
//! overridable patch utilities other patches build on.

use crate::config;
use crate::error::CaughtError;
use crate::microtask::{self, TriggerFn};
use crate::spec::Callback;
use crate::symbol;
use crate::task::Task;
use crate::tracing_compat::{debug, error};
use crate::zone::Zone;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Registry name the zone-aware promise patch must use.
pub const PROMISE_PATCH_NAME: &str = "ZoneAwarePromise";

type UnhandledErrorHook = Rc<dyn Fn(&CaughtError)>;
type DrainDoneHook = Rc<dyn Fn()>;
type PatchEventTargetFn = Rc<dyn Fn(&str) -> bool>;
type PatchOnPropertiesFn = Rc<dyn Fn(&str, &[&str])>;
type PatchMethodFn = Rc<dyn Fn(&str, &str) -> bool>;
type BindArgumentsFn = Rc<dyn Fn(Vec<Callback>, &str) -> Vec<Callback>>;

thread_local! {
    static PATCHES: RefCell<HashMap<String, Rc<dyn Any>>> = RefCell::new(HashMap::new());
    static ON_UNHANDLED_ERROR: RefCell<Option<UnhandledErrorHook>> = RefCell::new(None);
    static MICROTASK_DRAIN_DONE: RefCell<Option<DrainDoneHook>> = RefCell::new(None);
    static PATCH_EVENT_TARGET: RefCell<Option<PatchEventTargetFn>> = RefCell::new(None);
    static PATCH_ON_PROPERTIES: RefCell<Option<PatchOnPropertiesFn>> = RefCell::new(None);
    static PATCH_METHOD: RefCell<Option<PatchMethodFn>> = RefCell::new(None);
    static BIND_ARGUMENTS: RefCell<Option<BindArgumentsFn>> = RefCell::new(None);
}

/// Loads a host-API patch.
///
/// The patch function runs synchronously and its return value is stashed
/// in the registry under `name`. Loading the same name twice is fatal.
/// When the host disable flag for `name` is set (symbol stash or
/// `ZONAL_DISABLE_<NAME>` in the environment), the patch is skipped
/// silently.
pub fn load_patch(name: &str, patch: impl FnOnce(&PrivateApi) -> Rc<dyn Any>) {
    let already_loaded = PATCHES.with(|patches| patches.borrow().contains_key(name));
    assert!(!already_loaded, "patch '{name}' is already loaded");
    if config::patch_disabled(name) {
        debug!(patch = name, "patch disabled by host flag; skipping");
        return;
    }
    debug!(patch = name, "loading patch");
    let value = patch(&PrivateApi { _private: () });
    PATCHES.with(|patches| {
        patches.borrow_mut().insert(name.to_string(), value);
    });
}

/// The registry value stashed by the named patch, if it was loaded.
#[must_use]
pub fn patch_value(name: &str) -> Option<Rc<dyn Any>> {
    PATCHES.with(|patches| patches.borrow().get(name).cloned())
}

/// Asserts that the zone-aware promise patch is active.
///
/// The engine cannot keep its ordering guarantees if the host promise was
/// captured before patching; bootstrap code calls this after loading all
/// patches.
pub fn assert_zone_patched() {
    assert!(
        patch_value(PROMISE_PATCH_NAME).is_some(),
        "the host promise has not been patched: the '{PROMISE_PATCH_NAME}' patch is missing \
         (loaded too late, or the host promise was overwritten)"
    );
}

/// True unless the host flag suppressing uncaught-error output is set.
#[must_use]
pub fn show_uncaught_error() -> bool {
    !config::ignore_console_error_uncaught()
}

/// Routes an error that escaped the microtask drain.
pub(crate) fn dispatch_unhandled_error(err: &CaughtError) {
    let hook = ON_UNHANDLED_ERROR.with(|slot| slot.borrow().clone());
    match hook {
        Some(hook) => hook(err),
        None => {
            if show_uncaught_error() {
                error!(zone = %err.zone_name(), "unhandled error: {err}");
            }
        }
    }
}

/// Signals the end of a microtask drain.
pub(crate) fn notify_microtask_drain_done() {
    if let Some(hook) = MICROTASK_DRAIN_DONE.with(|slot| slot.borrow().clone()) {
        hook();
    }
}

/// Engine internals handed to patch functions.
///
/// Everything here is scoped to the current thread's engine. Setters
/// overwrite process defaults for that thread only.
pub struct PrivateApi {
    _private: (),
}

impl PrivateApi {
    /// Mints the namespaced symbol for `name`.
    #[must_use]
    pub fn symbol(&self, name: &str) -> String {
        symbol::zone_symbol(name)
    }

    /// The current zone together with the frame-stack depth.
    #[must_use]
    pub fn current_zone_frame(&self) -> (usize, Zone) {
        (crate::engine::frame_depth(), crate::engine::current_zone())
    }

    /// Enqueues on the microtask queue, arming the drain when necessary.
    ///
    /// `None` arms without enqueueing, which patches use to force a drain
    /// after the current turn.
    pub fn schedule_micro_task(&self, task: Option<Task>) {
        microtask::schedule_micro_task(task);
    }

    /// Overrides the handler for errors escaping the microtask drain.
    pub fn set_on_unhandled_error(&self, hook: impl Fn(&CaughtError) + 'static) {
        ON_UNHANDLED_ERROR.with(|slot| *slot.borrow_mut() = Some(Rc::new(hook)));
    }

    /// Overrides the end-of-drain notification.
    pub fn set_microtask_drain_done(&self, hook: impl Fn() + 'static) {
        MICROTASK_DRAIN_DONE.with(|slot| *slot.borrow_mut() = Some(Rc::new(hook)));
    }

    /// True unless the host flag suppressing uncaught-error output is set.
    #[must_use]
    pub fn show_uncaught_error(&self) -> bool {
        show_uncaught_error()
    }

    /// Registers the host's deferred-execution primitive as the microtask
    /// drain trigger (the promise patch calls this with the original,
    /// unpatched resolution hook).
    pub fn set_native_microtask(&self, trigger: TriggerFn) {
        microtask::set_native_microtask(trigger);
    }

    /// Registers the host's zero-delay timer as the fallback drain
    /// trigger.
    pub fn set_native_timer(&self, trigger: TriggerFn) {
        microtask::set_native_timer(trigger);
    }

    /// Patches an event-target constructor; returns true when patched.
    ///
    /// No-op until a patch installs an implementation via
    /// [`PrivateApi::set_patch_event_target`].
    pub fn patch_event_target(&self, target: &str) -> bool {
        PATCH_EVENT_TARGET
            .with(|slot| slot.borrow().clone())
            .is_some_and(|hook| hook(target))
    }

    /// Installs the event-target patch utility.
    pub fn set_patch_event_target(&self, hook: impl Fn(&str) -> bool + 'static) {
        PATCH_EVENT_TARGET.with(|slot| *slot.borrow_mut() = Some(Rc::new(hook)));
    }

    /// Patches `on`-style listener properties; no-op until installed.
    pub fn patch_on_properties(&self, target: &str, properties: &[&str]) {
        if let Some(hook) = PATCH_ON_PROPERTIES.with(|slot| slot.borrow().clone()) {
            hook(target, properties);
        }
    }

    /// Installs the on-properties patch utility.
    pub fn set_patch_on_properties(&self, hook: impl Fn(&str, &[&str]) + 'static) {
        PATCH_ON_PROPERTIES.with(|slot| *slot.borrow_mut() = Some(Rc::new(hook)));
    }

    /// Patches a named method on a host object; returns true when
    /// patched. No-op until installed.
    pub fn patch_method(&self, target: &str, method: &str) -> bool {
        PATCH_METHOD
            .with(|slot| slot.borrow().clone())
            .is_some_and(|hook| hook(target, method))
    }

    /// Installs the method patch utility.
    pub fn set_patch_method(&self, hook: impl Fn(&str, &str) -> bool + 'static) {
        PATCH_METHOD.with(|slot| *slot.borrow_mut() = Some(Rc::new(hook)));
    }

    /// Binds callbacks to the current zone.
    ///
    /// The default wraps each callback with [`Zone::wrap`] on the current
    /// zone; patches may override the behavior.
    #[must_use]
    pub fn bind_arguments(&self, callbacks: Vec<Callback>, source: &str) -> Vec<Callback> {
        match BIND_ARGUMENTS.with(|slot| slot.borrow().clone()) {
            Some(hook) => hook(callbacks, source),
            None => callbacks
                .into_iter()
                .map(|callback| {
                    let wrapped = Zone::current().wrap(move || callback(), source);
                    Rc::new(wrapped) as Callback
                })
                .collect(),
        }
    }

    /// Overrides the argument-binding utility.
    pub fn set_bind_arguments(
        &self,
        hook: impl Fn(Vec<Callback>, &str) -> Vec<Callback> + 'static,
    ) {
        BIND_ARGUMENTS.with(|slot| *slot.borrow_mut() = Some(Rc::new(hook)));
    }
}
