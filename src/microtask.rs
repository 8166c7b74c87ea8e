//! The microtask queue and its drain.
//!
//! Microtasks form a single thread-local FIFO. The queue drains either on
//! the trailing edge of the outermost host task invocation, or — for
//! microtasks scheduled outside any task — via a lazily armed trigger
//! borrowed from the host: its deferred-execution primitive when
//! registered, a zero-delay timer otherwise. At most one drain is armed
//! at a time, because arming happens only when the queue is empty and no
//! task frame is active.

use crate::engine;
use crate::error::CaughtError;
use crate::patch;
use crate::task::Task;
use crate::tracing_compat::{debug, trace};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

/// A host primitive that runs a thunk after the current turn.
pub type TriggerFn = Rc<dyn Fn(Box<dyn FnOnce()>)>;

thread_local! {
    static QUEUE: RefCell<VecDeque<Task>> = RefCell::new(VecDeque::new());
    static DRAINING: Cell<bool> = const { Cell::new(false) };
    static NATIVE_MICROTASK: RefCell<Option<TriggerFn>> = RefCell::new(None);
    static NATIVE_TIMER: RefCell<Option<TriggerFn>> = RefCell::new(None);
}

/// Registers the host's deferred-execution primitive (the preferred drain
/// trigger). Typically called by the promise patch with the original,
/// unpatched resolution hook.
pub(crate) fn set_native_microtask(trigger: TriggerFn) {
    NATIVE_MICROTASK.with(|slot| *slot.borrow_mut() = Some(trigger));
}

/// Registers the host's zero-delay timer primitive (the fallback trigger).
pub(crate) fn set_native_timer(trigger: TriggerFn) {
    NATIVE_TIMER.with(|slot| *slot.borrow_mut() = Some(trigger));
}

/// Enqueues a microtask, arming the drain trigger when nothing else will
/// drain it (no active task frame and an empty queue).
pub(crate) fn schedule_micro_task(task: Option<Task>) {
    let must_arm =
        engine::nested_task_frames() == 0 && QUEUE.with(|queue| queue.borrow().is_empty());
    if must_arm {
        arm_drain();
    }
    if let Some(task) = task {
        trace!(task = %task.id(), "microtask enqueued");
        QUEUE.with(|queue| queue.borrow_mut().push_back(task));
    }
}

fn arm_drain() {
    let trigger = NATIVE_MICROTASK
        .with(|slot| slot.borrow().clone())
        .or_else(|| NATIVE_TIMER.with(|slot| slot.borrow().clone()));
    let Some(trigger) = trigger else {
        panic!(
            "can not arm the microtask drain: no deferred-execution primitive or zero-delay \
             timer is registered (see PrivateApi::set_native_microtask)"
        );
    };
    debug!("arming microtask drain");
    trigger(Box::new(drain_micro_task_queue));
}

struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|flag| flag.set(false));
    }
}

/// Drains the queue to exhaustion in FIFO order.
///
/// Re-entrant calls are no-ops. Each outer iteration swaps the queue for
/// a fresh one, so microtasks enqueued during the drain run in order in a
/// later iteration. Errors escaping a task are routed to the
/// `on_unhandled_error` hook; the drain always continues.
pub fn drain_micro_task_queue() {
    if DRAINING.with(Cell::get) {
        return;
    }
    DRAINING.with(|flag| flag.set(true));
    let _guard = DrainGuard;

    loop {
        let batch = QUEUE.with(|queue| std::mem::take(&mut *queue.borrow_mut()));
        if batch.is_empty() {
            break;
        }
        trace!(count = batch.len(), "draining microtask batch");
        for task in batch {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let zone = task.zone().unwrap_or_else(|| {
                    panic!("microtask '{}' has no owning zone", task.source())
                });
                zone.run_task(&task);
            }));
            if let Err(payload) = outcome {
                let zone_name = task
                    .zone()
                    .map_or_else(|| "<none>".to_string(), |zone| zone.name().to_string());
                let error =
                    CaughtError::new(payload, zone_name).with_task_source(task.source());
                patch::dispatch_unhandled_error(&error);
            }
        }
    }
    patch::notify_microtask_drain_done();
}
