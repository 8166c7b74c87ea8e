//! Task lifecycle: scheduling, execution, cancellation, the periodic and
//! event re-arming paths, and counter-driven `has_task` notification.

mod common;

use common::*;
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use zonal::spec::ZoneSpec;
use zonal::types::{HasTaskState, TaskKind, TaskStatus};
use zonal::zone::Zone;
use zonal::{Task, TaskData};

fn noop_schedule() -> Option<Box<dyn Fn(&Task)>> {
    Some(Box::new(|_task| {}))
}

fn noop_cancel() -> Option<Box<dyn Fn(&Task)>> {
    Some(Box::new(|_task| {}))
}

/// Forks a zone whose `on_has_task` hook records every counter crossing.
fn counting_zone(name: &str) -> (Zone, Rc<RefCell<Vec<HasTaskState>>>) {
    let calls: Rc<RefCell<Vec<HasTaskState>>> = Rc::new(RefCell::new(Vec::new()));
    let hook_calls = Rc::clone(&calls);
    let zone = Zone::root().fork(ZoneSpec::new(name).on_has_task(
        move |_delegate, _current, _target, state| {
            hook_calls.borrow_mut().push(*state);
        },
    ));
    (zone, calls)
}

#[test]
fn has_task_observes_schedule_and_cancel() {
    init_test_logging();
    let (zone, calls) = counting_zone("observer");
    let task = zone.schedule_macro_task("t", || {}, None, noop_schedule(), noop_cancel());
    zone.cancel_task(&task);

    let calls = calls.borrow();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].macro_task);
    assert!(!calls[0].micro_task);
    assert!(!calls[0].event_task);
    assert_eq!(calls[0].change, TaskKind::MacroTask);
    assert!(!calls[1].macro_task);
    assert_eq!(calls[1].change, TaskKind::MacroTask);
}

#[test]
fn has_task_fires_before_the_scheduling_call_returns() {
    init_test_logging();
    let fired_during_schedule = Rc::new(Cell::new(false));
    let observed = Rc::clone(&fired_during_schedule);
    let zone = Zone::root().fork(ZoneSpec::new("sync-notify").on_has_task(
        move |_delegate, _current, _target, state| {
            if state.macro_task {
                observed.set(true);
            }
        },
    ));
    let task = zone.schedule_macro_task("t", || {}, None, noop_schedule(), noop_cancel());
    assert!(
        fired_during_schedule.get(),
        "has_task must fire synchronously at the 0->1 crossing"
    );
    zone.cancel_task(&task);
}

#[test]
fn schedule_cancel_round_trip_resets_the_task() {
    init_test_logging();
    let (zone, calls) = counting_zone("round-trip");
    let task = zone.schedule_macro_task("t", || {}, None, noop_schedule(), noop_cancel());
    assert_eq!(task.state(), TaskStatus::Scheduled);
    zone.cancel_task(&task);
    assert_eq!(task.state(), TaskStatus::NotScheduled);
    assert_eq!(task.run_count(), 0);
    // counters net zero: one became-non-empty, one became-empty
    assert_eq!(calls.borrow().len(), 2);
}

#[test]
fn one_shot_macro_task_completes_back_to_not_scheduled() {
    init_test_logging();
    let (zone, calls) = counting_zone("one-shot");
    let ran = Rc::new(Cell::new(0));
    let counter = Rc::clone(&ran);
    let task = zone.schedule_macro_task(
        "timer",
        move || {
            counter.set(counter.get() + 1);
        },
        None,
        noop_schedule(),
        noop_cancel(),
    );
    Task::invoke_task(&task);

    assert_eq!(ran.get(), 1);
    assert_eq!(task.state(), TaskStatus::NotScheduled);
    assert_eq!(task.run_count(), 0);
    let calls = calls.borrow();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].macro_task);
    assert!(!calls[1].macro_task);
}

#[test]
fn periodic_macro_task_re_arms_after_each_run() {
    init_test_logging();
    let (zone, calls) = counting_zone("interval");
    let ran = Rc::new(Cell::new(0));
    let counter = Rc::clone(&ran);
    let data = TaskData {
        is_periodic: true,
        ..TaskData::default()
    };
    let task = zone.schedule_macro_task(
        "interval",
        move || {
            counter.set(counter.get() + 1);
        },
        Some(data),
        noop_schedule(),
        noop_cancel(),
    );

    Task::invoke_task(&task);
    assert_eq!(task.state(), TaskStatus::Scheduled);
    assert!(task.run_count() >= 1);
    Task::invoke_task(&task);
    assert_eq!(ran.get(), 2);
    assert_eq!(task.state(), TaskStatus::Scheduled);
    // still one outstanding macro task: no became-empty event yet
    assert_eq!(calls.borrow().len(), 1);

    zone.cancel_task(&task);
    assert_eq!(task.state(), TaskStatus::NotScheduled);
    assert_eq!(task.run_count(), 0);
    assert_eq!(calls.borrow().len(), 2);
}

#[test]
fn event_task_returns_to_scheduled_between_fires() {
    init_test_logging();
    let zone = Zone::root().fork(ZoneSpec::new("listener"));
    let fires = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fires);
    let task = zone.schedule_event_task(
        "click",
        move || {
            counter.set(counter.get() + 1);
        },
        None,
        noop_schedule(),
        noop_cancel(),
    );

    // closure shape
    let entry = task.invoke_fn();
    entry();
    entry();
    assert_eq!(fires.get(), 2);
    assert_eq!(task.state(), TaskStatus::Scheduled);
    zone.cancel_task(&task);
}

#[test]
fn event_task_static_invoke_shape() {
    init_test_logging();
    let zone = Zone::root().fork(ZoneSpec::new("listener"));
    let fires = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fires);
    let data = TaskData {
        use_static_invoke: true,
        ..TaskData::default()
    };
    let task = zone.schedule_event_task(
        "click",
        move || {
            counter.set(counter.get() + 1);
        },
        Some(data),
        noop_schedule(),
        noop_cancel(),
    );

    // the host passes the task to the shared entry point itself
    Task::invoke_task(&task);
    Task::invoke_task(&task);
    assert_eq!(fires.get(), 2);
    assert_eq!(task.state(), TaskStatus::Scheduled);
    zone.cancel_task(&task);
}

#[test]
fn re_entrant_event_task_runs_under_a_single_running_state() {
    init_test_logging();
    let zone = Zone::root().fork(ZoneSpec::new("reentrant"));
    let slot: Rc<RefCell<Option<Task>>> = Rc::new(RefCell::new(None));
    let depth = Rc::new(Cell::new(0));
    let task = {
        let slot = Rc::clone(&slot);
        let depth = Rc::clone(&depth);
        zone.schedule_event_task(
            "self-dispatch",
            move || {
                depth.set(depth.get() + 1);
                if depth.get() == 1 {
                    // a listener synchronously dispatching its own event
                    let task = slot.borrow().clone().expect("task slot filled");
                    Task::invoke_task(&task);
                }
            },
            None,
            noop_schedule(),
            noop_cancel(),
        )
    };
    *slot.borrow_mut() = Some(task.clone());

    Task::invoke_task(&task);
    assert_eq!(depth.get(), 2);
    // the nested entry saw `running` and left the settling to the outer
    // frame, which re-armed the listener
    assert_eq!(task.state(), TaskStatus::Scheduled);
    zone.cancel_task(&task);
}

#[test]
fn cancelled_event_task_that_still_fires_is_ignored() {
    init_test_logging();
    let zone = Zone::root().fork(ZoneSpec::new("raced"));
    let fires = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fires);
    let task = zone.schedule_event_task(
        "click",
        move || {
            counter.set(counter.get() + 1);
        },
        None,
        noop_schedule(),
        noop_cancel(),
    );
    zone.cancel_task(&task);
    assert_eq!(task.state(), TaskStatus::NotScheduled);

    // the listener was already dispatched by the host: must be a no-op
    Task::invoke_task(&task);
    assert_eq!(fires.get(), 0);
    assert_eq!(task.state(), TaskStatus::NotScheduled);
}

#[test]
fn tasks_run_in_their_owning_zone_with_current_task_set() {
    init_test_logging();
    let zone = Zone::root().fork(ZoneSpec::new("owner"));
    let log = EventLog::new();
    let task_log = log.clone();
    let task = zone.schedule_macro_task(
        "observer",
        move || {
            task_log.push(Zone::current().name().to_string());
            let current = Zone::current_task().expect("current task must be set");
            task_log.push(current.source().to_string());
        },
        None,
        noop_schedule(),
        noop_cancel(),
    );
    assert!(Zone::current_task().is_none());
    Task::invoke_task(&task);
    assert!(Zone::current_task().is_none());
    log.assert_entries(&["owner", "observer"]);
}

#[test]
fn invoke_task_hook_wraps_task_execution() {
    init_test_logging();
    let log = EventLog::new();
    let hook_log = log.clone();
    let zone = Zone::root().fork(ZoneSpec::new("profiled").on_invoke_task(
        move |delegate, _current, target, task| {
            hook_log.push(format!("before:{}", task.source()));
            delegate.invoke_task(target, task);
            hook_log.push(format!("after:{}", task.source()));
        },
    ));
    let body_log = log.clone();
    let task = zone.schedule_macro_task(
        "timer",
        move || body_log.push("body"),
        None,
        noop_schedule(),
        noop_cancel(),
    );
    Task::invoke_task(&task);
    log.assert_entries(&["before:timer", "body", "after:timer"]);
}

#[test]
fn schedule_hook_observes_subtree_scheduling() {
    init_test_logging();
    let log = EventLog::new();
    let hook_log = log.clone();
    let parent = Zone::root().fork(ZoneSpec::new("tracker").on_schedule_task(
        move |delegate, _current, target, task| {
            hook_log.push(format!("schedule:{}:{}", target.name(), task.source()));
            delegate.schedule_task(target, task)
        },
    ));
    let child = parent.fork(ZoneSpec::new("worker"));
    let task = child.schedule_macro_task("job", || {}, None, noop_schedule(), noop_cancel());
    assert_eq!(task.state(), TaskStatus::Scheduled);
    log.assert_entries(&["schedule:worker:job"]);
    child.cancel_task(&task);
}

#[test]
fn schedule_hook_may_reject_via_cancel_schedule_request() {
    init_test_logging();
    let (observer_zone, calls) = counting_zone("quota");
    let zone = observer_zone.fork(ZoneSpec::new("limited").on_schedule_task(
        move |_delegate, _current, _target, task| {
            // refuse without passing through `unknown`
            task.cancel_schedule_request();
            task
        },
    ));
    let task = zone.schedule_macro_task("denied", || {}, None, noop_schedule(), noop_cancel());
    assert_eq!(task.state(), TaskStatus::NotScheduled);
    assert_eq!(task.run_count(), 0);
    assert!(
        calls.borrow().is_empty(),
        "a rejected scheduling must not touch counters"
    );

    // the same task can be scheduled again later
    let task = zone.parent().unwrap().schedule_task(task);
    assert_eq!(task.state(), TaskStatus::Scheduled);
    zone.parent().unwrap().cancel_task(&task);
}

#[test]
fn failing_schedule_hook_leaves_the_task_unknown_and_rethrows() {
    init_test_logging();
    let zone = Zone::root().fork(ZoneSpec::new("broken").on_schedule_task(
        |_delegate, _current, _target, _task| panic!("scheduler exploded"),
    ));
    let probe = Rc::new(RefCell::new(None::<Task>));
    let slot = Rc::clone(&probe);
    let result = catch_unwind(AssertUnwindSafe(|| {
        let task = zone.schedule_macro_task("doomed", || {}, None, noop_schedule(), noop_cancel());
        *slot.borrow_mut() = Some(task);
    }));
    assert!(result.is_err(), "the scheduling error must surface");
    assert!(probe.borrow().is_none(), "no task handle escapes");
}

#[test]
fn failing_cancel_hook_leaves_the_task_unknown_and_rethrows() {
    init_test_logging();
    let zone = Zone::root().fork(ZoneSpec::new("stuck").on_cancel_task(
        |_delegate, _current, _target, _task| panic!("cancel exploded"),
    ));
    let task = zone.schedule_macro_task("wedged", || {}, None, noop_schedule(), noop_cancel());
    let result = catch_unwind(AssertUnwindSafe(|| zone.cancel_task(&task)));
    assert!(result.is_err());
    assert_eq!(task.state(), TaskStatus::Unknown);
}

#[test]
fn cancelling_a_task_without_cancel_fn_is_fatal() {
    init_test_logging();
    let zone = Zone::root().fork(ZoneSpec::new("uncancellable"));
    let task = zone.schedule_macro_task("fire-and-forget", || {}, None, noop_schedule(), None);
    let payload = catch_unwind(AssertUnwindSafe(|| zone.cancel_task(&task)))
        .expect_err("cancel must fail");
    let message = payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_default();
    assert!(message.contains("not cancelable"), "got: {message}");
    assert_eq!(task.state(), TaskStatus::Unknown);
}

#[test]
fn scheduling_a_macro_task_without_schedule_fn_is_fatal() {
    init_test_logging();
    let zone = Zone::root().fork(ZoneSpec::new("no-schedule"));
    let payload = catch_unwind(AssertUnwindSafe(|| {
        zone.schedule_macro_task("missing", || {}, None, None, None);
    }))
    .expect_err("schedule must fail");
    let message = payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_default();
    assert!(message.contains("missing a schedule_fn"), "got: {message}");
}

#[test]
fn task_errors_route_through_handle_error() {
    init_test_logging();
    let log = EventLog::new();
    let hook_log = log.clone();
    let zone = Zone::root().fork(ZoneSpec::new("supervisor").on_handle_error(
        move |_delegate, _current, _target, error| {
            hook_log.push(format!("handled:{}", error.message()));
            false
        },
    ));
    let task = zone.schedule_macro_task(
        "failing",
        || panic!("task body failed"),
        None,
        noop_schedule(),
        noop_cancel(),
    );
    // suppressed by the hook: invoke returns normally
    Task::invoke_task(&task);
    log.assert_entries(&["handled:task body failed"]);
    assert_eq!(task.state(), TaskStatus::NotScheduled);
    assert_eq!(task.run_count(), 0);
}

#[test]
fn has_task_counts_whole_subtrees() {
    init_test_logging();
    let (parent, calls) = counting_zone("subtree");
    let child = parent.fork(ZoneSpec::new("leaf"));
    let first = child.schedule_macro_task("one", || {}, None, noop_schedule(), noop_cancel());
    let second = child.schedule_macro_task("two", || {}, None, noop_schedule(), noop_cancel());

    // the first schedule crosses 0->1 at both counting levels (leaf and
    // observer); the second schedule crosses nothing
    let crossings: Vec<bool> = calls.borrow().iter().map(|s| s.macro_task).collect();
    assert_eq!(crossings, [true, true]);

    child.cancel_task(&first);
    child.cancel_task(&second);
    let last = *calls.borrow().last().expect("missing events");
    assert!(!last.macro_task, "subtree must report empty again");
}

#[test]
fn failing_has_task_hook_is_contained() {
    init_test_logging();
    let handled = Rc::new(Cell::new(0));
    let observed = Rc::clone(&handled);
    let zone = Zone::root().fork(
        ZoneSpec::new("fragile")
            .on_has_task(|_delegate, _current, _target, _state| panic!("observer failed"))
            .on_handle_error(move |_delegate, _current, _target, _error| {
                observed.set(observed.get() + 1);
                false
            }),
    );
    // scheduling succeeds even though the observer panicked
    let task = zone.schedule_macro_task("t", || {}, None, noop_schedule(), noop_cancel());
    assert_eq!(task.state(), TaskStatus::Scheduled);
    assert_eq!(handled.get(), 1);
    zone.cancel_task(&task);
    assert_eq!(handled.get(), 2);
}
