#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub use zonal::test_utils::init_test_logging;

type Thunk = Box<dyn FnOnce()>;

/// A fake event-loop host: records the drain thunks the engine arms and
/// replays them when the "turn" ends.
pub struct FakeHost {
    microtasks: Rc<RefCell<VecDeque<Thunk>>>,
    timers: Rc<RefCell<VecDeque<Thunk>>>,
}

impl FakeHost {
    /// Installs the host primitives through a patch and returns the host
    /// handle. Call once per test (the patch registry is per-thread).
    pub fn install() -> Self {
        Self::install_with(true, true)
    }

    /// Installs only the zero-delay timer primitive, to exercise the
    /// fallback arming path.
    pub fn install_timer_only() -> Self {
        Self::install_with(false, true)
    }

    fn install_with(microtask: bool, timer: bool) -> Self {
        let microtasks: Rc<RefCell<VecDeque<Thunk>>> = Rc::new(RefCell::new(VecDeque::new()));
        let timers: Rc<RefCell<VecDeque<Thunk>>> = Rc::new(RefCell::new(VecDeque::new()));
        let micro_queue = Rc::clone(&microtasks);
        let timer_queue = Rc::clone(&timers);
        zonal::load_patch("fakeHost", move |api| {
            if microtask {
                let queue = Rc::clone(&micro_queue);
                api.set_native_microtask(Rc::new(move |thunk| {
                    queue.borrow_mut().push_back(thunk);
                }));
            }
            if timer {
                let queue = Rc::clone(&timer_queue);
                api.set_native_timer(Rc::new(move |thunk| {
                    queue.borrow_mut().push_back(thunk);
                }));
            }
            Rc::new(())
        });
        Self { microtasks, timers }
    }

    /// Number of armed (not yet replayed) microtask drain thunks.
    pub fn armed_microtasks(&self) -> usize {
        self.microtasks.borrow().len()
    }

    /// Number of armed (not yet replayed) timer thunks.
    pub fn armed_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Ends the current host turn: replays armed thunks (microtask
    /// triggers first, then timers) until none remain.
    pub fn run_turn(&self) {
        loop {
            let next = {
                let mut microtasks = self.microtasks.borrow_mut();
                match microtasks.pop_front() {
                    Some(thunk) => Some(thunk),
                    None => self.timers.borrow_mut().pop_front(),
                }
            };
            match next {
                Some(thunk) => thunk(),
                None => break,
            }
        }
    }
}

/// A log shared between test callbacks and assertions.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Rc<RefCell<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    pub fn assert_entries(&self, expected: &[&str]) {
        assert_eq!(self.entries(), expected);
    }
}
