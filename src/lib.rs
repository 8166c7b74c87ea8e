//! Zonal: hierarchical execution zones for single-threaded event-loop hosts.
//!
//! # Overview
//!
//! A *zone* is an ambient execution context that persists across asynchronous
//! boundaries. Zones form a tree; at any moment exactly one zone is *current*,
//! and every callback scheduled through a zone re-enters that zone when it
//! later runs. Zone specs may intercept forking, invocation, error handling,
//! and the scheduling, execution and cancellation of tasks, so ambient
//! concerns (error capture, profiling, change detection, test
//! synchronization) can be layered on without touching business code.
//!
//! # Core Guarantees
//!
//! - **Context follows work**: a task always runs in the zone that scheduled
//!   it, no matter which host turn it executes on
//! - **O(1) hook dispatch**: each zone's delegate resolves, at construction,
//!   the nearest ancestor that defines each hook
//! - **Strict task lifecycle**: six states with fatal enforcement of legal
//!   transitions
//! - **Counted task sets**: zones observing `has_task` see every 0↔1
//!   empty/non-empty crossing of their subtree's task counts, synchronously
//! - **Microtasks before the host**: the microtask queue drains in FIFO order
//!   on the trailing edge of the outermost task invocation, before control
//!   returns to the host event loop
//!
//! # Module Structure
//!
//! - [`types`]: Core vocabulary (task kinds, states, counters, identifiers)
//! - [`error`]: Caught-error plumbing for panic isolation
//! - [`config`]: Host flag configuration from the environment
//! - [`symbol`]: Symbol minting and the host original-API stash
//! - [`spec`]: Zone specs and hook types
//! - [`delegate`]: The per-zone hook-dispatch delegate chain
//! - [`task`]: Task records and the task state machine
//! - [`zone`]: The zone tree and its public API
//! - [`engine`]: Thread-local engine state (frame stack, current task, root)
//! - [`microtask`]: The microtask queue and its drain
//! - [`patch`]: Host-API patch registry and the private patch API
//! - [`inspect`]: Serializable diagnostic snapshots
//!
//! # Example
//!
//! ```
//! use zonal::zone::Zone;
//! use zonal::spec::ZoneSpec;
//!
//! let zone = Zone::root().fork(ZoneSpec::new("request"));
//! let answer = zone.run(|| {
//!     assert_eq!(Zone::current().name(), "request");
//!     42
//! });
//! assert_eq!(answer, 42);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod delegate;
pub mod engine;
pub mod error;
pub mod inspect;
pub mod microtask;
pub mod patch;
pub mod spec;
pub mod symbol;
pub mod task;
#[cfg(feature = "tracing-integration")]
pub mod test_utils;
pub mod tracing_compat;
pub mod types;
pub mod zone;

pub use error::CaughtError;
pub use patch::{assert_zone_patched, load_patch, PrivateApi};
pub use spec::ZoneSpec;
pub use symbol::zone_symbol;
pub use task::{Task, TaskData};
pub use types::{HasTaskState, TaskKind, TaskStatus};
pub use zone::Zone;
