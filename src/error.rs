//! Caught-error plumbing for panic isolation.
//!
//! User code running inside a zone signals failure the way all Rust user
//! code does: by panicking. The engine isolates those panics at documented
//! boundaries (`run_guarded`, `run_task`, the microtask drain) and routes
//! them through the `handle_error` hook chain as [`CaughtError`] values.
//! The chain's boolean verdict decides whether the original payload is
//! re-raised or swallowed.
//!
//! Invariant violations inside the engine itself (illegal state
//! transitions, negative task counts, wrong-zone execution) are not
//! representable as values; they panic immediately with a descriptive
//! message.

use core::fmt;
use std::any::Any;

/// Payload type produced by `std::panic::catch_unwind`.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// Best-effort extraction of a human-readable message from a panic payload.
///
/// Recognizes the two payload shapes the standard panic machinery produces
/// (`&str` and `String`); anything else reports an opaque payload.
#[must_use]
pub fn panic_message(payload: &PanicPayload) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// An error captured at a zone boundary.
///
/// Carries the original panic payload (so a propagating verdict re-raises
/// exactly what was thrown) together with the context the hook chain needs:
/// the extracted message, the name of the zone whose boundary caught the
/// error, and the source string of the task being run, when applicable.
pub struct CaughtError {
    payload: PanicPayload,
    message: String,
    zone_name: String,
    task_source: Option<String>,
}

impl CaughtError {
    /// Captures a panic payload at the boundary of the named zone.
    #[must_use]
    pub fn new(payload: PanicPayload, zone_name: impl Into<String>) -> Self {
        let message = panic_message(&payload);
        Self {
            payload,
            message,
            zone_name: zone_name.into(),
            task_source: None,
        }
    }

    /// Attaches the source string of the task that was executing.
    #[must_use]
    pub fn with_task_source(mut self, source: impl Into<String>) -> Self {
        self.task_source = Some(source.into());
        self
    }

    /// The extracted message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The name of the zone whose boundary caught this error.
    #[must_use]
    pub fn zone_name(&self) -> &str {
        &self.zone_name
    }

    /// The source of the task that was executing, if any.
    #[must_use]
    pub fn task_source(&self) -> Option<&str> {
        self.task_source.as_deref()
    }

    /// Downcasts the payload to a concrete type, if it matches.
    #[must_use]
    pub fn payload_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Consumes the error and returns the original panic payload.
    #[must_use]
    pub fn into_payload(self) -> PanicPayload {
        self.payload
    }

    /// Re-raises the original payload.
    pub fn rethrow(self) -> ! {
        std::panic::resume_unwind(self.payload)
    }
}

impl fmt::Debug for CaughtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaughtError")
            .field("message", &self.message)
            .field("zone", &self.zone_name)
            .field("task_source", &self.task_source)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CaughtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uncaught error in zone '{}'", self.zone_name)?;
        if let Some(source) = &self.task_source {
            write!(f, " while running '{source}'")?;
        }
        write!(f, ": {}", self.message)
    }
}
