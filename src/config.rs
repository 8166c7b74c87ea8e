//! Host flag configuration.
//!
//! The engine consults two flag sources, in order:
//!
//! 1. the symbol stash — a bootstrap shim or patch can set a flag for the
//!    current thread with `symbol::stash_original(name, Rc::new(true))`;
//! 2. the process environment — `ZONAL_DISABLE_<NAME>` and
//!    `ZONAL_IGNORE_CONSOLE_ERROR_UNCAUGHT`, parsed strictly.
//!
//! A malformed environment value is reported once per lookup at warn level
//! and treated as unset; flags never abort the engine.

use crate::symbol;
use crate::tracing_compat::warn;

/// Environment variable prefix for per-patch disable flags.
pub const DISABLE_ENV_PREFIX: &str = "ZONAL_DISABLE_";

/// Environment variable for suppressing uncaught-error console output.
pub const IGNORE_CONSOLE_ERROR_ENV: &str = "ZONAL_IGNORE_CONSOLE_ERROR_UNCAUGHT";

/// Stash flag name for suppressing uncaught-error console output.
pub const IGNORE_CONSOLE_ERROR_FLAG: &str = "ignoreConsoleErrorUncaughtError";

/// Error raised for a malformed flag value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The value was not a recognized boolean literal.
    #[error("invalid boolean '{value}' for {variable}: expected 0/1/true/false")]
    InvalidBool {
        /// The environment variable that held the value.
        variable: String,
        /// The rejected value.
        value: String,
    },
}

/// Parses a strict boolean environment variable.
///
/// Accepts `0`/`1`/`true`/`false` (ASCII case-insensitive). Returns
/// `Ok(None)` when the variable is unset or empty.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBool`] for any other value.
pub fn env_flag(variable: &str) -> Result<Option<bool>, ConfigError> {
    let Ok(raw) = std::env::var(variable) else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(Some(true)),
        "0" | "false" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidBool {
            variable: variable.to_string(),
            value: raw,
        }),
    }
}

fn env_flag_lenient(variable: &str) -> Option<bool> {
    match env_flag(variable) {
        Ok(value) => value,
        Err(error) => {
            warn!(%error, "ignoring malformed flag");
            None
        }
    }
}

/// Environment variable name for disabling the named patch.
#[must_use]
pub fn disable_variable(patch_name: &str) -> String {
    let mut variable = String::with_capacity(DISABLE_ENV_PREFIX.len() + patch_name.len());
    variable.push_str(DISABLE_ENV_PREFIX);
    for ch in patch_name.chars() {
        if ch.is_ascii_alphanumeric() {
            variable.push(ch.to_ascii_uppercase());
        } else {
            variable.push('_');
        }
    }
    variable
}

/// Returns true if the named patch is disabled for this thread.
///
/// Consults the stash flag `disable_<name>` first, then the environment.
#[must_use]
pub fn patch_disabled(patch_name: &str) -> bool {
    if let Some(value) = symbol::flag(&format!("disable_{patch_name}")) {
        return value;
    }
    env_flag_lenient(&disable_variable(patch_name)).unwrap_or(false)
}

/// Returns true if uncaught-error console output is suppressed.
#[must_use]
pub fn ignore_console_error_uncaught() -> bool {
    if let Some(value) = symbol::flag(IGNORE_CONSOLE_ERROR_FLAG) {
        return value;
    }
    env_flag_lenient(IGNORE_CONSOLE_ERROR_ENV).unwrap_or(false)
}
