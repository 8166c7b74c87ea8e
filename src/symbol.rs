//! Symbol minting and the host original-API stash.
//!
//! Patches replace public host APIs, but the engine (and other patches)
//! still need the *original* implementations. The convention is a minted
//! namespaced key per original: [`zone_symbol`] maps a plain name to its
//! `__zone_symbol__`-prefixed form, and the thread-local stash maps minted
//! keys to opaque handles. Nothing in the public patching surface can
//! disturb a stashed handle.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Namespace prefix applied to every minted symbol.
pub const SYMBOL_PREFIX: &str = "__zone_symbol__";

thread_local! {
    static STASH: RefCell<HashMap<String, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Mints the namespaced symbol for `name`.
#[must_use]
pub fn zone_symbol(name: &str) -> String {
    let mut symbol = String::with_capacity(SYMBOL_PREFIX.len() + name.len());
    symbol.push_str(SYMBOL_PREFIX);
    symbol.push_str(name);
    symbol
}

/// Stashes an original host handle under the minted symbol for `name`.
///
/// Re-stashing the same name replaces the handle; patches stash originals
/// once, before installing their replacements.
pub fn stash_original(name: &str, value: Rc<dyn Any>) {
    STASH.with(|stash| {
        stash.borrow_mut().insert(zone_symbol(name), value);
    });
}

/// Fetches the original host handle stashed for `name`, if any.
#[must_use]
pub fn original(name: &str) -> Option<Rc<dyn Any>> {
    STASH.with(|stash| stash.borrow().get(&zone_symbol(name)).cloned())
}

/// Reads a boolean host flag stashed for `name`.
///
/// Returns `None` when the flag is absent or stashed with a non-boolean
/// handle.
#[must_use]
pub fn flag(name: &str) -> Option<bool> {
    original(name).and_then(|value| value.downcast_ref::<bool>().copied())
}
