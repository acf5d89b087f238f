//! The C ABI between the host and a native plugin library.
//!
//! A library exports one symbol, [`ENTRY_SYMBOL`], returning a pointer to a
//! static [`PluginVTable`]. Every value crosses the boundary as a
//! NUL-terminated JSON string owned by the library and released with
//! `free_string`. Returned strings are [`Envelope`]s; a null pointer means
//! "no response".

use serde::{Deserialize, Serialize};
use std::os::raw::c_char;

/// Bumped whenever the vtable layout or envelope format changes.
pub const ABI_VERSION: u32 = 1;

/// Exported entry point name, NUL-terminated for symbol lookup.
pub const ENTRY_SYMBOL: &[u8] = b"toolwarden_plugin_entry\0";

#[repr(C)]
pub struct PluginVTable {
    pub abi_version: u32,
    /// Returns an `Envelope<PluginInfo>`.
    pub info: extern "C" fn() -> *mut c_char,
    /// Takes a `PluginRequest`, returns an `Envelope<PluginResponse>` or null.
    pub validate: unsafe extern "C" fn(request: *const c_char) -> *mut c_char,
    pub free_string: unsafe extern "C" fn(value: *mut c_char),
}

pub type EntryFn = unsafe extern "C" fn() -> *const PluginVTable;

/// Outcome of one call inside the library.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Envelope<T> {
    Ok(T),
    /// The call panicked; the payload message.
    Panic(String),
    /// The library could not service the call (e.g. undecodable request).
    Error(String),
}
