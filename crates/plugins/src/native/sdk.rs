//! Plugin-author side of the native ABI.
//!
//! A plugin crate (`crate-type = ["cdylib"]`) implements [`NativeValidator`]
//! and exports it:
//!
//! ```ignore
//! use toolwarden_plugins::native::NativeValidator;
//! use toolwarden_plugins::{PluginInfo, PluginRequest, PluginResponse};
//!
//! #[derive(Default)]
//! struct NoForcePush;
//!
//! impl NativeValidator for NoForcePush {
//!     fn info(&self) -> PluginInfo {
//!         PluginInfo { name: "no-force-push".into(), version: "1.0.0".into(), ..Default::default() }
//!     }
//!
//!     fn validate(&self, request: &PluginRequest) -> Option<PluginResponse> {
//!         let command = request.command.as_deref().unwrap_or_default();
//!         Some(if command.contains("--force") {
//!             PluginResponse::block("force push is disabled")
//!         } else {
//!             PluginResponse::pass()
//!         })
//!     }
//! }
//!
//! toolwarden_plugins::export_plugin!(NoForcePush, NoForcePush);
//! ```

use serde::Serialize;
use std::any::Any;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;

use super::abi::Envelope;
use crate::types::{PluginInfo, PluginRequest, PluginResponse};

/// The interface a native plugin implements. Calls carry no context: the host
/// checks cancellation before calling and the call runs to completion.
pub trait NativeValidator: Send + Sync + 'static {
    fn info(&self) -> PluginInfo;

    /// `None` is reported to the host as a missing response.
    fn validate(&self, request: &PluginRequest) -> Option<PluginResponse>;
}

/// Build a static [`PluginVTable`](crate::native::PluginVTable) named `$vtable`
/// for `$plugin`, constructed lazily by `$ctor`.
#[macro_export]
macro_rules! declare_plugin_vtable {
    ($vtable:ident, $plugin:ty, $ctor:expr) => {
        static $vtable: $crate::native::PluginVTable = {
            fn instance() -> &'static $plugin {
                static INSTANCE: ::std::sync::OnceLock<$plugin> = ::std::sync::OnceLock::new();
                INSTANCE.get_or_init(|| $ctor)
            }

            extern "C" fn info() -> *mut ::std::os::raw::c_char {
                $crate::native::sdk::info_json(instance)
            }

            unsafe extern "C" fn validate(
                request: *const ::std::os::raw::c_char,
            ) -> *mut ::std::os::raw::c_char {
                unsafe { $crate::native::sdk::validate_json(instance, request) }
            }

            $crate::native::PluginVTable {
                abi_version: $crate::native::ABI_VERSION,
                info,
                validate,
                free_string: $crate::native::sdk::free_string,
            }
        };
    };
}

/// Declare the vtable and export the well-known entry symbol.
#[macro_export]
macro_rules! export_plugin {
    ($plugin:ty, $ctor:expr) => {
        $crate::declare_plugin_vtable!(TOOLWARDEN_PLUGIN_VTABLE, $plugin, $ctor);

        #[unsafe(no_mangle)]
        pub extern "C" fn toolwarden_plugin_entry() -> *const $crate::native::PluginVTable {
            &TOOLWARDEN_PLUGIN_VTABLE
        }
    };
}

#[doc(hidden)]
pub fn info_json<T: NativeValidator>(instance: fn() -> &'static T) -> *mut c_char {
    guarded(|| Ok(Some(instance().info())))
}

/// # Safety
///
/// `request` must be null or point to a NUL-terminated string valid for the call.
#[doc(hidden)]
pub unsafe fn validate_json<T: NativeValidator>(
    instance: fn() -> &'static T,
    request: *const c_char,
) -> *mut c_char {
    guarded(|| {
        if request.is_null() {
            return Err("null request".to_string());
        }
        let raw = unsafe { CStr::from_ptr(request) };
        let request: PluginRequest = serde_json::from_slice(raw.to_bytes())
            .map_err(|e| format!("invalid request: {e}"))?;
        Ok(instance().validate(&request))
    })
}

/// Release a string returned by `info` or `validate`.
///
/// # Safety
///
/// `value` must be null or a pointer previously returned by this library.
pub unsafe extern "C" fn free_string(value: *mut c_char) {
    if !value.is_null() {
        drop(unsafe { CString::from_raw(value) });
    }
}

fn guarded<R, F>(f: F) -> *mut c_char
where
    R: Serialize,
    F: FnOnce() -> Result<Option<R>, String>,
{
    let envelope = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(Some(value))) => Envelope::Ok(value),
        Ok(Ok(None)) => return ptr::null_mut(),
        Ok(Err(message)) => Envelope::Error(message),
        Err(payload) => Envelope::Panic(panic_message(payload.as_ref())),
    };
    serde_json::to_string(&envelope)
        .ok()
        .and_then(|json| CString::new(json).ok())
        .map_or(ptr::null_mut(), CString::into_raw)
}

/// Text of a panic payload, if it carried any.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
