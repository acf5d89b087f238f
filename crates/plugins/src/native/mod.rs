//! Native transport — plugins loaded into this process as dynamic libraries.
//!
//! Loading validates the path, opens the library, resolves the entry
//! symbol, and checks the ABI version. An accepted library is never unloaded:
//! its code must outlive every vtable pointer handed out, so the handle is
//! leaked. A library rejected before that point is closed again.
//!
//! Calls are synchronous. Cancellation is checked before each call; a panic
//! inside the library is caught on its side of the boundary (and again on
//! ours) and reported as a blocking response naming the plugin.

mod abi;
pub mod sdk;

pub use abi::{ABI_VERSION, ENTRY_SYMBOL, EntryFn, Envelope, PluginVTable};
pub use sdk::NativeValidator;

use async_trait::async_trait;
use libloading::Library;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use toolwarden_config::PluginConfig;
use toolwarden_core::{CallContext, PluginError};
use toolwarden_security::{PluginPathPolicy, sanitize_message};
use tracing::{debug, error};

use crate::plugin::{Plugin, PluginLoader, required_path};
use crate::types::{PluginInfo, PluginRequest, PluginResponse, Transport};

/// Shared-library suffixes accepted by the native loader.
pub const LIBRARY_EXTENSIONS: &[&str] = &[".so", ".dylib", ".dll"];

/// Error code on responses synthesized from a plugin crash.
pub const CRASH_ERROR_CODE: &str = "PLUGIN_CRASH";

pub struct NativeLoader {
    policy: PluginPathPolicy,
}

impl NativeLoader {
    pub fn new(policy: PluginPathPolicy) -> Self {
        Self {
            policy: policy.with_extensions(LIBRARY_EXTENSIONS),
        }
    }
}

#[async_trait]
impl PluginLoader for NativeLoader {
    fn transport(&self) -> Transport {
        Transport::Native
    }

    async fn load(
        &self,
        cx: &CallContext,
        declaration: &PluginConfig,
    ) -> Result<Arc<dyn Plugin>, PluginError> {
        let name = declaration.name.as_str();
        cx.check().map_err(|e| PluginError::from_call(name, e))?;

        let raw_path = required_path(declaration)?;
        let path = self
            .policy
            .validate(raw_path)
            .map_err(|e| PluginError::Security {
                name: name.into(),
                reason: e.to_string(),
            })?;

        let load_failed = |reason: String| PluginError::LoadFailed {
            name: name.into(),
            reason,
        };

        // SAFETY: the path passed validation; running the library's
        // initializers is inherent to loading a native plugin.
        let library = unsafe { Library::new(&path) }
            .map_err(|e| load_failed(format!("failed to open library: {e}")))?;
        let vtable = into_vtable(library).map_err(load_failed)?;

        let plugin = NativePlugin::from_vtable(name, vtable)?.with_config(declaration.config.clone());
        debug!(
            plugin = %name,
            path = %path.display(),
            version = %plugin.info.version,
            "Native plugin loaded"
        );
        Ok(Arc::new(plugin))
    }
}

/// Resolve the entry point and keep `library` loaded for the rest of the
/// process. On error the library is dropped, which unloads it.
fn into_vtable(library: Library) -> Result<&'static PluginVTable, String> {
    // SAFETY: the symbol type matches the exported entry point declared by the SDK.
    let entry: EntryFn = unsafe { library.get::<EntryFn>(ENTRY_SYMBOL) }
        .map(|symbol| *symbol)
        .map_err(|e| format!("missing entry symbol: {e}"))?;

    // SAFETY: the entry point takes no arguments and returns a static vtable.
    let vtable_ptr = unsafe { entry() };
    if vtable_ptr.is_null() {
        return Err("entry point returned a null vtable".into());
    }
    // SAFETY: non-null and backed by `library`, which is still loaded.
    let abi_version = unsafe { (*vtable_ptr).abi_version };
    if abi_version != ABI_VERSION {
        return Err(format!(
            "ABI version {abi_version} is not supported (expected {ABI_VERSION})"
        ));
    }

    std::mem::forget(library);
    // SAFETY: the library backing the vtable is never unloaded.
    Ok(unsafe { &*vtable_ptr })
}

enum Outcome<T> {
    Value(T),
    Crashed(String),
}

pub struct NativePlugin {
    name: String,
    vtable: &'static PluginVTable,
    config: HashMap<String, serde_json::Value>,
    info: PluginInfo,
}

impl std::fmt::Debug for NativePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativePlugin")
            .field("name", &self.name)
            .field("info", &self.info)
            .finish()
    }
}

impl NativePlugin {
    /// Wrap a vtable, checking its ABI version and fetching its info.
    pub fn from_vtable(name: &str, vtable: &'static PluginVTable) -> Result<Self, PluginError> {
        if vtable.abi_version != ABI_VERSION {
            return Err(PluginError::LoadFailed {
                name: name.into(),
                reason: format!(
                    "ABI version {} is not supported (expected {ABI_VERSION})",
                    vtable.abi_version
                ),
            });
        }

        let mut plugin = Self {
            name: name.to_string(),
            vtable,
            config: Default::default(),
            info: PluginInfo::default(),
        };
        plugin.info = match plugin.invoke::<PluginInfo>(|| (vtable.info)())? {
            Outcome::Value(info) => info,
            Outcome::Crashed(message) => {
                return Err(PluginError::LoadFailed {
                    name: name.into(),
                    reason: format!("info crashed: {message}"),
                });
            }
        };
        Ok(plugin)
    }

    pub fn with_config(
        mut self,
        config: HashMap<String, serde_json::Value>,
    ) -> Self {
        self.config = config;
        self
    }

    /// Run one call and decode its envelope. Panics on either side become `Crashed`.
    fn invoke<T: DeserializeOwned>(
        &self,
        call: impl FnOnce() -> *mut c_char,
    ) -> Result<Outcome<T>, PluginError> {
        let raw = catch_unwind(AssertUnwindSafe(|| {
            let ptr = call();
            if ptr.is_null() {
                return None;
            }
            // SAFETY: non-null strings from the library are NUL-terminated and
            // stay valid until handed back to `free_string`.
            let text = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
            unsafe { (self.vtable.free_string)(ptr) };
            Some(text)
        }));

        let text = match raw {
            Ok(Some(text)) => text,
            Ok(None) => {
                return Err(PluginError::NilResponse {
                    name: self.name.clone(),
                });
            }
            Err(payload) => {
                return Ok(Outcome::Crashed(sdk::panic_message(payload.as_ref())));
            }
        };

        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|e| PluginError::MalformedResponse {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        match envelope {
            Envelope::Ok(value) => Ok(Outcome::Value(value)),
            Envelope::Panic(message) => Ok(Outcome::Crashed(message)),
            Envelope::Error(reason) => Err(PluginError::MalformedResponse {
                name: self.name.clone(),
                reason,
            }),
        }
    }

    fn crash_response(&self, message: &str) -> PluginResponse {
        let mut response = PluginResponse::block(format!(
            "Plugin '{}' crashed: {}",
            self.name,
            sanitize_message(message)
        ));
        response.error_code = CRASH_ERROR_CODE.into();
        response
    }
}

#[async_trait]
impl Plugin for NativePlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    async fn validate(
        &self,
        cx: &CallContext,
        request: PluginRequest,
    ) -> Result<PluginResponse, PluginError> {
        cx.check()
            .map_err(|e| PluginError::from_call(&self.name, e))?;

        let request = request.with_default_config(&self.config);
        let payload = serde_json::to_string(&request)
            .ok()
            .and_then(|json| CString::new(json).ok())
            .ok_or_else(|| PluginError::Transport {
                name: self.name.clone(),
                reason: "failed to encode request".into(),
            })?;

        let validate = self.vtable.validate;
        // SAFETY: `payload` is a valid NUL-terminated string for the duration of the call.
        match self.invoke::<PluginResponse>(|| unsafe { validate(payload.as_ptr()) })? {
            Outcome::Value(response) => Ok(response),
            Outcome::Crashed(message) => {
                error!(plugin = %self.name, kind = "plugin_crash", "Native plugin panicked");
                Ok(self.crash_response(&message))
            }
        }
    }
}
