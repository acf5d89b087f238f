//! Security hardening for toolwarden plugin loading.
//!
//! Provides:
//! - **Path validation**: plugin files must live under allowed plugin directories
//! - **Transport policy**: plaintext RPC only for local addresses unless opted in
//! - **Sanitization**: strip filesystem paths from crash messages before surfacing them

pub mod address;
pub mod path;
pub mod sanitize;

pub use address::{
    TlsPolicyError, TransportSecurity, host_of, is_local_address, resolve_transport_security,
    validate_tls_files,
};
pub use path::{FORBIDDEN_CHARS, PathValidationError, PluginPathPolicy};
pub use sanitize::{MAX_SANITIZED_LEN, sanitize_message};
