//! Error types for the toolwarden domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

use crate::result::ValidationResult;

/// Why a call stopped before producing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error("unsupported plugin transport '{transport}' for plugin '{name}'")]
    UnsupportedTransport { name: String, transport: String },

    #[error("plugin '{name}' is missing required field '{field}'")]
    MissingField { name: String, field: String },

    #[error("invalid predicate for plugin '{name}': {reason}")]
    InvalidPredicate { name: String, reason: String },

    #[error("security check failed for plugin '{name}': {reason}")]
    Security { name: String, reason: String },

    #[error("invalid TLS configuration for plugin '{name}': {reason}")]
    Tls { name: String, reason: String },

    #[error("plugin '{name}' failed to load: {reason}")]
    LoadFailed { name: String, reason: String },

    #[error("plugin '{name}' exited with status {code}: {stderr}")]
    NonZeroExit {
        name: String,
        code: i32,
        stderr: String,
    },

    #[error("plugin '{name}' returned a malformed response: {reason}")]
    MalformedResponse { name: String, reason: String },

    #[error("plugin '{name}' returned no response")]
    NilResponse { name: String },

    #[error("plugin '{name}' transport failure: {reason}")]
    Transport { name: String, reason: String },

    #[error("plugin '{name}' timed out")]
    Timeout { name: String },

    #[error("plugin '{name}' call was cancelled")]
    Cancelled { name: String },

    #[error("plugin loader is closed")]
    LoaderClosed,
}

impl PluginError {
    /// Map an aborted call onto the plugin that was being invoked.
    pub fn from_call(name: &str, err: CallError) -> Self {
        match err {
            CallError::DeadlineExceeded => PluginError::Timeout { name: name.into() },
            CallError::Cancelled => PluginError::Cancelled { name: name.into() },
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PluginError::Timeout { .. })
    }
}

#[derive(Debug, Clone, Error)]
pub enum ValidatorError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("validator '{name}' timed out")]
    Timeout { name: String },

    #[error("validator '{name}' was cancelled")]
    Cancelled { name: String },

    #[error("validator '{name}' failed: {reason}")]
    Failed { name: String, reason: String },
}

impl ValidatorError {
    pub fn from_call(name: &str, err: CallError) -> Self {
        match err {
            CallError::DeadlineExceeded => ValidatorError::Timeout { name: name.into() },
            CallError::Cancelled => ValidatorError::Cancelled { name: name.into() },
        }
    }

    /// Timeouts are reported separately from plugin-reported failures.
    pub fn is_timeout(&self) -> bool {
        match self {
            ValidatorError::Timeout { .. } => true,
            ValidatorError::Plugin(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Short label used as the `kind` field in logs and result details.
    pub fn kind(&self) -> &'static str {
        if self.is_timeout() {
            return "timeout";
        }
        match self {
            ValidatorError::Cancelled { .. }
            | ValidatorError::Plugin(PluginError::Cancelled { .. }) => "cancelled",
            ValidatorError::Plugin(_) => "plugin_error",
            _ => "validator_error",
        }
    }

    /// Convert a failed validator run into a blocking result.
    ///
    /// A validator that could not produce an answer fails closed.
    pub fn into_result(self) -> ValidationResult {
        let kind = self.kind();
        let message = match &self {
            ValidatorError::Plugin(e) => format!("Plugin error: {e}"),
            other => format!("Validator error: {other}"),
        };
        ValidationResult::block(message).with_detail("error_kind", kind)
    }
}
