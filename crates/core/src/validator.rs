//! Validator trait — the uniform shape of every check.
//!
//! Built-in checks, the rule engine adapter, and the plugin registry all
//! implement [`Validator`], so the dispatcher never needs to know which
//! kind of check it is running.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::CallContext;
use crate::error::ValidatorError;
use crate::event::EventContext;
use crate::result::ValidationResult;

/// Scheduling class of a validator. Only affects concurrency, never the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Pure in-memory logic (pattern matching, parsing).
    Cpu,
    /// Subprocess or network work (plugins, external linters).
    Io,
    /// Invokes git. Never run concurrently with another git check.
    Git,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Cpu => "cpu",
            Category::Io => "io",
            Category::Git => "git",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Validator: Send + Sync {
    /// Stable identifier, e.g. `git.push` or `plugins`.
    fn name(&self) -> &str;

    fn category(&self) -> Category;

    /// Check one event. `Err` means the check itself failed to run.
    async fn validate(
        &self,
        cx: &CallContext,
        event: &EventContext,
    ) -> Result<ValidationResult, ValidatorError>;

    /// Release resources. Called once at shutdown.
    async fn close(&self) -> Result<(), ValidatorError> {
        Ok(())
    }
}
