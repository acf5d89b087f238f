//! Declarative rules — user-defined match/action policies.
//!
//! Rules let users add guardrails from TOML config without writing a
//! validator. Each rule pairs AND-combined match conditions with one action:
//!
//! ```toml
//! [[rules.rules]]
//! name = "no-force-push"
//! priority = 100
//! [rules.rules.match]
//! validator_type = "git.*"
//! command_patterns = ["--force", "-f "]
//! [rules.rules.action]
//! type = "block"
//! message = "Force push is disabled in this repository"
//! ```
//!
//! Rules are compiled once at startup, sorted by descending priority, and
//! never change afterwards.

mod engine;
mod model;
mod pattern;
mod validator;

pub use engine::{RuleEngine, validator_type_for};
pub use model::{ActionType, Rule, RuleAction, RuleMatch, validator_type_matches};
pub use pattern::{Pattern, PatternMode, PatternSet};
pub use validator::{RULES_VALIDATOR_NAME, RuleValidator};

/// Errors from rule compilation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleError {
    #[error("rule name cannot be empty")]
    EmptyName,

    #[error("duplicate rule name '{rule}'")]
    DuplicateName { rule: String },

    #[error("invalid pattern '{pattern}' in rule '{rule}': {reason}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        reason: String,
    },

    #[error("invalid {field} in rule '{rule}': {reason}")]
    InvalidField {
        rule: String,
        field: &'static str,
        reason: String,
    },
}
