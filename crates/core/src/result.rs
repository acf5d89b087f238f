//! Validation results and the aggregation that reduces them to a verdict.
//!
//! Each validator yields a [`ValidationResult`]. One dispatch yields exactly
//! one [`Verdict`], produced by [`aggregate`]:
//!
//! 1. the first blocking result (in registration order) wins, with every
//!    warning appended under "Warnings from other checks";
//! 2. otherwise all warnings merge into one, newline-joined;
//! 3. otherwise the action passes.
//!
//! A blocking finding is never masked by warnings, and warnings are never
//! dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Header of the section listing warnings alongside a block.
pub const OTHER_WARNINGS_HEADER: &str = "Warnings from other checks:";

/// Outcome of a single check.
///
/// `passed` implies `!should_block`. A failed, non-blocking result is a warning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,

    pub should_block: bool,

    #[serde(default)]
    pub message: String,

    /// Documentation link or error code for the finding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl ValidationResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            ..Self::default()
        }
    }

    /// A passing result that still carries an explanatory message.
    pub fn pass_with_message(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            ..Self::default()
        }
    }

    /// A non-blocking finding.
    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            should_block: false,
            message: message.into(),
            ..Self::default()
        }
    }

    /// A finding that stops the action.
    pub fn block(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            should_block: true,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn is_blocking(&self) -> bool {
        !self.passed && self.should_block
    }

    pub fn is_warning(&self) -> bool {
        !self.passed && !self.should_block
    }

    pub fn decision(&self) -> Decision {
        if self.is_blocking() {
            Decision::Block
        } else if self.is_warning() {
            Decision::Warn
        } else {
            Decision::Allow
        }
    }
}

/// The three possible outcomes, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Warn,
    Block,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Warn => "warn",
            Decision::Block => "block",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single reduced outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,

    /// The authoritative result (the first block, the merged warning, or a pass).
    pub result: ValidationResult,

    /// Validator that produced the blocking result, when blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,

    /// Names of the validators that ran, in registration order.
    #[serde(default)]
    pub validators: Vec<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            decision: Decision::Allow,
            result: ValidationResult::pass(),
            blocked_by: None,
            validators: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.decision == Decision::Block
    }

    pub fn message(&self) -> &str {
        &self.result.message
    }
}

/// Reduce `(validator name, result)` pairs, given in registration order, to one verdict.
pub fn aggregate<I>(results: I) -> Verdict
where
    I: IntoIterator<Item = (String, ValidationResult)>,
{
    let mut validators = Vec::new();
    let mut first_block: Option<(String, ValidationResult)> = None;
    let mut warnings: Vec<String> = Vec::new();

    for (name, result) in results {
        validators.push(name.clone());
        if result.is_blocking() {
            if first_block.is_none() {
                first_block = Some((name, result));
            }
        } else if result.is_warning() {
            warnings.push(result.message);
        }
    }

    if let Some((name, mut result)) = first_block {
        if !warnings.is_empty() {
            let listed: Vec<String> = warnings.iter().map(|w| format!("- {w}")).collect();
            result.message = format!(
                "{}\n\n{}\n{}",
                result.message,
                OTHER_WARNINGS_HEADER,
                listed.join("\n")
            );
        }
        return Verdict {
            decision: Decision::Block,
            result,
            blocked_by: Some(name),
            validators,
        };
    }

    if !warnings.is_empty() {
        return Verdict {
            decision: Decision::Warn,
            result: ValidationResult::warn(warnings.join("\n")),
            blocked_by: None,
            validators,
        };
    }

    Verdict {
        validators,
        ..Verdict::pass()
    }
}
