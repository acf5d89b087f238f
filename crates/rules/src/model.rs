//! Rule data model — compiled, immutable rules built from configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use toolwarden_config::{RuleActionConfig, RuleConfig, RuleMatchConfig};
use toolwarden_core::{EventContext, EventType, ToolType};

use crate::RuleError;
use crate::pattern::{Pattern, PatternMode, PatternSet};

/// What happens when a rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// The action is blocked.
    #[default]
    Block,
    /// The action proceeds with a warning.
    Warn,
    /// Explicit pass; stops lower-priority rules when stop-on-first-match is on.
    Allow,
}

impl From<&str> for ActionType {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" | "deny" => ActionType::Block,
            "warn" | "warning" => ActionType::Warn,
            "allow" | "pass" => ActionType::Allow,
            other => {
                tracing::warn!(action = %other, "Unknown rule action type, treating as block");
                ActionType::Block
            }
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionType::Block => "block",
            ActionType::Warn => "warn",
            ActionType::Allow => "allow",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleAction {
    pub action_type: ActionType,
    pub message: String,
    pub reference: Option<String>,
}

impl RuleAction {
    fn from_config(rule_name: &str, config: &RuleActionConfig) -> Self {
        let message = if config.message.trim().is_empty() {
            format!("Rule '{rule_name}' matched")
        } else {
            config.message.clone()
        };
        Self {
            action_type: ActionType::from(config.action_type.as_str()),
            message,
            reference: config.reference.clone(),
        }
    }
}

/// The AND-combined conditions of one rule. Unset fields impose no constraint.
#[derive(Debug, Clone, Default)]
pub struct RuleMatch {
    pub validator_type: Option<String>,
    pub tool_type: Option<ToolType>,
    pub event_type: Option<EventType>,
    pub command: Option<PatternSet>,
    pub file: Option<PatternSet>,
    pub content: Option<PatternSet>,
}

impl RuleMatch {
    fn from_config(rule_name: &str, config: &RuleMatchConfig) -> Result<Self, RuleError> {
        let mode = match config.pattern_mode.as_deref() {
            None => PatternMode::Any,
            Some(raw) => PatternMode::parse(raw).ok_or_else(|| RuleError::InvalidField {
                rule: rule_name.into(),
                field: "pattern_mode",
                reason: format!("'{raw}' is not 'any' or 'all'"),
            })?,
        };

        let tool_type = match config.tool_type.as_deref() {
            None => None,
            Some(raw) => Some(ToolType::parse(raw).ok_or_else(|| RuleError::InvalidField {
                rule: rule_name.into(),
                field: "tool_type",
                reason: format!("unknown tool type '{raw}'"),
            })?),
        };

        let event_type = match config.event_type.as_deref() {
            None => None,
            Some(raw) => Some(EventType::parse(raw).ok_or_else(|| RuleError::InvalidField {
                rule: rule_name.into(),
                field: "event_type",
                reason: format!("unknown event type '{raw}'"),
            })?),
        };

        let ci = config.case_insensitive;
        Ok(Self {
            validator_type: config.validator_type.clone().filter(|v| !v.trim().is_empty()),
            tool_type,
            event_type,
            command: compile_field(
                rule_name,
                &config.command_pattern,
                &config.command_patterns,
                mode,
                ci,
            )?,
            file: compile_field(
                rule_name,
                &config.file_pattern,
                &config.file_patterns,
                mode,
                ci,
            )?,
            content: compile_field(
                rule_name,
                &config.content_pattern,
                &config.content_patterns,
                mode,
                ci,
            )?,
        })
    }

    /// Does the event satisfy every declared condition?
    ///
    /// `validator_type` is the check identifier the event resolves to.
    pub fn matches(&self, event: &EventContext, validator_type: &str) -> bool {
        if let Some(wanted) = &self.validator_type
            && !validator_type_matches(wanted, validator_type)
        {
            return false;
        }
        if self.tool_type.is_some_and(|t| t != event.tool_type) {
            return false;
        }
        if self.event_type.is_some_and(|e| e != event.event_type) {
            return false;
        }
        field_matches(&self.command, event.command())
            && field_matches(&self.file, event.file_path())
            && field_matches(&self.content, event.written_text())
    }

    pub fn is_unconditional(&self) -> bool {
        self.validator_type.is_none()
            && self.tool_type.is_none()
            && self.event_type.is_none()
            && self.command.is_none()
            && self.file.is_none()
            && self.content.is_none()
    }
}

/// A declared field with no value on the event never matches.
fn field_matches(set: &Option<PatternSet>, value: Option<&str>) -> bool {
    match (set, value) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(set), Some(text)) => set.matches(text),
    }
}

fn compile_field(
    rule_name: &str,
    single: &Option<String>,
    list: &[String],
    mode: PatternMode,
    case_insensitive: bool,
) -> Result<Option<PatternSet>, RuleError> {
    let sources: Vec<&str> = single
        .iter()
        .map(String::as_str)
        .chain(list.iter().map(String::as_str))
        .collect();
    if sources.is_empty() {
        return Ok(None);
    }

    let mut patterns = Vec::with_capacity(sources.len());
    for source in sources {
        let pattern =
            Pattern::compile(source, case_insensitive).map_err(|reason| {
                RuleError::InvalidPattern {
                    rule: rule_name.into(),
                    pattern: source.into(),
                    reason,
                }
            })?;
        patterns.push(pattern);
    }
    Ok(Some(PatternSet::new(patterns, mode)))
}

/// `*` matches everything, `git.*` matches `git.push` and `git`, otherwise exact.
pub fn validator_type_matches(wanted: &str, actual: &str) -> bool {
    let wanted = wanted.trim();
    if wanted == "*" {
        return true;
    }
    if let Some(prefix) = wanted.strip_suffix(".*") {
        return actual == prefix
            || actual
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'));
    }
    wanted.eq_ignore_ascii_case(actual)
}

/// A single compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    /// Higher is evaluated first. Ties keep declaration order.
    pub priority: i32,
    pub matcher: RuleMatch,
    pub action: RuleAction,
}

impl Rule {
    /// Compile a declared rule. Pattern and field errors name the rule.
    pub fn compile(config: &RuleConfig) -> Result<Self, RuleError> {
        let name = config.name.trim();
        if name.is_empty() {
            return Err(RuleError::EmptyName);
        }
        Ok(Self {
            name: name.to_string(),
            description: config.description.clone(),
            enabled: config.enabled,
            priority: config.priority,
            matcher: RuleMatch::from_config(name, &config.matcher)?,
            action: RuleAction::from_config(name, &config.action),
        })
    }
}
