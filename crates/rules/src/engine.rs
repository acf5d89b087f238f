//! Rule evaluation engine.
//!
//! The engine holds an immutable, priority-ordered rule list and reports
//! which rules fire for an event. It never combines actions itself; the
//! [`RuleValidator`](crate::RuleValidator) turns matches into results.

use std::collections::HashSet;
use toolwarden_config::RulesConfig;
use toolwarden_core::{EventContext, EventType, ToolType};
use tracing::{debug, info, warn};

use crate::RuleError;
use crate::model::{ActionType, Rule, RuleAction};

/// Holds compiled rules sorted by descending priority.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<Rule>,
    stop_on_first_match: bool,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::empty()
    }
}

impl RuleEngine {
    /// Build from already compiled rules. Later duplicates of a name are dropped.
    pub fn new(rules: Vec<Rule>, stop_on_first_match: bool) -> Self {
        let mut seen = HashSet::new();
        let mut rules: Vec<Rule> = rules
            .into_iter()
            .filter(|r| seen.insert(r.name.clone()))
            .collect();
        // Stable sort: equal priorities keep declaration order.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            rules,
            stop_on_first_match,
        }
    }

    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            stop_on_first_match: true,
        }
    }

    /// Compile every declared rule.
    ///
    /// A rule that fails to compile is left out and its error returned; the
    /// remaining rules still load.
    pub fn from_config(config: &RulesConfig) -> (Self, Vec<RuleError>) {
        let mut rules = Vec::with_capacity(config.rules.len());
        let mut errors = Vec::new();
        let mut names = HashSet::new();

        for declared in &config.rules {
            match Rule::compile(declared) {
                Ok(rule) => {
                    if !names.insert(rule.name.clone()) {
                        errors.push(RuleError::DuplicateName { rule: rule.name });
                        continue;
                    }
                    rules.push(rule);
                }
                Err(e) => {
                    warn!(rule = %declared.name, error = %e, "Rule failed to compile");
                    errors.push(e);
                }
            }
        }

        let engine = Self::new(rules, config.stop_on_first_match);
        info!(
            rules = engine.rules.len(),
            errors = errors.len(),
            stop_on_first_match = engine.stop_on_first_match,
            "Rules loaded"
        );
        (engine, errors)
    }

    /// All rules in evaluation order, including disabled ones.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn active_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }

    pub fn stop_on_first_match(&self) -> bool {
        self.stop_on_first_match
    }

    /// The action of the highest-priority matching rule, if any.
    pub fn evaluate(&self, event: &EventContext) -> Option<&RuleAction> {
        self.first_match(event).map(|rule| &rule.action)
    }

    pub fn first_match(&self, event: &EventContext) -> Option<&Rule> {
        let validator_type = validator_type_for(event);
        self.rules
            .iter()
            .filter(|r| r.enabled)
            .find(|r| r.matcher.matches(event, &validator_type))
    }

    /// Matching rules in evaluation order; at most one when stop-on-first-match is set.
    pub fn evaluate_all(&self, event: &EventContext) -> Vec<&Rule> {
        let validator_type = validator_type_for(event);
        let mut matched = Vec::new();

        for rule in self.rules.iter().filter(|r| r.enabled) {
            if !rule.matcher.matches(event, &validator_type) {
                continue;
            }
            match rule.action.action_type {
                ActionType::Block => warn!(
                    rule = %rule.name,
                    validator_type = %validator_type,
                    "Rule BLOCKED action: {}",
                    rule.action.message
                ),
                ActionType::Warn => warn!(
                    rule = %rule.name,
                    validator_type = %validator_type,
                    "Rule WARNING: {}",
                    rule.action.message
                ),
                ActionType::Allow => debug!(
                    rule = %rule.name,
                    validator_type = %validator_type,
                    "Rule explicitly ALLOWED"
                ),
            }
            matched.push(rule);
            if self.stop_on_first_match {
                break;
            }
        }
        matched
    }
}

/// The check identifier that would handle this event.
///
/// `git.<subcommand>` for git commands, `shell.bash` for other shell commands,
/// `file.<kind>` for file tools, `notification` for notifications, and
/// `tool.<name>` for everything else.
pub fn validator_type_for(event: &EventContext) -> String {
    if event.event_type == EventType::Notification {
        return "notification".into();
    }

    if event.tool_type.is_shell() {
        return match event.git_subcommand() {
            Some(sub) => format!("git.{sub}"),
            None => "shell.bash".into(),
        };
    }

    if event.tool_type.is_file_tool() {
        let kind = match event.file_extension().as_deref() {
            Some("md" | "markdown") => "markdown",
            Some("sh" | "bash") => "shellscript",
            Some("tf" | "tfvars") => "terraform",
            _ if event.tool_type == ToolType::Write => "write",
            _ => "edit",
        };
        return format!("file.{kind}");
    }

    format!("tool.{}", event.tool_type.as_str().to_ascii_lowercase())
}
