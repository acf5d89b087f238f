//! Predicate matcher — decides whether a declared plugin applies to an event.
//!
//! All declared filters are AND-combined; an empty filter matches everything.
//! File globs only ever match file tools with a path, and command regexes only
//! ever match the shell tool with a command.

use glob::{MatchOptions, Pattern};
use regex_lite::Regex;
use std::collections::HashSet;
use toolwarden_config::PredicateConfig;
use toolwarden_core::{EventContext, EventType, PluginError, Predicate, ToolType};

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Default)]
pub struct PredicateMatcher {
    event_types: HashSet<EventType>,
    tool_types: HashSet<ToolType>,
    file_patterns: Vec<Pattern>,
    command_patterns: Vec<Regex>,
}

impl PredicateMatcher {
    /// Compile a declaration. Unknown names and bad globs/regexes fail here, never at match time.
    pub fn compile(plugin: &str, config: &PredicateConfig) -> Result<Self, PluginError> {
        let invalid = |reason: String| PluginError::InvalidPredicate {
            name: plugin.into(),
            reason,
        };

        let mut event_types = HashSet::new();
        for raw in &config.event_types {
            let parsed =
                EventType::parse(raw).ok_or_else(|| invalid(format!("unknown event type '{raw}'")))?;
            event_types.insert(parsed);
        }

        let mut tool_types = HashSet::new();
        for raw in &config.tool_types {
            let parsed =
                ToolType::parse(raw).ok_or_else(|| invalid(format!("unknown tool type '{raw}'")))?;
            tool_types.insert(parsed);
        }

        let file_patterns = config
            .file_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| invalid(format!("invalid file pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let command_patterns = config
            .command_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| invalid(format!("invalid command pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            event_types,
            tool_types,
            file_patterns,
            command_patterns,
        })
    }

    pub fn matches(&self, event: &EventContext) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if !self.tool_types.is_empty() && !self.tool_types.contains(&event.tool_type) {
            return false;
        }

        if !self.file_patterns.is_empty() {
            let path = match event.file_path() {
                Some(path) if event.tool_type.is_file_tool() => path,
                _ => return false,
            };
            if !self
                .file_patterns
                .iter()
                .any(|p| p.matches_with(path, GLOB_OPTIONS))
            {
                return false;
            }
        }

        if !self.command_patterns.is_empty() {
            let command = match event.command() {
                Some(command) if event.tool_type.is_shell() => command,
                _ => return false,
            };
            if !self.command_patterns.iter().any(|re| re.is_match(command)) {
                return false;
            }
        }

        true
    }

    pub fn is_unconstrained(&self) -> bool {
        self.event_types.is_empty()
            && self.tool_types.is_empty()
            && self.file_patterns.is_empty()
            && self.command_patterns.is_empty()
    }

    /// A core predicate evaluating this matcher.
    pub fn into_predicate(self) -> Predicate {
        Predicate::from_fn(move |event| self.matches(event))
    }
}
