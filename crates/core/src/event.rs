//! Event context — the normalized description of an agent action.
//!
//! An [`EventContext`] is created once per hook invocation and is read-only
//! from then on. Its serde shape matches the hook payload an agent sends:
//!
//! ```json
//! {
//!   "hook_event_name": "PreToolUse",
//!   "tool_name": "Bash",
//!   "tool_input": { "command": "git push --force" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// When in the agent's lifecycle the event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Before the tool runs. Blocking here prevents the action.
    PreToolUse,
    /// After the tool ran.
    PostToolUse,
    /// A notification surfaced to the user.
    Notification,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::PreToolUse => "PreToolUse",
            EventType::PostToolUse => "PostToolUse",
            EventType::Notification => "Notification",
        }
    }

    /// Parse a configured event name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretooluse" | "pre_tool_use" | "preaction" => Some(EventType::PreToolUse),
            "posttooluse" | "post_tool_use" | "postaction" => Some(EventType::PostToolUse),
            "notification" | "notify" => Some(EventType::Notification),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tool the agent is about to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolType {
    Bash,
    Write,
    Edit,
    MultiEdit,
    Grep,
    Read,
    Glob,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ToolType {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolType::Bash => "Bash",
            ToolType::Write => "Write",
            ToolType::Edit => "Edit",
            ToolType::MultiEdit => "MultiEdit",
            ToolType::Grep => "Grep",
            ToolType::Read => "Read",
            ToolType::Glob => "Glob",
            ToolType::Unknown => "Unknown",
        }
    }

    /// Parse a configured tool name (case-insensitive, with a few aliases).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bash" | "shell" => Some(ToolType::Bash),
            "write" => Some(ToolType::Write),
            "edit" => Some(ToolType::Edit),
            "multiedit" | "multi_edit" => Some(ToolType::MultiEdit),
            "grep" | "search" => Some(ToolType::Grep),
            "read" => Some(ToolType::Read),
            "glob" | "ls" => Some(ToolType::Glob),
            _ => None,
        }
    }

    /// Tools that create or modify a file on disk.
    pub fn is_file_tool(self) -> bool {
        matches!(self, ToolType::Write | ToolType::Edit | ToolType::MultiEdit)
    }

    /// The shell-execution tool.
    pub fn is_shell(self) -> bool {
        self == ToolType::Bash
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool arguments relevant to validation. Absent fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_string: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_string: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// The action under evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    #[serde(rename = "hook_event_name", alias = "event_type")]
    pub event_type: EventType,

    #[serde(rename = "tool_name", alias = "tool_type", default)]
    pub tool_type: ToolType,

    #[serde(default)]
    pub tool_input: ToolInput,
}

impl EventContext {
    pub fn new(event_type: EventType, tool_type: ToolType) -> Self {
        Self {
            event_type,
            tool_type,
            tool_input: ToolInput::default(),
        }
    }

    /// Shorthand for a `PreToolUse` shell command.
    pub fn bash(command: impl Into<String>) -> Self {
        Self::new(EventType::PreToolUse, ToolType::Bash).with_command(command)
    }

    /// Shorthand for a `PreToolUse` file write.
    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(EventType::PreToolUse, ToolType::Write)
            .with_file_path(path)
            .with_content(content)
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.tool_input.command = Some(command.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.tool_input.file_path = Some(path.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.tool_input.content = Some(content.into());
        self
    }

    pub fn with_edit(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.tool_input.old_string = Some(old.into());
        self.tool_input.new_string = Some(new.into());
        self
    }

    /// The shell command, if present and non-empty.
    pub fn command(&self) -> Option<&str> {
        non_empty(&self.tool_input.command)
    }

    /// The target file path, if present and non-empty.
    pub fn file_path(&self) -> Option<&str> {
        non_empty(&self.tool_input.file_path)
    }

    /// Text written by the tool: full content for writes, the replacement for edits.
    pub fn written_text(&self) -> Option<&str> {
        non_empty(&self.tool_input.content).or_else(|| non_empty(&self.tool_input.new_string))
    }

    /// Lower-cased extension of the target file, without the dot.
    pub fn file_extension(&self) -> Option<String> {
        let path = self.file_path()?;
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    /// The git subcommand invoked by the shell command, if any.
    pub fn git_subcommand(&self) -> Option<&str> {
        if !self.tool_type.is_shell() {
            return None;
        }
        git_subcommand(self.command()?)
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.trim().is_empty())
}

/// Global git options that consume the following argument.
const GIT_OPTIONS_WITH_VALUE: &[&str] = &["-C", "-c", "--git-dir", "--work-tree", "--namespace"];

/// Find the subcommand of the first `git` invocation in a (possibly compound) command.
///
/// `cd repo && git -C sub push origin main` → `push`.
pub fn git_subcommand(command: &str) -> Option<&str> {
    git_invocation(command).map(|(subcommand, _)| subcommand)
}

/// The subcommand of the first `git` invocation and the arguments following it.
pub fn git_invocation(command: &str) -> Option<(&str, Vec<&str>)> {
    command
        .split(['&', '|', ';', '\n'])
        .find_map(|segment| {
            let mut tokens = segment
                .split_whitespace()
                .skip_while(|t| is_env_assignment(t));
            let program = tokens.next()?;
            if program != "git" && !program.ends_with("/git") {
                return None;
            }
            let mut skip_next = false;
            while let Some(token) = tokens.next() {
                if skip_next {
                    skip_next = false;
                    continue;
                }
                if GIT_OPTIONS_WITH_VALUE.contains(&token) {
                    skip_next = true;
                    continue;
                }
                if token.starts_with('-') {
                    continue;
                }
                return Some((token, tokens.collect()));
            }
            None
        })
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_hook_payload() {
        let json = r#"{
            "hook_event_name": "PreToolUse",
            "tool_name": "Bash",
            "tool_input": {"command": "ls -la", "description": "list files"}
        }"#;
        let event: EventContext = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, EventType::PreToolUse);
        assert_eq!(event.tool_type, ToolType::Bash);
        assert_eq!(event.command(), Some("ls -la"));
        assert!(event.file_path().is_none());
    }

    #[test]
    fn unknown_tool_deserializes_as_unknown() {
        let json = r#"{"hook_event_name": "PreToolUse", "tool_name": "WebFetch"}"#;
        let event: EventContext = serde_json::from_str(json).unwrap();
        assert_eq!(event.tool_type, ToolType::Unknown);
    }

    #[test]
    fn notification_without_tool() {
        let json = r#"{"hook_event_name": "Notification"}"#;
        let event: EventContext = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, EventType::Notification);
        assert_eq!(event.tool_type, ToolType::Unknown);
    }

    #[test]
    fn tool_classification() {
        assert!(ToolType::Write.is_file_tool());
        assert!(ToolType::MultiEdit.is_file_tool());
        assert!(!ToolType::Read.is_file_tool());
        assert!(ToolType::Bash.is_shell());
        assert!(!ToolType::Grep.is_shell());
    }

    #[test]
    fn parse_names() {
        assert_eq!(ToolType::parse("bash"), Some(ToolType::Bash));
        assert_eq!(ToolType::parse("Shell"), Some(ToolType::Bash));
        assert_eq!(ToolType::parse("nope"), None);
        assert_eq!(EventType::parse("pretooluse"), Some(EventType::PreToolUse));
        assert_eq!(EventType::parse("Notify"), Some(EventType::Notification));
    }

    #[test]
    fn empty_fields_are_absent() {
        let event = EventContext::bash("   ");
        assert!(event.command().is_none());
    }

    #[test]
    fn file_extension_is_lowercased() {
        let event = EventContext::write("/repo/README.MD", "# hi");
        assert_eq!(event.file_extension().as_deref(), Some("md"));
    }

    #[test]
    fn git_subcommand_extraction() {
        assert_eq!(git_subcommand("git push origin main"), Some("push"));
        assert_eq!(git_subcommand("git -C repo commit -m x"), Some("commit"));
        assert_eq!(git_subcommand("GIT_TRACE=1 git --no-pager log"), Some("log"));
        assert_eq!(git_subcommand("cd repo && git status"), Some("status"));
        assert_eq!(git_subcommand("/usr/bin/git fetch"), Some("fetch"));
        assert_eq!(git_subcommand("echo git push"), None);
        assert_eq!(git_subcommand("git"), None);
    }

    #[test]
    fn git_invocation_arguments() {
        let (sub, args) = git_invocation("git -c a=b push -f origin main && echo ok").unwrap();
        assert_eq!(sub, "push");
        assert_eq!(args, ["-f", "origin", "main"]);
        assert!(git_invocation("ls").is_none());
    }

    #[test]
    fn git_subcommand_requires_shell_tool() {
        let event = EventContext::new(EventType::PreToolUse, ToolType::Write)
            .with_command("git push");
        assert!(event.git_subcommand().is_none());
        assert_eq!(EventContext::bash("git push").git_subcommand(), Some("push"));
    }
}
