//! Wire types shared by every plugin transport.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use toolwarden_core::{EventContext, ValidationResult};

/// Plugin metadata, reported once at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,

    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// One event, flattened for a plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginRequest {
    pub event_type: String,

    pub tool_name: String,

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

    /// Plugin configuration; filled from the declaration when the caller sets none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<HashMap<String, serde_json::Value>>,
}

impl PluginRequest {
    pub fn from_event(event: &EventContext) -> Self {
        let input = &event.tool_input;
        Self {
            event_type: event.event_type.as_str().to_string(),
            tool_name: event.tool_type.as_str().to_string(),
            command: input.command.clone(),
            file_path: input.file_path.clone(),
            content: input.content.clone(),
            old_string: input.old_string.clone(),
            new_string: input.new_string.clone(),
            pattern: input.pattern.clone(),
            config: None,
        }
    }

    /// Fill `config` from a declaration unless the caller already supplied one.
    pub fn with_default_config(mut self, config: &HashMap<String, serde_json::Value>) -> Self {
        if self.config.is_none() && !config.is_empty() {
            self.config = Some(config.clone());
        }
        self
    }
}

/// A plugin's answer for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginResponse {
    pub passed: bool,

    #[serde(default)]
    pub should_block: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fix_hint: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc_link: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
}

impl PluginResponse {
    pub fn pass() -> Self {
        Self {
            passed: true,
            ..Self::default()
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn block(message: impl Into<String>) -> Self {
        Self {
            should_block: true,
            message: message.into(),
            ..Self::default()
        }
    }

    /// Convert to a core result. `passed` wins over a stray `should_block`.
    pub fn into_result(self, plugin: &str) -> ValidationResult {
        let mut result = if self.passed {
            ValidationResult::pass_with_message(self.message)
        } else if self.should_block {
            ValidationResult::block(self.message)
        } else {
            ValidationResult::warn(self.message)
        };

        if !self.doc_link.is_empty() {
            result = result.with_reference(self.doc_link);
        } else if !self.error_code.is_empty() {
            result = result.with_reference(self.error_code.clone());
        }
        if !self.fix_hint.is_empty() {
            result = result.with_fix_hint(self.fix_hint);
        }

        let details: BTreeMap<String, String> = self.details.into_iter().collect();
        result.details.extend(details);
        if !self.error_code.is_empty() {
            result = result.with_detail("error_code", self.error_code);
        }
        result.with_detail("plugin", plugin)
    }
}

/// How a plugin is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Executable speaking JSON over stdin/stdout.
    Subprocess,
    /// Network service behind a pooled connection.
    Rpc,
    /// Dynamic library loaded into this process.
    Native,
}

impl Transport {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subprocess" | "exec" | "process" => Some(Transport::Subprocess),
            "rpc" | "grpc" => Some(Transport::Rpc),
            "native" | "dylib" => Some(Transport::Native),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Subprocess => "subprocess",
            Transport::Rpc => "rpc",
            Transport::Native => "native",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
