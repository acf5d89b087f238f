//! Configuration loading, validation, and management for toolwarden.
//!
//! Loads configuration from `~/.toolwarden/config.toml` (or the file named by
//! `TOOLWARDEN_CONFIG`), then overlays `<project>/.toolwarden/config.toml`
//! when a project root is known. Missing files yield defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable naming an alternative global config file.
pub const CONFIG_ENV: &str = "TOOLWARDEN_CONFIG";

/// The root configuration structure.
///
/// Maps directly to `~/.toolwarden/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Validator scheduling
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Third-party plugin declarations
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Declarative match/action rules
    #[serde(default)]
    pub rules: RulesConfig,

    /// Built-in validator settings
    #[serde(default)]
    pub validators: ValidatorsConfig,
}

fn default_true() -> bool {
    true
}

// ── Dispatch ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Run applicable validators concurrently, bounded per category.
    #[serde(default)]
    pub parallel: bool,

    /// CPU-bound worker limit (default: host core count).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_workers: Option<usize>,

    /// IO-bound worker limit (default: twice the CPU limit).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_workers: Option<usize>,

    /// Upper bound for any single validator, inside the caller's deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_timeout_ms: Option<u64>,
}

impl DispatchConfig {
    pub fn cpu_worker_count(&self) -> usize {
        self.cpu_workers.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn io_worker_count(&self) -> usize {
        self.io_workers
            .unwrap_or_else(|| self.cpu_worker_count() * 2)
            .max(1)
    }
}

// ── Plugins ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Global plugin directory (default: `~/.toolwarden/plugins`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    /// Timeout for plugins that do not declare one.
    #[serde(default = "default_plugin_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default)]
    pub entries: Vec<PluginConfig>,
}

fn default_plugin_timeout_ms() -> u64 {
    5_000
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            default_timeout_ms: default_plugin_timeout_ms(),
            entries: vec![],
        }
    }
}

/// One plugin declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Unique name for this plugin
    pub name: String,

    /// Transport: "subprocess" (alias "exec"), "rpc" (alias "grpc"), or "native" (alias "dylib")
    #[serde(rename = "type")]
    pub transport: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filesystem path (subprocess and native transports)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Network address `host:port` (rpc transport)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Extra arguments passed to subprocess plugins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// When the plugin applies. Empty = every event.
    #[serde(default)]
    pub predicate: PredicateConfig,

    /// Static configuration passed to the plugin with each request
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub tls: TlsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredicateConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_types: Vec<String>,

    /// Globs matched against the file path of file tools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_patterns: Vec<String>,

    /// Regexes matched against the command of the shell tool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Explicit TLS switch. Unset = TLS for remote addresses, plaintext for local ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,

    /// Name presented for SNI and certificate verification (default: address host)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// Permit plaintext connections to non-local addresses
    #[serde(default)]
    pub allow_insecure_remote: bool,
}

// ── Rules ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Stop at the highest-priority matching rule
    #[serde(default = "default_true")]
    pub stop_on_first_match: bool,

    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stop_on_first_match: true,
            rules: vec![],
        }
    }
}

/// Configuration for one match/action rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Unique name for this rule
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Priority (higher = evaluated first)
    #[serde(default)]
    pub priority: i32,

    #[serde(rename = "match", default)]
    pub matcher: RuleMatchConfig,

    #[serde(default)]
    pub action: RuleActionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleMatchConfig {
    /// Check identifier wildcard, e.g. `git.*`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command_patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    #[serde(default)]
    pub case_insensitive: bool,

    /// "any" (default) or "all"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleActionConfig {
    /// "block", "warn", or "allow"
    #[serde(rename = "type", default = "default_block")]
    pub action_type: String,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

fn default_block() -> String {
    "block".into()
}

impl Default for RuleActionConfig {
    fn default() -> Self {
        Self {
            action_type: default_block(),
            message: String::new(),
            reference: None,
        }
    }
}

// ── Built-in validators ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorsConfig {
    #[serde(default)]
    pub shell: ShellValidatorConfig,

    #[serde(default)]
    pub files: FileValidatorConfig,

    #[serde(default)]
    pub git: GitValidatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellValidatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Regexes blocked in addition to the built-in dangerous command set
    #[serde(default)]
    pub extra_blocked_patterns: Vec<String>,
}

impl Default for ShellValidatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            extra_blocked_patterns: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileValidatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Globs treated as sensitive in addition to the built-in set
    #[serde(default)]
    pub extra_sensitive_patterns: Vec<String>,
}

impl Default for FileValidatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            extra_sensitive_patterns: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitValidatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_protected_branches")]
    pub protected_branches: Vec<String>,
}

fn default_protected_branches() -> Vec<String> {
    vec!["main".into(), "master".into()]
}

impl Default for GitValidatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protected_branches: default_protected_branches(),
        }
    }
}

/// Project-level overlay. Sections present here replace or extend the global file.
#[derive(Debug, Clone, Default, Deserialize)]
struct ProjectOverlay {
    #[serde(default)]
    dispatch: Option<DispatchConfig>,
    #[serde(default)]
    plugins: Option<PluginsConfig>,
    #[serde(default)]
    rules: Option<RulesConfig>,
    #[serde(default)]
    validators: Option<ValidatorsConfig>,
}

impl AppConfig {
    /// Load the global configuration, then overlay the project file if `project_root` is given.
    pub fn load(project_root: Option<&Path>) -> Result<Self, ConfigError> {
        let global_path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        Self::load_with(&global_path, project_root)
    }

    /// Like [`AppConfig::load`], with an explicit global file.
    pub fn load_with(global_path: &Path, project_root: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(global_path)?;

        if let Some(root) = project_root {
            let project_path = Self::project_dir(root).join("config.toml");
            config.apply_overlay(&project_path)?;
            config.validate()?;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = read(path)?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overlay(&mut self, path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            return Ok(());
        }
        let content = read(path)?;
        let overlay: ProjectOverlay =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        tracing::debug!("Applying project config overlay from {}", path.display());

        if let Some(dispatch) = overlay.dispatch {
            self.dispatch = dispatch;
        }
        if let Some(validators) = overlay.validators {
            self.validators = validators;
        }
        if let Some(plugins) = overlay.plugins {
            // The plugin directory bounds where executables may live; only the
            // global config sets it.
            if plugins.directory.is_some() && plugins.directory != self.plugins.directory {
                tracing::warn!(
                    "Ignoring plugins.directory from project config {}",
                    path.display()
                );
            }
            let mut entries = std::mem::take(&mut self.plugins.entries);
            entries.extend(plugins.entries);
            self.plugins = PluginsConfig {
                entries,
                directory: self.plugins.directory.take(),
                ..plugins
            };
        }
        if let Some(rules) = overlay.rules {
            let mut entries = std::mem::take(&mut self.rules.rules);
            entries.extend(rules.rules);
            self.rules = RulesConfig {
                rules: entries,
                ..rules
            };
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolwarden")
    }

    /// The project-local configuration directory.
    pub fn project_dir(project_root: &Path) -> PathBuf {
        project_root.join(".toolwarden")
    }

    /// The global plugin directory.
    pub fn global_plugin_dir(&self) -> PathBuf {
        match &self.plugins.directory {
            Some(dir) => PathBuf::from(dir),
            None => Self::config_dir().join("plugins"),
        }
    }

    /// The project-local plugin directory.
    pub fn project_plugin_dir(project_root: &Path) -> PathBuf {
        Self::project_dir(project_root).join("plugins")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.cpu_workers == Some(0) || self.dispatch.io_workers == Some(0) {
            return Err(ConfigError::ValidationError(
                "dispatch worker counts must be greater than 0".into(),
            ));
        }

        if self.dispatch.validator_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "dispatch.validator_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.plugins.default_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "plugins.default_timeout_ms must be greater than 0".into(),
            ));
        }

        if let Some(plugin) = self.plugins.entries.iter().find(|p| p.timeout_ms == Some(0)) {
            return Err(ConfigError::ValidationError(format!(
                "plugin '{}' timeout_ms must be greater than 0",
                plugin.name
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
