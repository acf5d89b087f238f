//! `file.sensitive_paths` — guards secrets and generated lock files.
//!
//! Writes or edits to files that usually hold credentials are blocked.
//! Lock files are only warned about: editing them by hand is rarely right,
//! but occasionally necessary.

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use std::path::{Component, Path};
use toolwarden_config::FileValidatorConfig;
use toolwarden_core::{
    CallContext, Category, EventContext, EventType, Predicate, ValidationResult, Validator,
    ValidatorError,
};
use tracing::debug;

pub const FILES_VALIDATOR_NAME: &str = "file.sensitive_paths";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// File names (globs) that hold secrets.
const SECRET_FILES: &[&str] = &[
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    "id_rsa",
    "id_dsa",
    "id_ecdsa",
    "id_ed25519",
    ".netrc",
    ".npmrc",
    ".pypirc",
    "credentials.json",
];

/// `.env` variants meant to be committed.
const ENV_TEMPLATES: &[&str] = &[".env.example", ".env.sample", ".env.template"];

/// Directories whose contents are always sensitive.
const SECRET_DIRS: &[&str] = &[".ssh", ".gnupg", ".aws"];

const LOCK_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "poetry.lock",
    "Pipfile.lock",
    "Gemfile.lock",
    "composer.lock",
    "go.sum",
];

pub struct SensitivePathValidator {
    secret_files: Vec<Pattern>,
    extra: Vec<Pattern>,
}

impl SensitivePathValidator {
    pub fn new(config: &FileValidatorConfig) -> Result<Self, ValidatorError> {
        let compile = |source: &str| {
            Pattern::new(source).map_err(|e| ValidatorError::Failed {
                name: FILES_VALIDATOR_NAME.into(),
                reason: format!("invalid sensitive pattern '{source}': {e}"),
            })
        };

        Ok(Self {
            secret_files: SECRET_FILES
                .iter()
                .map(|s| compile(*s))
                .collect::<Result<_, _>>()?,
            extra: config
                .extra_sensitive_patterns
                .iter()
                .map(|s| compile(s.as_str()))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn predicate() -> Predicate {
        Predicate::event_type_is(EventType::PreToolUse).and(Predicate::file_tool())
    }

    fn secret_reason(&self, path: &str) -> Option<String> {
        let file_name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path);

        if let Some(dir) = Path::new(path).components().find_map(|c| match c {
            Component::Normal(part) => part
                .to_str()
                .and_then(|p| SECRET_DIRS.iter().find(|d| d.eq_ignore_ascii_case(p))),
            _ => None,
        }) {
            return Some(format!("files under {dir}/ hold credentials"));
        }

        let is_template = ENV_TEMPLATES
            .iter()
            .any(|t| t.eq_ignore_ascii_case(file_name));
        if !is_template
            && let Some(p) = self
                .secret_files
                .iter()
                .find(|p| p.matches_with(file_name, MATCH_OPTIONS))
        {
            return Some(format!("'{file_name}' matches secret file pattern `{}`", p.as_str()));
        }

        self.extra
            .iter()
            .find(|p| {
                p.matches_with(path, MATCH_OPTIONS) || p.matches_with(file_name, MATCH_OPTIONS)
            })
            .map(|p| format!("'{path}' matches configured pattern `{}`", p.as_str()))
    }
}

#[async_trait]
impl Validator for SensitivePathValidator {
    fn name(&self) -> &str {
        FILES_VALIDATOR_NAME
    }

    fn category(&self) -> Category {
        Category::Cpu
    }

    async fn validate(
        &self,
        _cx: &CallContext,
        event: &EventContext,
    ) -> Result<ValidationResult, ValidatorError> {
        let Some(path) = event.file_path() else {
            return Ok(ValidationResult::pass());
        };

        if let Some(reason) = self.secret_reason(path) {
            debug!(validator = FILES_VALIDATOR_NAME, path = %path, "Sensitive path");
            return Ok(ValidationResult::block(format!(
                "Refusing to modify sensitive file: {reason}"
            ))
            .with_fix_hint("Edit secrets outside the agent session")
            .with_detail("path", path));
        }

        let file_name = Path::new(path).file_name().and_then(|n| n.to_str());
        if let Some(lock) = file_name.filter(|n| LOCK_FILES.contains(n)) {
            return Ok(ValidationResult::warn(format!(
                "{lock} is generated by a package manager; prefer regenerating it"
            ))
            .with_detail("path", path));
        }

        Ok(ValidationResult::pass())
    }
}
