//! `shell.dangerous_commands` — blocks commands that destroy disks or systems.

use async_trait::async_trait;
use regex_lite::Regex;
use toolwarden_config::ShellValidatorConfig;
use toolwarden_core::{
    CallContext, Category, EventContext, EventType, Predicate, ToolType, ValidationResult,
    Validator, ValidatorError,
};
use tracing::warn;

pub const SHELL_VALIDATOR_NAME: &str = "shell.dangerous_commands";

/// Built-in blocked set: (description, regex).
const DEFAULT_BLOCKED: &[(&str, &str)] = &[
    (
        "recursive delete of the filesystem root or home",
        r"\brm\s+(-[a-zA-Z]+\s+)*-[a-zA-Z]*(rf|fr)[a-zA-Z]*\s+(-[a-zA-Z]+\s+)*(/|/\*|~|~/|\$HOME)(\s|$)",
    ),
    ("filesystem creation", r"\bmkfs(\.[a-z0-9]+)?\b"),
    ("raw write to a device", r"\bdd\b.*\bof=/dev/"),
    ("fork bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
    (
        "world-writable permissions on the filesystem root",
        r"\bchmod\s+(-[a-zA-Z]*R[a-zA-Z]*\s+)777\s+/(\s|$)",
    ),
];

struct BlockedCommand {
    description: String,
    source: String,
    regex: Regex,
}

pub struct DangerousCommandValidator {
    blocked: Vec<BlockedCommand>,
}

impl DangerousCommandValidator {
    /// Compile the built-in set plus any configured extra patterns.
    pub fn new(config: &ShellValidatorConfig) -> Result<Self, ValidatorError> {
        let extra = config
            .extra_blocked_patterns
            .iter()
            .map(|p| ("configured blocked pattern", p.as_str()));

        let blocked = DEFAULT_BLOCKED
            .iter()
            .copied()
            .chain(extra)
            .map(|(description, source)| {
                let regex = Regex::new(source).map_err(|e| ValidatorError::Failed {
                    name: SHELL_VALIDATOR_NAME.into(),
                    reason: format!("invalid blocked pattern '{source}': {e}"),
                })?;
                Ok(BlockedCommand {
                    description: description.to_string(),
                    source: source.to_string(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>, ValidatorError>>()?;

        Ok(Self { blocked })
    }

    pub fn predicate() -> Predicate {
        Predicate::event_type_is(EventType::PreToolUse).and(Predicate::tool_type_is(ToolType::Bash))
    }
}

#[async_trait]
impl Validator for DangerousCommandValidator {
    fn name(&self) -> &str {
        SHELL_VALIDATOR_NAME
    }

    fn category(&self) -> Category {
        Category::Cpu
    }

    async fn validate(
        &self,
        _cx: &CallContext,
        event: &EventContext,
    ) -> Result<ValidationResult, ValidatorError> {
        let Some(command) = event.command() else {
            return Ok(ValidationResult::pass());
        };

        let Some(hit) = self.blocked.iter().find(|b| b.regex.is_match(command)) else {
            return Ok(ValidationResult::pass());
        };

        warn!(validator = SHELL_VALIDATOR_NAME, pattern = %hit.source, "Dangerous command blocked");
        Ok(ValidationResult::block(format!(
            "Blocked dangerous command ({}): matched pattern `{}`",
            hit.description, hit.source
        ))
        .with_fix_hint("Run a narrower command that targets only what you need")
        .with_detail("pattern", hit.source.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> DangerousCommandValidator {
        DangerousCommandValidator::new(&ShellValidatorConfig::default()).unwrap()
    }

    async fn check(v: &DangerousCommandValidator, command: &str) -> ValidationResult {
        v.validate(&CallContext::background(), &EventContext::bash(command))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn blocks_default_set() {
        let v = validator();
        for command in [
            "rm -rf /",
            "sudo rm -rf / --no-preserve-root",
            "rm -fr ~",
            "rm -v -rf /*",
            "mkfs.ext4 /dev/sda1",
            "dd if=/dev/zero of=/dev/sda bs=1M",
            ":(){ :|:& };:",
            "chmod -R 777 /",
        ] {
            let result = check(&v, command).await;
            assert!(result.is_blocking(), "expected block for {command}");
        }
    }

    #[tokio::test]
    async fn block_message_names_the_pattern() {
        let result = check(&validator(), "rm -rf /").await;
        assert!(result.message.contains("matched pattern"));
        assert_eq!(
            result.details.get("pattern").map(String::as_str),
            Some(DEFAULT_BLOCKED[0].1)
        );
    }

    #[tokio::test]
    async fn allows_ordinary_commands() {
        let v = validator();
        for command in [
            "rm -rf ./target",
            "rm -rf /tmp/build-cache",
            "ls -la /",
            "dd if=disk.img of=backup.img",
            "chmod 755 ./script.sh",
        ] {
            assert!(check(&v, command).await.passed, "expected pass for {command}");
        }
    }

    #[tokio::test]
    async fn extra_patterns_extend_the_set() {
        let v = DangerousCommandValidator::new(&ShellValidatorConfig {
            enabled: true,
            extra_blocked_patterns: vec![r"\bterraform\s+destroy\b".into()],
        })
        .unwrap();
        assert!(check(&v, "terraform destroy -auto-approve").await.is_blocking());
    }

    #[test]
    fn invalid_extra_pattern_is_a_construction_error() {
        let result = DangerousCommandValidator::new(&ShellValidatorConfig {
            enabled: true,
            extra_blocked_patterns: vec!["(".into()],
        });
        assert!(matches!(result, Err(ValidatorError::Failed { .. })));
    }

    #[test]
    fn predicate_gates_on_pre_tool_bash() {
        let p = DangerousCommandValidator::predicate();
        assert!(p.matches(&EventContext::bash("ls")));
        assert!(!p.matches(&EventContext::write("a.txt", "rm -rf /")));
        assert!(!p.matches(
            &EventContext::new(EventType::PostToolUse, ToolType::Bash).with_command("ls")
        ));
    }
}
