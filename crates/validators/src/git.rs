//! Git checks: `git.push` and `git.commit`.
//!
//! Both only parse the command line and ask the shared [`GitRunner`] about
//! repository state; neither ever changes the repository. When git cannot
//! answer (not a repository, git missing) the check falls back to what the
//! command line alone says.

use async_trait::async_trait;
use std::sync::Arc;
use toolwarden_config::GitValidatorConfig;
use toolwarden_core::{
    CallContext, Category, EventContext, EventType, Predicate, ToolType, ValidationResult,
    Validator, ValidatorError, git_invocation,
};
use tracing::debug;

use crate::git_runner::{GitError, GitRunner};

pub const GIT_PUSH_VALIDATOR_NAME: &str = "git.push";
pub const GIT_COMMIT_VALIDATOR_NAME: &str = "git.commit";

fn git_predicate(subcommand: &str) -> Predicate {
    Predicate::event_type_is(EventType::PreToolUse)
        .and(Predicate::tool_type_is(ToolType::Bash))
        .and(Predicate::git_subcommand_is(subcommand))
}

/// Deadline and cancellation end the check; anything else means "git can't tell us".
fn tolerate<T>(name: &str, result: Result<T, GitError>) -> Result<Option<T>, ValidatorError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(GitError::Aborted(e)) => Err(ValidatorError::from_call(name, e)),
        Err(e) => {
            debug!(validator = %name, error = %e, "git unavailable");
            Ok(None)
        }
    }
}

// ── git push ───────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq, Eq)]
struct PushArgs {
    force: bool,
    remote: Option<String>,
    /// Destination branches named by refspecs.
    branches: Vec<String>,
}

fn parse_push(args: &[&str]) -> PushArgs {
    let mut parsed = PushArgs::default();
    let mut positionals = Vec::new();
    for arg in args {
        match *arg {
            "--force" | "--force-with-lease" | "--force-if-includes" => parsed.force = true,
            a if a.starts_with("--force-with-lease=") => parsed.force = true,
            a if a.starts_with("--") => {}
            a if a.starts_with('-') => {
                if a[1..].contains('f') {
                    parsed.force = true;
                }
            }
            a => positionals.push(a),
        }
    }

    let mut positionals = positionals.into_iter();
    parsed.remote = positionals.next().map(str::to_string);
    for refspec in positionals {
        if let Some(rest) = refspec.strip_prefix('+') {
            parsed.force = true;
            parsed.branches.push(destination(rest));
        } else {
            parsed.branches.push(destination(refspec));
        }
    }
    parsed
}

/// `src:dst` → `dst`, `refs/heads/x` → `x`, `HEAD:x` → `x`.
fn destination(refspec: &str) -> String {
    let dst = refspec.rsplit_once(':').map_or(refspec, |(_, d)| d);
    dst.trim_start_matches("refs/heads/").to_string()
}

pub struct GitPushValidator {
    protected: Vec<String>,
    git: Arc<dyn GitRunner>,
}

impl GitPushValidator {
    pub fn new(config: &GitValidatorConfig, git: Arc<dyn GitRunner>) -> Self {
        Self {
            protected: config.protected_branches.clone(),
            git,
        }
    }

    pub fn predicate() -> Predicate {
        git_predicate("push")
    }

    fn is_protected(&self, branch: &str) -> bool {
        self.protected.iter().any(|p| p == branch)
    }
}

#[async_trait]
impl Validator for GitPushValidator {
    fn name(&self) -> &str {
        GIT_PUSH_VALIDATOR_NAME
    }

    fn category(&self) -> Category {
        Category::Git
    }

    async fn validate(
        &self,
        cx: &CallContext,
        event: &EventContext,
    ) -> Result<ValidationResult, ValidatorError> {
        let Some(("push", args)) = event.command().and_then(git_invocation) else {
            return Ok(ValidationResult::pass());
        };
        let push = parse_push(&args);

        if let Some(remote) = &push.remote
            && let Some(remotes) = tolerate(self.name(), self.git.remotes(cx).await)?
            && !remotes.is_empty()
            && !remotes.contains(remote)
        {
            return Ok(ValidationResult::block(format!(
                "Remote '{remote}' does not exist (known remotes: {})",
                remotes.join(", ")
            ))
            .with_fix_hint("Check the remote name with `git remote -v`"));
        }

        let branches = if push.branches.is_empty() {
            tolerate(self.name(), self.git.current_branch(cx).await)?
                .flatten()
                .into_iter()
                .collect()
        } else {
            push.branches
        };

        let Some(branch) = branches.iter().find(|b| self.is_protected(b)) else {
            return Ok(ValidationResult::pass());
        };

        if push.force {
            return Ok(ValidationResult::block(format!(
                "Force push to protected branch '{branch}' is not allowed"
            ))
            .with_fix_hint("Push to a feature branch and open a pull request")
            .with_detail("branch", branch.clone()));
        }

        Ok(ValidationResult::warn(format!(
            "Pushing directly to protected branch '{branch}'"
        ))
        .with_fix_hint("Consider pushing to a feature branch and opening a pull request")
        .with_detail("branch", branch.clone()))
    }
}

// ── git commit ─────────────────────────────────────────────────────

/// Flags that stage files as part of the commit itself.
fn stages_during_commit(args: &[&str]) -> bool {
    args.iter().any(|a| {
        matches!(*a, "--all" | "--amend" | "--include" | "--only" | "--allow-empty")
            || (a.starts_with('-') && !a.starts_with("--") && (a.contains('a') || a.contains('i')))
    })
}

pub struct GitCommitValidator {
    git: Arc<dyn GitRunner>,
}

impl GitCommitValidator {
    pub fn new(git: Arc<dyn GitRunner>) -> Self {
        Self { git }
    }

    pub fn predicate() -> Predicate {
        git_predicate("commit")
    }
}

#[async_trait]
impl Validator for GitCommitValidator {
    fn name(&self) -> &str {
        GIT_COMMIT_VALIDATOR_NAME
    }

    fn category(&self) -> Category {
        Category::Git
    }

    async fn validate(
        &self,
        cx: &CallContext,
        event: &EventContext,
    ) -> Result<ValidationResult, ValidatorError> {
        let Some(("commit", args)) = event.command().and_then(git_invocation) else {
            return Ok(ValidationResult::pass());
        };

        if args.iter().any(|a| *a == "--no-verify" || *a == "-n") {
            return Ok(ValidationResult::block(
                "Skipping commit hooks with --no-verify is not allowed",
            )
            .with_fix_hint("Fix the hook failures instead of bypassing them"));
        }

        // Paths after `--` or with -a/--amend the commit stages its own content.
        if stages_during_commit(&args) || args.contains(&"--") {
            return Ok(ValidationResult::pass());
        }

        match tolerate(self.name(), self.git.has_staged_changes(cx).await)? {
            Some(false) => Ok(ValidationResult::warn(
                "Nothing is staged; this commit will fail or be empty",
            )
            .with_fix_hint("Stage changes with `git add` first")),
            _ => Ok(ValidationResult::pass()),
        }
    }
}
