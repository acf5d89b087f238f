//! Built-in validators for toolwarden.
//!
//! | name | category | checks |
//! |---|---|---|
//! | `shell.dangerous_commands` | cpu | destructive shell commands |
//! | `file.sensitive_paths` | cpu | writes to secrets, lock files |
//! | `git.push` | git | force/direct pushes to protected branches |
//! | `git.commit` | git | `--no-verify`, empty commits |
//!
//! [`BuiltinFactory`] builds the enabled set from config. Git-backed checks
//! share one [`CachedGitRunner`], created the first time one is built.

pub mod files;
pub mod git;
pub mod git_runner;
pub mod shell;

pub use files::{FILES_VALIDATOR_NAME, SensitivePathValidator};
pub use git::{GIT_COMMIT_VALIDATOR_NAME, GIT_PUSH_VALIDATOR_NAME, GitCommitValidator, GitPushValidator};
pub use git_runner::{CachedGitRunner, GitError, GitOutput, GitRunner, ProcessGitRunner};
pub use shell::{DangerousCommandValidator, SHELL_VALIDATOR_NAME};

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use toolwarden_config::ValidatorsConfig;
use toolwarden_core::{Predicate, Validator, ValidatorError};

/// A built validator and the predicate gating it.
pub struct Builtin {
    pub validator: Arc<dyn Validator>,
    pub predicate: Predicate,
}

impl Builtin {
    fn new(validator: impl Validator + 'static, predicate: Predicate) -> Self {
        Self {
            validator: Arc::new(validator),
            predicate,
        }
    }
}

pub struct BuiltinFactory {
    config: ValidatorsConfig,
    workdir: Option<PathBuf>,
    git: OnceLock<Arc<dyn GitRunner>>,
}

impl BuiltinFactory {
    pub fn new(config: ValidatorsConfig, workdir: Option<PathBuf>) -> Self {
        Self {
            config,
            workdir,
            git: OnceLock::new(),
        }
    }

    /// Use `runner` (wrapped in a cache) instead of the `git` binary.
    /// Replaces any runner already handed out by [`Self::git_runner`].
    pub fn with_git_runner(mut self, runner: Arc<dyn GitRunner>) -> Self {
        let cached: Arc<dyn GitRunner> = Arc::new(CachedGitRunner::new(runner));
        self.git = OnceLock::from(cached);
        self
    }

    /// The shared runner, created on first use.
    pub fn git_runner(&self) -> Arc<dyn GitRunner> {
        self.git
            .get_or_init(|| {
                let process: Arc<dyn GitRunner> =
                    Arc::new(ProcessGitRunner::new(self.workdir.clone()));
                Arc::new(CachedGitRunner::new(process))
            })
            .clone()
    }

    /// Build every enabled built-in in registration order. A validator that
    /// fails to build is reported and left out.
    pub fn build(&self) -> (Vec<Builtin>, Vec<ValidatorError>) {
        let mut built = Vec::new();
        let mut errors = Vec::new();

        if self.config.shell.enabled {
            match DangerousCommandValidator::new(&self.config.shell) {
                Ok(v) => built.push(Builtin::new(v, DangerousCommandValidator::predicate())),
                Err(e) => errors.push(e),
            }
        }

        if self.config.files.enabled {
            match SensitivePathValidator::new(&self.config.files) {
                Ok(v) => built.push(Builtin::new(v, SensitivePathValidator::predicate())),
                Err(e) => errors.push(e),
            }
        }

        if self.config.git.enabled {
            let git = self.git_runner();
            built.push(Builtin::new(
                GitPushValidator::new(&self.config.git, git.clone()),
                GitPushValidator::predicate(),
            ));
            built.push(Builtin::new(
                GitCommitValidator::new(git),
                GitCommitValidator::predicate(),
            ));
        }

        (built, errors)
    }
}
