//! Git runner — the one way built-in validators talk to git.
//!
//! Every git-backed check in a process shares a single [`CachedGitRunner`],
//! so asking for the current branch from two validators runs git once.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{Mutex, OnceCell};
use toolwarden_core::{CallContext, CallError};
use tracing::debug;

#[derive(Debug, Clone, Error)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Spawn(String),

    #[error("git call aborted: {0}")]
    Aborted(#[from] CallError),
}

/// Exit status and stdout of one git invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
}

#[async_trait]
pub trait GitRunner: Send + Sync {
    async fn run(&self, cx: &CallContext, args: &[&str]) -> Result<GitOutput, GitError>;

    /// Checked-out branch; `None` when detached or outside a repository.
    async fn current_branch(&self, cx: &CallContext) -> Result<Option<String>, GitError> {
        let out = self.run(cx, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let branch = out.stdout.trim();
        if !out.success || branch.is_empty() || branch == "HEAD" {
            return Ok(None);
        }
        Ok(Some(branch.to_string()))
    }

    async fn remotes(&self, cx: &CallContext) -> Result<Vec<String>, GitError> {
        let out = self.run(cx, &["remote"]).await?;
        if !out.success {
            return Ok(Vec::new());
        }
        Ok(out.stdout.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    /// Whether the index differs from HEAD. `git diff --cached --quiet` exits 1 when it does.
    async fn has_staged_changes(&self, cx: &CallContext) -> Result<bool, GitError> {
        let out = self.run(cx, &["diff", "--cached", "--quiet"]).await?;
        Ok(out.code == Some(1))
    }
}

/// Runs the `git` binary, optionally inside a fixed working directory.
#[derive(Debug, Clone, Default)]
pub struct ProcessGitRunner {
    workdir: Option<PathBuf>,
}

impl ProcessGitRunner {
    pub fn new(workdir: Option<PathBuf>) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl GitRunner for ProcessGitRunner {
    async fn run(&self, cx: &CallContext, args: &[&str]) -> Result<GitOutput, GitError> {
        let mut command = Command::new("git");
        command
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        let output = cx
            .run(command.output())
            .await?
            .map_err(|e| GitError::Spawn(e.to_string()))?;
        debug!(args = ?args, status = %output.status, "git");
        Ok(GitOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Memoizes successful answers per argument list for the runner's lifetime.
///
/// Concurrent identical queries wait on the same cell, so git runs once.
/// Errors are not cached.
pub struct CachedGitRunner {
    inner: Arc<dyn GitRunner>,
    cache: Mutex<HashMap<Vec<String>, Arc<OnceCell<GitOutput>>>>,
}

impl CachedGitRunner {
    pub fn new(inner: Arc<dyn GitRunner>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl GitRunner for CachedGitRunner {
    async fn run(&self, cx: &CallContext, args: &[&str]) -> Result<GitOutput, GitError> {
        let key: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let cell = self.cache.lock().await.entry(key).or_default().clone();
        cell.get_or_try_init(|| self.inner.run(cx, args))
            .await
            .cloned()
    }
}
