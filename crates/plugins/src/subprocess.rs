//! Subprocess transport — plugins as executables speaking JSON over stdio.
//!
//! Protocol:
//! - `<plugin> --version` must exit 0 (output ignored)
//! - `<plugin> --info` prints [`PluginInfo`] JSON and exits 0
//! - otherwise the plugin reads one [`PluginRequest`] from stdin, prints one
//!   [`PluginResponse`] to stdout, and exits 0

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use toolwarden_config::PluginConfig;
use toolwarden_core::{CallContext, PluginError};
use toolwarden_security::{PluginPathPolicy, sanitize_message};
use tracing::{debug, warn};

use crate::plugin::{Plugin, PluginLoader, required_path};
use crate::types::{PluginInfo, PluginRequest, PluginResponse, Transport};

pub struct SubprocessLoader {
    policy: PluginPathPolicy,
    default_timeout: Duration,
}

impl SubprocessLoader {
    pub fn new(policy: PluginPathPolicy, default_timeout: Duration) -> Self {
        Self {
            policy,
            default_timeout,
        }
    }
}

#[async_trait]
impl PluginLoader for SubprocessLoader {
    fn transport(&self) -> Transport {
        Transport::Subprocess
    }

    async fn load(
        &self,
        cx: &CallContext,
        declaration: &PluginConfig,
    ) -> Result<Arc<dyn Plugin>, PluginError> {
        let name = declaration.name.as_str();
        let raw_path = required_path(declaration)?;
        let path = self
            .policy
            .validate(raw_path)
            .map_err(|e| PluginError::Security {
                name: name.into(),
                reason: e.to_string(),
            })?;

        let timeout = declaration
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let load_cx = cx.child_or_timeout(timeout);

        let version = run_flag(&load_cx, name, &path, "--version").await?;
        if !version.status.success() {
            return Err(PluginError::LoadFailed {
                name: name.into(),
                reason: format!("--version exited with {}", version.status),
            });
        }

        let info_output = run_flag(&load_cx, name, &path, "--info").await?;
        if !info_output.status.success() {
            return Err(PluginError::LoadFailed {
                name: name.into(),
                reason: format!("--info exited with {}", info_output.status),
            });
        }
        let info: PluginInfo =
            serde_json::from_slice(&info_output.stdout).map_err(|e| PluginError::LoadFailed {
                name: name.into(),
                reason: format!("--info returned invalid JSON: {e}"),
            })?;

        debug!(
            plugin = %name,
            path = %path.display(),
            version = %info.version,
            "Subprocess plugin loaded"
        );

        Ok(Arc::new(SubprocessPlugin {
            name: name.to_string(),
            path,
            args: declaration.args.clone(),
            timeout,
            config: declaration.config.clone(),
            info,
        }))
    }
}

async fn run_flag(
    cx: &CallContext,
    name: &str,
    path: &Path,
    flag: &str,
) -> Result<Output, PluginError> {
    let output = Command::new(path)
        .arg(flag)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    cx.run(output)
        .await
        .map_err(|e| PluginError::from_call(name, e))?
        .map_err(|e| PluginError::LoadFailed {
            name: name.into(),
            reason: format!("failed to execute {flag}: {e}"),
        })
}

pub struct SubprocessPlugin {
    name: String,
    path: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    config: HashMap<String, serde_json::Value>,
    info: PluginInfo,
}

impl SubprocessPlugin {
    async fn exchange(&self, payload: Vec<u8>) -> std::io::Result<Output> {
        let mut child = Command::new(&self.path)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Feed stdin while draining the output pipes so a plugin that writes
        // before it reads cannot stall on a full pipe.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A plugin may exit without reading its input; its exit status decides.
                if let Err(e) = stdin.write_all(&payload).await
                    && e.kind() != std::io::ErrorKind::BrokenPipe
                {
                    return Err(e);
                }
            }
            Ok(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        fed?;
        output
    }
}

#[async_trait]
impl Plugin for SubprocessPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    async fn validate(
        &self,
        cx: &CallContext,
        request: PluginRequest,
    ) -> Result<PluginResponse, PluginError> {
        let call_cx = cx.child_or_timeout(self.timeout);
        call_cx
            .check()
            .map_err(|e| PluginError::from_call(&self.name, e))?;

        let request = request.with_default_config(&self.config);
        let payload = serde_json::to_vec(&request).map_err(|e| PluginError::Transport {
            name: self.name.clone(),
            reason: format!("failed to encode request: {e}"),
        })?;

        let started = Instant::now();
        let output = call_cx
            .run(self.exchange(payload))
            .await
            .map_err(|e| PluginError::from_call(&self.name, e))?
            .map_err(|e| PluginError::Transport {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            warn!(plugin = %self.name, exit_code = code, "Plugin exited unsuccessfully");
            return Err(PluginError::NonZeroExit {
                name: self.name.clone(),
                code,
                stderr: sanitize_message(&stderr),
            });
        }

        let response: PluginResponse =
            serde_json::from_slice(&output.stdout).map_err(|e| PluginError::MalformedResponse {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            plugin = %self.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            passed = response.passed,
            "Subprocess plugin responded"
        );
        Ok(response)
    }
}
