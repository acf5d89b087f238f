//! CLI command implementations.

pub mod doctor;
pub mod hook;
pub mod plugins;
pub mod rules;

use std::path::{Path, PathBuf};

use toolwarden_config::{AppConfig, ConfigError};
use toolwarden_core::CallContext;
use toolwarden_dispatch::{Build, build_from_config};

/// Where configuration and plugins come from for this invocation.
pub struct Env {
    config_path: Option<PathBuf>,
    project_root: PathBuf,
}

impl Env {
    pub fn new(config_path: Option<PathBuf>, project: Option<PathBuf>) -> anyhow::Result<Self> {
        let project_root = match project {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        Ok(Self {
            config_path,
            project_root,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        match &self.config_path {
            Some(path) => AppConfig::load_with(path, Some(self.project_root.as_path())),
            None => AppConfig::load(Some(self.project_root.as_path())),
        }
    }

    /// Load the config and assemble a dispatcher from it.
    pub async fn build(&self, cx: &CallContext) -> Result<Build, ConfigError> {
        let config = self.load_config()?;
        Ok(build_from_config(cx, config, Some(self.project_root.as_path())).await)
    }
}
