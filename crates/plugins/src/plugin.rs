//! Plugin trait — the uniform capability every transport produces.
//!
//! The registry and the dispatcher only ever see `Arc<dyn Plugin>`; whether
//! a plugin is a child process, a remote service, or a loaded library is
//! decided once by its [`PluginLoader`].

use async_trait::async_trait;
use std::sync::Arc;
use toolwarden_config::PluginConfig;
use toolwarden_core::{CallContext, PluginError};

use crate::types::{PluginInfo, PluginRequest, PluginResponse, Transport};

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Metadata fetched at load time.
    fn info(&self) -> &PluginInfo;

    async fn validate(
        &self,
        cx: &CallContext,
        request: PluginRequest,
    ) -> Result<PluginResponse, PluginError>;

    async fn close(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Turns a declaration into a ready plugin for one transport.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    fn transport(&self) -> Transport;

    async fn load(
        &self,
        cx: &CallContext,
        declaration: &PluginConfig,
    ) -> Result<Arc<dyn Plugin>, PluginError>;

    /// Release shared resources. Loading after close fails with [`PluginError::LoaderClosed`].
    async fn close(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// The declared path, or a `MissingField` error.
pub(crate) fn required_path(declaration: &PluginConfig) -> Result<&str, PluginError> {
    declaration
        .path
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| PluginError::MissingField {
            name: declaration.name.clone(),
            field: "path".into(),
        })
}
