//! # toolwarden Plugins
//!
//! Third-party checks reached over one of three transports:
//! - **subprocess** — an executable speaking JSON over stdin/stdout
//! - **rpc** — a network service, one pooled connection per address
//! - **native** — a dynamic library loaded into this process
//!
//! Each transport has a [`PluginLoader`] producing the same [`Plugin`]
//! capability, so the [`PluginRegistry`] never branches on transport.

pub mod native;
mod plugin;
mod predicate;
mod registry;
mod rpc;
mod subprocess;
mod types;

pub use native::{NativeLoader, NativePlugin};
pub use plugin::{Plugin, PluginLoader};
pub use predicate::PredicateMatcher;
pub use registry::{
    PLUGINS_VALIDATOR_NAME, PluginEntry, PluginRegistry, PluginRegistryValidator, PluginValidator,
};
pub use rpc::{
    PluginService, PluginServiceClient, RpcLoader, RpcPlugin, RpcRequest, client_over,
    encode_config, serve_connection,
};
pub use subprocess::{SubprocessLoader, SubprocessPlugin};
pub use types::{PluginInfo, PluginRequest, PluginResponse, Transport};
