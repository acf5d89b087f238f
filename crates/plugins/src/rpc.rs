//! RPC transport — plugins served over tarpc with length-delimited JSON framing.
//!
//! Connections are pooled by address: every plugin declared at the same
//! address shares one client. The pool dials lazily, never evicts, and is
//! drained exactly once when the loader closes.

use async_trait::async_trait;
use futures::StreamExt;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tarpc::client::RpcError;
use tarpc::server::{BaseChannel, Channel};
use tarpc::tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio_rustls::TlsConnector;
use tokio_serde::formats::Json;
use toolwarden_config::{PluginConfig, TlsConfig};
use toolwarden_core::{CallContext, PluginError};
use toolwarden_security::{
    TransportSecurity, host_of, resolve_transport_security, validate_tls_files,
};
use tracing::{debug, info};

use crate::plugin::{Plugin, PluginLoader};
use crate::types::{PluginInfo, PluginRequest, PluginResponse, Transport};

/// Request shape on the RPC wire: `config` is a flat string map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub event_type: String,
    pub tool_name: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub old_string: Option<String>,
    #[serde(default)]
    pub new_string: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl From<PluginRequest> for RpcRequest {
    fn from(request: PluginRequest) -> Self {
        Self {
            event_type: request.event_type,
            tool_name: request.tool_name,
            command: request.command,
            file_path: request.file_path,
            content: request.content,
            old_string: request.old_string,
            new_string: request.new_string,
            pattern: request.pattern,
            config: encode_config(request.config.unwrap_or_default()),
        }
    }
}

/// Strings pass through unchanged; every other value is JSON-encoded.
pub fn encode_config(config: HashMap<String, serde_json::Value>) -> HashMap<String, String> {
    config
        .into_iter()
        .map(|(key, value)| {
            let encoded = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, encoded)
        })
        .collect()
}

/// The service an RPC plugin implements.
#[tarpc::service]
pub trait PluginService {
    async fn info() -> PluginInfo;
    async fn validate(request: RpcRequest) -> PluginResponse;
}

/// Serve one accepted connection until the peer disconnects.
///
/// Plugin authors call this from their accept loop.
pub async fn serve_connection<S, IO>(io: IO, service: S)
where
    S: PluginService + Send + Clone + 'static,
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let transport =
        tarpc::serde_transport::new(Framed::new(io, LengthDelimitedCodec::new()), Json::default());

    BaseChannel::with_defaults(transport)
        .execute(service.serve())
        .for_each(|response| async move {
            response.await;
        })
        .await;
}

/// A client over an already established stream.
pub fn client_over<IO>(io: IO) -> PluginServiceClient
where
    IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let transport =
        tarpc::serde_transport::new(Framed::new(io, LengthDelimitedCodec::new()), Json::default());
    PluginServiceClient::new(tarpc::client::Config::default(), transport).spawn()
}

/// A tarpc context carrying the call's deadline.
fn rpc_context(cx: &CallContext) -> tarpc::context::Context {
    let mut ctx = tarpc::context::current();
    if let Some(remaining) = cx.remaining() {
        ctx.deadline = std::time::Instant::now() + remaining;
    }
    ctx
}

fn map_rpc_error(name: &str, err: RpcError) -> PluginError {
    match err {
        RpcError::DeadlineExceeded => PluginError::Timeout { name: name.into() },
        other => PluginError::Transport {
            name: name.into(),
            reason: other.to_string(),
        },
    }
}

fn tls_connector(name: &str, tls: &TlsConfig) -> Result<TlsConnector, PluginError> {
    let tls_error = |reason: String| PluginError::Tls {
        name: name.into(),
        reason,
    };

    let mut roots = RootCertStore::empty();
    match tls.ca_file.as_deref() {
        Some(ca_file) => {
            let certs = CertificateDer::pem_file_iter(ca_file)
                .map_err(|e| tls_error(format!("failed to read ca_file: {e}")))?;
            for cert in certs {
                let cert = cert.map_err(|e| tls_error(format!("invalid CA certificate: {e}")))?;
                roots
                    .add(cert)
                    .map_err(|e| tls_error(format!("rejected CA certificate: {e}")))?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| tls_error(e.to_string()))?
    .with_root_certificates(roots);

    let config = match (tls.cert_file.as_deref(), tls.key_file.as_deref()) {
        (Some(cert_file), Some(key_file)) => {
            let certs = CertificateDer::pem_file_iter(cert_file)
                .map_err(|e| tls_error(format!("failed to read cert_file: {e}")))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| tls_error(format!("invalid client certificate: {e}")))?;
            let key = PrivateKeyDer::from_pem_file(key_file)
                .map_err(|e| tls_error(format!("invalid client key: {e}")))?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| tls_error(e.to_string()))?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

async fn dial(
    name: &str,
    address: &str,
    security: TransportSecurity,
    tls: &TlsConfig,
) -> Result<PluginServiceClient, PluginError> {
    let transport_error = |reason: String| PluginError::Transport {
        name: name.into(),
        reason,
    };

    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| transport_error(format!("failed to connect to {address}: {e}")))?;
    stream.set_nodelay(true).ok();

    match security {
        TransportSecurity::Plaintext => Ok(client_over(stream)),
        TransportSecurity::Tls => {
            let connector = tls_connector(name, tls)?;
            let host = tls
                .server_name
                .clone()
                .unwrap_or_else(|| host_of(address).to_string());
            let server_name = ServerName::try_from(host.clone()).map_err(|e| PluginError::Tls {
                name: name.into(),
                reason: format!("invalid server name '{host}': {e}"),
            })?;
            let stream = connector
                .connect(server_name, stream)
                .await
                .map_err(|e| transport_error(format!("TLS handshake with {address} failed: {e}")))?;
            Ok(client_over(stream))
        }
    }
}

pub struct RpcLoader {
    pool: RwLock<HashMap<String, PluginServiceClient>>,
    closed: AtomicBool,
    default_timeout: Duration,
}

impl RpcLoader {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pool: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            default_timeout,
        }
    }

    /// Number of pooled connections.
    pub async fn pool_size(&self) -> usize {
        self.pool.read().await.len()
    }

    async fn client_for(
        &self,
        cx: &CallContext,
        name: &str,
        address: &str,
        security: TransportSecurity,
        tls: &TlsConfig,
    ) -> Result<PluginServiceClient, PluginError> {
        if let Some(client) = self.pool.read().await.get(address) {
            return Ok(client.clone());
        }

        let mut pool = self.pool.write().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(PluginError::LoaderClosed);
        }
        if let Some(client) = pool.get(address) {
            return Ok(client.clone());
        }

        let client = cx
            .run(dial(name, address, security, tls))
            .await
            .map_err(|e| PluginError::from_call(name, e))??;
        debug!(plugin = %name, address = %address, ?security, "RPC connection established");
        pool.insert(address.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl PluginLoader for RpcLoader {
    fn transport(&self) -> Transport {
        Transport::Rpc
    }

    async fn load(
        &self,
        cx: &CallContext,
        declaration: &PluginConfig,
    ) -> Result<Arc<dyn Plugin>, PluginError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PluginError::LoaderClosed);
        }

        let name = declaration.name.as_str();
        let address = declaration
            .address
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| PluginError::MissingField {
                name: name.into(),
                field: "address".into(),
            })?;

        let tls = &declaration.tls;
        let tls_error = |reason: String| PluginError::Tls {
            name: name.into(),
            reason,
        };
        let security = resolve_transport_security(address, tls.enabled, tls.allow_insecure_remote)
            .map_err(|e| tls_error(e.to_string()))?;
        validate_tls_files(
            tls.ca_file.as_deref(),
            tls.cert_file.as_deref(),
            tls.key_file.as_deref(),
        )
        .map_err(|e| tls_error(e.to_string()))?;

        let timeout = declaration
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let load_cx = cx.child_or_timeout(timeout);

        let client = self
            .client_for(&load_cx, name, address, security, tls)
            .await?;

        let info = load_cx
            .run(client.info(rpc_context(&load_cx)))
            .await
            .map_err(|e| PluginError::from_call(name, e))?
            .map_err(|e| PluginError::LoadFailed {
                name: name.into(),
                reason: format!("info call failed: {e}"),
            })?;

        debug!(plugin = %name, address = %address, version = %info.version, "RPC plugin loaded");

        Ok(Arc::new(RpcPlugin {
            name: name.to_string(),
            client,
            timeout,
            config: declaration.config.clone(),
            info,
        }))
    }

    async fn close(&self) -> Result<(), PluginError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let drained: Vec<(String, PluginServiceClient)> =
            self.pool.write().await.drain().collect();
        info!(connections = drained.len(), "RPC plugin connections closed");
        Ok(())
    }
}

pub struct RpcPlugin {
    name: String,
    client: PluginServiceClient,
    timeout: Duration,
    config: HashMap<String, serde_json::Value>,
    info: PluginInfo,
}

#[async_trait]
impl Plugin for RpcPlugin {
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

        let request = RpcRequest::from(request.with_default_config(&self.config));
        call_cx
            .run(self.client.validate(rpc_context(&call_cx), request))
            .await
            .map_err(|e| PluginError::from_call(&self.name, e))?
            .map_err(|e| map_rpc_error(&self.name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tarpc::context;
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;
    use toolwarden_core::EventContext;

    fn fixture(name: &str) -> String {
        format!("{}/tests/fixtures/tls/{name}", env!("CARGO_MANIFEST_DIR"))
    }

    #[derive(Clone)]
    struct EchoPlugin {
        delay: Duration,
    }

    impl PluginService for EchoPlugin {
        async fn info(self, _: context::Context) -> PluginInfo {
            PluginInfo {
                name: "echo".into(),
                version: "0.3.0".into(),
                ..PluginInfo::default()
            }
        }

        async fn validate(self, _: context::Context, request: RpcRequest) -> PluginResponse {
            tokio::time::sleep(self.delay).await;
            let mut response = PluginResponse::pass();
            response.message = request.config.get("mode").cloned().unwrap_or_default();
            response
        }
    }

    async fn spawn_server(delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let service = EchoPlugin { delay };
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream, service.clone()));
            }
        });
        address
    }

    /// Plaintext server that counts accepted connections.
    async fn spawn_counting_server(accepted: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let service = EchoPlugin {
            delay: Duration::ZERO,
        };
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(stream, service.clone()));
            }
        });
        address
    }

    /// TLS server presenting the `localhost` certificate signed by `ca.pem`.
    async fn spawn_tls_server() -> String {
        let certs = CertificateDer::pem_file_iter(fixture("server.pem"))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let key = PrivateKeyDer::from_pem_file(fixture("server.key")).unwrap();
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let service = EchoPlugin {
            delay: Duration::ZERO,
        };
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let service = service.clone();
                tokio::spawn(async move {
                    if let Ok(stream) = acceptor.accept(stream).await {
                        serve_connection(stream, service).await;
                    }
                });
            }
        });
        address
    }

    fn tls_declaration(name: &str, address: &str, ca: &str) -> PluginConfig {
        let mut decl = declaration(name, address);
        decl.tls.enabled = Some(true);
        decl.tls.ca_file = Some(fixture(ca));
        decl
    }

    fn declaration(name: &str, address: &str) -> PluginConfig {
        toolwarden_config::AppConfig::from_toml_str(&format!(
            r#"
[[plugins.entries]]
name = "{name}"
type = "rpc"
address = "{address}"
"#
        ))
        .unwrap()
        .plugins
        .entries
        .remove(0)
    }

    #[test]
    fn config_values_encoded_as_strings() {
        let config = HashMap::from([
            ("mode".to_string(), serde_json::json!("strict")),
            ("limit".to_string(), serde_json::json!(3)),
            ("paths".to_string(), serde_json::json!(["a", "b"])),
        ]);
        let encoded = encode_config(config);
        assert_eq!(encoded["mode"], "strict");
        assert_eq!(encoded["limit"], "3");
        assert_eq!(encoded["paths"], r#"["a","b"]"#);
    }

    #[tokio::test]
    async fn load_validate_and_share_connection() {
        let address = spawn_server(Duration::ZERO).await;
        let loader = RpcLoader::new(Duration::from_secs(5));
        let cx = CallContext::background();

        let mut first = declaration("first", &address);
        first
            .config
            .insert("mode".into(), serde_json::json!("strict"));
        let a = loader.load(&cx, &first).await.unwrap();
        let b = loader.load(&cx, &declaration("second", &address)).await.unwrap();
        assert_eq!(a.info().version, "0.3.0");
        assert_eq!(loader.pool_size().await, 1);

        let request = PluginRequest::from_event(&EventContext::bash("ls"));
        let response = a.validate(&cx, request.clone()).await.unwrap();
        assert!(response.passed);
        assert_eq!(response.message, "strict");
        assert!(b.validate(&cx, request).await.unwrap().message.is_empty());
    }

    #[tokio::test]
    async fn concurrent_loads_dial_once() {
        let accepted = Arc::new(AtomicUsize::new(0));
        let address = spawn_counting_server(accepted.clone()).await;
        let loader = RpcLoader::new(Duration::from_secs(5));
        let cx = CallContext::background();

        let declarations: Vec<_> = (0..8)
            .map(|i| declaration(&format!("plugin-{i}"), &address))
            .collect();
        let loaded = futures::future::join_all(declarations.iter().map(|d| loader.load(&cx, d))).await;

        assert!(loaded.iter().all(Result::is_ok));
        assert_eq!(loader.pool_size().await, 1);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tls_handshake_with_configured_ca() {
        let address = spawn_tls_server().await;
        let loader = RpcLoader::new(Duration::from_secs(5));
        let cx = CallContext::background();

        let plugin = loader
            .load(&cx, &tls_declaration("secure", &address, "ca.pem"))
            .await
            .unwrap();
        assert_eq!(plugin.info().version, "0.3.0");
        let response = plugin
            .validate(&cx, PluginRequest::from_event(&EventContext::bash("ls")))
            .await
            .unwrap();
        assert!(response.passed);
    }

    #[tokio::test]
    async fn tls_server_name_override_is_verified() {
        let address = spawn_tls_server().await;
        let loader = RpcLoader::new(Duration::from_secs(5));

        let mut decl = tls_declaration("named", &address, "ca.pem");
        decl.tls.server_name = Some("localhost".into());
        assert!(loader.load(&CallContext::background(), &decl).await.is_ok());

        let other = RpcLoader::new(Duration::from_secs(5));
        let mut decl = tls_declaration("misnamed", &address, "ca.pem");
        decl.tls.server_name = Some("plugins.example.com".into());
        assert!(matches!(
            other.load(&CallContext::background(), &decl).await,
            Err(PluginError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn tls_handshake_rejects_unknown_ca() {
        let address = spawn_tls_server().await;
        let loader = RpcLoader::new(Duration::from_secs(5));

        match loader
            .load(
                &CallContext::background(),
                &tls_declaration("untrusted", &address, "other-ca.pem"),
            )
            .await
        {
            Err(PluginError::Transport { name, reason }) => {
                assert_eq!(name, "untrusted");
                assert!(reason.contains("TLS handshake"), "{reason}");
            }
            Err(e) => panic!("expected handshake failure, got {e}"),
            Ok(_) => panic!("expected handshake failure"),
        }
        assert_eq!(loader.pool_size().await, 0);
    }

    #[tokio::test]
    async fn caller_deadline_interrupts_slow_plugin() {
        let address = spawn_server(Duration::from_secs(10)).await;
        let loader = RpcLoader::new(Duration::from_secs(30));
        let plugin = loader
            .load(&CallContext::background(), &declaration("slow", &address))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let err = plugin
            .validate(
                &CallContext::with_timeout(Duration::from_millis(200)),
                PluginRequest::from_event(&EventContext::bash("ls")),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn closed_loader_fails_fast() {
        let loader = RpcLoader::new(Duration::from_secs(1));
        loader.close().await.unwrap();
        loader.close().await.unwrap();
        match loader
            .load(&CallContext::background(), &declaration("late", "127.0.0.1:1"))
            .await
        {
            Err(PluginError::LoaderClosed) => {}
            _ => panic!("expected loader closed"),
        }
    }

    #[tokio::test]
    async fn remote_plaintext_rejected_at_load() {
        let loader = RpcLoader::new(Duration::from_secs(1));
        let mut decl = declaration("remote", "plugins.example.com:9000");
        decl.tls.enabled = Some(false);
        match loader.load(&CallContext::background(), &decl).await {
            Err(PluginError::Tls { name, reason }) => {
                assert_eq!(name, "remote");
                assert!(reason.contains("allow_insecure_remote"));
            }
            _ => panic!("expected TLS policy error"),
        }
    }

    #[tokio::test]
    async fn half_key_pair_rejected_at_load() {
        let loader = RpcLoader::new(Duration::from_secs(1));
        let mut decl = declaration("mtls", "127.0.0.1:9000");
        decl.tls.cert_file = Some("/tmp/client.pem".into());
        assert!(matches!(
            loader.load(&CallContext::background(), &decl).await,
            Err(PluginError::Tls { .. })
        ));
    }

    #[tokio::test]
    async fn missing_address_reported() {
        let loader = RpcLoader::new(Duration::from_secs(1));
        let mut decl = declaration("noaddr", "127.0.0.1:1");
        decl.address = None;
        assert!(matches!(
            loader.load(&CallContext::background(), &decl).await,
            Err(PluginError::MissingField { .. })
        ));
    }
}
