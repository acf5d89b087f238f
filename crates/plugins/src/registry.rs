//! Plugin registry — owns loaded plugins and their compiled predicates.
//!
//! The registry is built once at startup from the `[plugins]` section. Each
//! declaration is routed to the loader for its transport; a declaration that
//! fails to load is reported and skipped, never fatal to the others.
//!
//! To the dispatcher the whole registry is a single validator
//! ([`PluginRegistryValidator`]) that runs every applicable plugin and
//! reduces their answers with the same aggregation as top-level dispatch.
//! At most [`PluginRegistryValidator::with_concurrency`] plugins are in
//! flight at once; the default of one runs them strictly in load order.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use toolwarden_config::{PluginConfig, PluginsConfig};
use toolwarden_core::{
    CallContext, Category, EventContext, PluginError, Predicate, ValidationResult, Validator,
    ValidatorError, aggregate,
};
use toolwarden_security::PluginPathPolicy;
use tracing::{debug, error, info, warn};

use crate::native::NativeLoader;
use crate::plugin::{Plugin, PluginLoader};
use crate::predicate::PredicateMatcher;
use crate::rpc::RpcLoader;
use crate::subprocess::SubprocessLoader;
use crate::types::{PluginRequest, Transport};

/// Name under which the registry is registered with the dispatcher.
pub const PLUGINS_VALIDATOR_NAME: &str = "plugins";

/// One loaded plugin and the predicate gating it.
pub struct PluginEntry {
    pub name: String,
    pub transport: Transport,
    pub plugin: Arc<dyn Plugin>,
    pub matcher: PredicateMatcher,
    pub validator: Arc<PluginValidator>,
}

impl PluginEntry {
    pub fn new(
        name: impl Into<String>,
        transport: Transport,
        plugin: Arc<dyn Plugin>,
        matcher: PredicateMatcher,
    ) -> Self {
        let name = name.into();
        let validator = Arc::new(PluginValidator {
            name: name.clone(),
            plugin: plugin.clone(),
        });
        Self {
            name,
            transport,
            plugin,
            matcher,
            validator,
        }
    }

    pub fn applies_to(&self, event: &EventContext) -> bool {
        self.matcher.matches(event)
    }
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.name)
            .field("transport", &self.transport)
            .field("info", self.plugin.info())
            .finish()
    }
}

pub struct PluginRegistry {
    entries: RwLock<Vec<Arc<PluginEntry>>>,
    loaders: HashMap<Transport, Arc<dyn PluginLoader>>,
    closed: AtomicBool,
}

impl PluginRegistry {
    /// An empty registry with no loaders.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            loaders: HashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// A registry with the subprocess, RPC, and native loaders installed.
    pub fn with_default_loaders(policy: PluginPathPolicy, default_timeout: Duration) -> Self {
        Self::new()
            .with_loader(Arc::new(SubprocessLoader::new(
                policy.clone(),
                default_timeout,
            )))
            .with_loader(Arc::new(RpcLoader::new(default_timeout)))
            .with_loader(Arc::new(NativeLoader::new(policy)))
    }

    /// Install a loader, replacing any existing one for its transport.
    pub fn with_loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loaders.insert(loader.transport(), loader);
        self
    }

    /// Add an already loaded plugin.
    pub fn register(&self, entry: PluginEntry) -> Arc<PluginEntry> {
        let entry = Arc::new(entry);
        self.write_entries().push(entry.clone());
        entry
    }

    /// Load every enabled declaration. Returns the errors of the ones that failed.
    pub async fn load_all(&self, cx: &CallContext, config: &PluginsConfig) -> Vec<PluginError> {
        if !config.enabled {
            debug!("Plugins disabled");
            return Vec::new();
        }

        let mut errors = Vec::new();
        for declaration in config.entries.iter().filter(|d| d.enabled) {
            let started = Instant::now();
            match self.load_one(cx, declaration).await {
                Ok(entry) => info!(
                    plugin = %entry.name,
                    transport = %entry.transport,
                    version = %entry.plugin.info().version,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Plugin loaded"
                ),
                Err(e) => {
                    warn!(plugin = %declaration.name, error = %e, "Plugin failed to load");
                    errors.push(e);
                }
            }
        }
        errors
    }

    async fn load_one(
        &self,
        cx: &CallContext,
        declaration: &PluginConfig,
    ) -> Result<Arc<PluginEntry>, PluginError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PluginError::LoaderClosed);
        }

        let name = declaration.name.as_str();
        if name.trim().is_empty() {
            return Err(PluginError::MissingField {
                name: "<unnamed>".into(),
                field: "name".into(),
            });
        }
        if self.get(name).is_some() {
            return Err(PluginError::LoadFailed {
                name: name.into(),
                reason: "a plugin with this name is already loaded".into(),
            });
        }

        let unsupported = || PluginError::UnsupportedTransport {
            name: name.into(),
            transport: declaration.transport.clone(),
        };
        let transport = Transport::parse(&declaration.transport).ok_or_else(unsupported)?;
        let loader = self.loaders.get(&transport).ok_or_else(unsupported)?;

        let matcher = PredicateMatcher::compile(name, &declaration.predicate)?;
        let plugin = loader.load(cx, declaration).await?;
        Ok(self.register(PluginEntry::new(name, transport, plugin, matcher)))
    }

    /// Entries whose predicate matches, in load order.
    pub fn applicable_for(&self, event: &EventContext) -> Vec<Arc<PluginEntry>> {
        self.read_entries()
            .iter()
            .filter(|e| e.applies_to(event))
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> Vec<Arc<PluginEntry>> {
        self.read_entries().clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<PluginEntry>> {
        self.read_entries().iter().find(|e| e.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Close every plugin, then every loader. Runs once; errors are collected.
    pub async fn close(&self) -> Vec<PluginError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }

        let mut errors = Vec::new();
        for entry in self.entries() {
            if let Err(e) = entry.plugin.close().await {
                warn!(plugin = %entry.name, error = %e, "Plugin close failed");
                errors.push(e);
            }
        }
        for loader in self.loaders.values() {
            if let Err(e) = loader.close().await {
                warn!(transport = %loader.transport(), error = %e, "Plugin loader close failed");
                errors.push(e);
            }
        }
        errors
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<PluginEntry>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<PluginEntry>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts one plugin to the [`Validator`] contract.
pub struct PluginValidator {
    name: String,
    plugin: Arc<dyn Plugin>,
}

#[async_trait]
impl Validator for PluginValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> Category {
        Category::Io
    }

    async fn validate(
        &self,
        cx: &CallContext,
        event: &EventContext,
    ) -> Result<ValidationResult, ValidatorError> {
        let started = Instant::now();
        let response = self
            .plugin
            .validate(cx, PluginRequest::from_event(event))
            .await?;
        debug!(
            plugin = %self.name,
            passed = response.passed,
            should_block = response.should_block,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Plugin responded"
        );
        Ok(response.into_result(&self.name))
    }
}

/// The whole registry as one validator.
pub struct PluginRegistryValidator {
    registry: Arc<PluginRegistry>,
    concurrency: usize,
}

impl PluginRegistryValidator {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            concurrency: 1,
        }
    }

    /// Bound the number of plugins invoked concurrently for one event.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Matches when at least one loaded plugin applies.
    pub fn predicate(&self) -> Predicate {
        let registry = self.registry.clone();
        Predicate::from_fn(move |event| registry.read_entries().iter().any(|e| e.applies_to(event)))
    }
}

#[async_trait]
impl Validator for PluginRegistryValidator {
    fn name(&self) -> &str {
        PLUGINS_VALIDATOR_NAME
    }

    fn category(&self) -> Category {
        Category::Io
    }

    async fn validate(
        &self,
        cx: &CallContext,
        event: &EventContext,
    ) -> Result<ValidationResult, ValidatorError> {
        let applicable = self.registry.applicable_for(event);
        if applicable.is_empty() {
            return Ok(ValidationResult::pass());
        }

        // `buffered` keeps answers in load order while capping how many run.
        let mut outcomes = stream::iter(applicable.iter().map(|entry| async move {
            (entry, entry.validator.validate(cx, event).await)
        }).collect::<Vec<_>>())
        .buffered(self.concurrency);

        let mut results = Vec::with_capacity(applicable.len());
        while let Some((entry, outcome)) = outcomes.next().await {
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    // The caller's own deadline or cancellation ends the whole dispatch.
                    if let Err(call) = cx.check() {
                        return Err(ValidatorError::from_call(PLUGINS_VALIDATOR_NAME, call));
                    }
                    if e.is_timeout() {
                        warn!(plugin = %entry.name, kind = e.kind(), "Plugin timed out");
                    } else {
                        error!(plugin = %entry.name, kind = e.kind(), error = %e, "Plugin failed");
                    }
                    e.into_result().with_detail("plugin", entry.name.clone())
                }
            };
            results.push((entry.name.clone(), result));
        }

        Ok(aggregate(results).result)
    }

    async fn close(&self) -> Result<(), ValidatorError> {
        let errors = self.registry.close().await;
        if errors.is_empty() {
            return Ok(());
        }
        let reason = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(ValidatorError::Failed {
            name: PLUGINS_VALIDATOR_NAME.into(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PluginInfo, PluginResponse};
    use std::sync::atomic::AtomicUsize;
    use toolwarden_config::{AppConfig, PredicateConfig};

    enum Behavior {
        Pass,
        Warn(&'static str),
        Block(&'static str),
        Fail,
        Sleep(Duration),
        Tracked(Arc<Gauge>),
    }

    /// Counts plugins currently inside `validate` and the highest count seen.
    #[derive(Default)]
    struct Gauge {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    struct MockPlugin {
        info: PluginInfo,
        behavior: Behavior,
        calls: AtomicUsize,
        closes: AtomicUsize,
    }

    impl MockPlugin {
        fn new(name: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                info: PluginInfo {
                    name: name.into(),
                    version: "1.0.0".into(),
                    ..PluginInfo::default()
                },
                behavior,
                calls: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Plugin for MockPlugin {
        fn info(&self) -> &PluginInfo {
            &self.info
        }

        async fn validate(
            &self,
            cx: &CallContext,
            _request: PluginRequest,
        ) -> Result<PluginResponse, PluginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Pass => Ok(PluginResponse::pass()),
                Behavior::Warn(m) => Ok(PluginResponse::warn(*m)),
                Behavior::Block(m) => Ok(PluginResponse::block(*m)),
                Behavior::Fail => Err(PluginError::Transport {
                    name: self.info.name.clone(),
                    reason: "connection reset".into(),
                }),
                Behavior::Sleep(d) => {
                    let cx = cx.child_or_timeout(Duration::from_millis(50));
                    cx.run(tokio::time::sleep(*d))
                        .await
                        .map_err(|e| PluginError::from_call(&self.info.name, e))?;
                    Ok(PluginResponse::pass())
                }
                Behavior::Tracked(gauge) => {
                    let now = gauge.running.fetch_add(1, Ordering::SeqCst) + 1;
                    gauge.peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    gauge.running.fetch_sub(1, Ordering::SeqCst);
                    Ok(PluginResponse::pass())
                }
            }
        }

        async fn close(&self) -> Result<(), PluginError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn tools(names: &[&str]) -> PredicateMatcher {
        PredicateMatcher::compile(
            "test",
            &PredicateConfig {
                tool_types: names.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn add(registry: &PluginRegistry, plugin: Arc<MockPlugin>, matcher: PredicateMatcher) {
        let name = plugin.info.name.clone();
        registry.register(PluginEntry::new(name, Transport::Subprocess, plugin, matcher));
    }

    #[tokio::test]
    async fn shell_event_selects_only_shell_plugin() {
        let registry = Arc::new(PluginRegistry::new());
        let shell = MockPlugin::new("shell-guard", Behavior::Pass);
        let write = MockPlugin::new("write-guard", Behavior::Block("never"));
        add(&registry, shell.clone(), tools(&["Bash"]));
        add(&registry, write.clone(), tools(&["Write"]));

        let event = EventContext::bash("ls -la");
        let applicable = registry.applicable_for(&event);
        assert_eq!(applicable.len(), 1);
        assert_eq!(applicable[0].name, "shell-guard");

        let validator = PluginRegistryValidator::new(registry);
        assert!(validator.predicate().matches(&event));
        let result = validator
            .validate(&CallContext::background(), &event)
            .await
            .unwrap();
        assert!(result.passed);
        assert_eq!(shell.calls.load(Ordering::SeqCst), 1);
        assert_eq!(write.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn results_are_aggregated_in_load_order() {
        let registry = Arc::new(PluginRegistry::new());
        add(&registry, MockPlugin::new("a", Behavior::Warn("style")), tools(&[]));
        add(&registry, MockPlugin::new("b", Behavior::Block("no")), tools(&[]));
        add(&registry, MockPlugin::new("c", Behavior::Block("also no")), tools(&[]));

        let result = PluginRegistryValidator::new(registry)
            .validate(&CallContext::background(), &EventContext::bash("x"))
            .await
            .unwrap();
        assert!(result.is_blocking());
        assert!(result.message.starts_with("no"));
        assert!(result.message.contains("- style"));
        assert_eq!(result.details.get("plugin").map(String::as_str), Some("b"));
    }

    #[tokio::test]
    async fn failing_plugin_blocks_without_stopping_others() {
        let registry = Arc::new(PluginRegistry::new());
        let healthy = MockPlugin::new("healthy", Behavior::Warn("careful"));
        add(&registry, MockPlugin::new("broken", Behavior::Fail), tools(&[]));
        add(&registry, healthy.clone(), tools(&[]));

        let result = PluginRegistryValidator::new(registry)
            .validate(&CallContext::background(), &EventContext::bash("x"))
            .await
            .unwrap();
        assert!(result.is_blocking());
        assert!(result.message.starts_with("Plugin error:"));
        assert!(result.message.contains("careful"));
        assert_eq!(
            result.details.get("error_kind").map(String::as_str),
            Some("plugin_error")
        );
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn plugin_timeout_is_a_blocking_result() {
        let registry = Arc::new(PluginRegistry::new());
        add(
            &registry,
            MockPlugin::new("slow", Behavior::Sleep(Duration::from_secs(5))),
            tools(&[]),
        );

        let result = PluginRegistryValidator::new(registry)
            .validate(&CallContext::background(), &EventContext::bash("x"))
            .await
            .unwrap();
        assert!(result.is_blocking());
        assert_eq!(
            result.details.get("error_kind").map(String::as_str),
            Some("timeout")
        );
    }

    #[tokio::test]
    async fn caller_deadline_propagates() {
        let registry = Arc::new(PluginRegistry::new());
        add(
            &registry,
            MockPlugin::new("slow", Behavior::Sleep(Duration::from_secs(5))),
            tools(&[]),
        );

        let cx = CallContext::with_timeout(Duration::from_millis(30));
        let err = PluginRegistryValidator::new(registry)
            .validate(&cx, &EventContext::bash("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidatorError::Timeout { .. }));
    }

    async fn peak_with_concurrency(limit: Option<usize>) -> usize {
        let registry = Arc::new(PluginRegistry::new());
        let gauge = Arc::new(Gauge::default());
        for i in 0..6 {
            let plugin = MockPlugin::new(&format!("p{i}"), Behavior::Tracked(gauge.clone()));
            add(&registry, plugin, tools(&[]));
        }

        let mut validator = PluginRegistryValidator::new(registry);
        if let Some(limit) = limit {
            validator = validator.with_concurrency(limit);
        }
        let result = validator
            .validate(&CallContext::background(), &EventContext::bash("x"))
            .await
            .unwrap();
        assert!(result.passed);
        gauge.peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn plugins_run_one_at_a_time_by_default() {
        assert_eq!(peak_with_concurrency(None).await, 1);
    }

    #[tokio::test]
    async fn concurrency_limit_caps_plugins_in_flight() {
        assert_eq!(peak_with_concurrency(Some(2)).await, 2);
        assert_eq!(peak_with_concurrency(Some(0)).await, 1);
    }

    #[tokio::test]
    async fn bounded_run_keeps_load_order() {
        let registry = Arc::new(PluginRegistry::new());
        add(
            &registry,
            MockPlugin::new("slow-block", Behavior::Sleep(Duration::from_millis(20))),
            tools(&[]),
        );
        add(&registry, MockPlugin::new("first-block", Behavior::Block("first")), tools(&[]));
        add(&registry, MockPlugin::new("second-block", Behavior::Block("second")), tools(&[]));

        let result = PluginRegistryValidator::new(registry)
            .with_concurrency(3)
            .validate(&CallContext::background(), &EventContext::bash("x"))
            .await
            .unwrap();
        assert!(result.message.starts_with("first"), "{}", result.message);
    }

    #[tokio::test]
    async fn no_plugins_never_applies() {
        let validator = PluginRegistryValidator::new(Arc::new(PluginRegistry::new()));
        assert!(!validator.predicate().matches(&EventContext::bash("ls")));
        let result = validator
            .validate(&CallContext::background(), &EventContext::bash("ls"))
            .await
            .unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn close_runs_once() {
        let registry = Arc::new(PluginRegistry::new());
        let plugin = MockPlugin::new("p", Behavior::Pass);
        add(&registry, plugin.clone(), tools(&[]));

        let validator = PluginRegistryValidator::new(registry.clone());
        validator.close().await.unwrap();
        validator.close().await.unwrap();
        assert_eq!(plugin.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_errors_are_collected_per_plugin() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AppConfig::from_toml_str(&format!(
            r#"
[[plugins.entries]]
name = "wasm"
type = "wasm"
path = "{dir}/x.wasm"

[[plugins.entries]]
name = "bad-regex"
type = "subprocess"
path = "{dir}/x"
[plugins.entries.predicate]
command_patterns = ["("]

[[plugins.entries]]
name = "escape"
type = "subprocess"
path = "{dir}/../x"

[[plugins.entries]]
name = "remote"
type = "rpc"

[[plugins.entries]]
name = "off"
type = "wasm"
enabled = false
"#,
            dir = tmp.path().display()
        ))
        .unwrap();

        let registry = PluginRegistry::with_default_loaders(
            PluginPathPolicy::new(vec![tmp.path().to_path_buf()]),
            Duration::from_secs(1),
        );
        let errors = registry
            .load_all(&CallContext::background(), &config.plugins)
            .await;

        assert_eq!(errors.len(), 4);
        assert!(matches!(errors[0], PluginError::UnsupportedTransport { .. }));
        assert!(matches!(errors[1], PluginError::InvalidPredicate { .. }));
        assert!(matches!(errors[2], PluginError::Security { .. }));
        assert!(matches!(errors[3], PluginError::MissingField { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn disabled_section_loads_nothing() {
        let config = AppConfig::from_toml_str(
            "[plugins]\nenabled = false\n[[plugins.entries]]\nname = \"x\"\ntype = \"wasm\"\n",
        )
        .unwrap();
        let errors = PluginRegistry::new()
            .load_all(&CallContext::background(), &config.plugins)
            .await;
        assert!(errors.is_empty());
    }
}
