//! End-to-end dispatch scenarios across validators, rules and plugins.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tarpc::context::Context;
use tokio::net::TcpListener;
use toolwarden_config::{AppConfig, PredicateConfig};
use toolwarden_core::{CallContext, Decision, EventContext, PluginError, Predicate};
use toolwarden_dispatch::{DispatchError, DispatchOptions, Dispatcher, ValidatorRegistry};
use toolwarden_plugins::native::NativeValidator;
use toolwarden_plugins::{
    NativePlugin, Plugin, PluginEntry, PluginInfo, PluginRegistry, PluginRegistryValidator, PluginRequest,
    PluginResponse, PluginService, PredicateMatcher, Transport, serve_connection,
};

/// Blocks any command containing one of its patterns.
struct Blocklist;

const DEFAULT_BLOCKED: &[&str] = &["rm -rf /", "mkfs", ":(){ :|:& };:"];

impl NativeValidator for Blocklist {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "blocklist".into(),
            version: "1.0.0".into(),
            description: "Blocks known destructive commands".into(),
            ..PluginInfo::default()
        }
    }

    fn validate(&self, request: &PluginRequest) -> Option<PluginResponse> {
        let command = request.command.as_deref().unwrap_or_default();
        Some(
            match DEFAULT_BLOCKED.iter().find(|p| command.contains(*p)) {
                Some(pattern) => {
                    let mut response =
                        PluginResponse::block(format!("Command matches blocked pattern '{pattern}'"));
                    response.error_code = "BLOCKED_COMMAND".into();
                    response
                }
                None => PluginResponse::pass(),
            },
        )
    }
}

/// Passes everything.
struct Quiet;

impl NativeValidator for Quiet {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "quiet".into(),
            version: "0.1.0".into(),
            ..PluginInfo::default()
        }
    }

    fn validate(&self, _request: &PluginRequest) -> Option<PluginResponse> {
        Some(PluginResponse::pass())
    }
}

toolwarden_plugins::declare_plugin_vtable!(BLOCKLIST, Blocklist, Blocklist);
toolwarden_plugins::declare_plugin_vtable!(QUIET, Quiet, Quiet);

fn tools(names: &[&str]) -> PredicateMatcher {
    PredicateMatcher::compile(
        "scenario",
        &PredicateConfig {
            tool_types: names.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        },
    )
    .unwrap()
}

fn dispatcher_over(plugins: Arc<PluginRegistry>, options: DispatchOptions) -> Dispatcher {
    let validator =
        PluginRegistryValidator::new(plugins).with_concurrency(options.plugin_concurrency());
    let predicate = validator.predicate();
    let mut registry = ValidatorRegistry::new();
    registry.register(Arc::new(validator), predicate);
    Dispatcher::new(registry, options)
}

#[tokio::test]
async fn destructive_command_is_blocked_by_plugin() {
    let plugins = Arc::new(PluginRegistry::new());
    let plugin = NativePlugin::from_vtable("blocklist", &BLOCKLIST).unwrap();
    plugins.register(PluginEntry::new(
        "blocklist",
        Transport::Native,
        Arc::new(plugin),
        tools(&["Bash"]),
    ));

    let dispatcher = dispatcher_over(plugins, DispatchOptions::default());
    let verdict = dispatcher
        .dispatch(&CallContext::background(), &EventContext::bash("rm -rf /"))
        .await
        .unwrap();

    assert_eq!(verdict.decision, Decision::Block);
    assert!(verdict.message().contains("rm -rf /"));
    assert_eq!(verdict.result.reference.as_deref(), Some("BLOCKED_COMMAND"));
    assert_eq!(
        verdict.result.details.get("plugin").map(String::as_str),
        Some("blocklist")
    );
}

#[tokio::test]
async fn destructive_command_is_blocked_by_builtins_and_plugin() {
    let plugins = Arc::new(PluginRegistry::new());
    let plugin = NativePlugin::from_vtable("blocklist", &BLOCKLIST).unwrap();
    plugins.register(PluginEntry::new(
        "blocklist",
        Transport::Native,
        Arc::new(plugin),
        tools(&["Bash"]),
    ));

    let build = toolwarden_dispatch::DispatcherFactory::new(AppConfig::default())
        .build(&CallContext::background())
        .await;
    let mut registry = ValidatorRegistry::new();
    for validator in build.dispatcher.registry().validators() {
        if validator.name() == "shell.dangerous_commands" {
            registry.register(validator.clone(), Predicate::always());
        }
    }
    let plugin_validator = PluginRegistryValidator::new(plugins);
    let predicate = plugin_validator.predicate();
    registry.register(Arc::new(plugin_validator), predicate);

    let dispatcher = Dispatcher::new(registry, DispatchOptions::default());
    let verdict = dispatcher
        .dispatch(&CallContext::background(), &EventContext::bash("rm -rf /"))
        .await
        .unwrap();
    assert!(verdict.is_blocked());
    // Registration order decides which block is reported.
    assert_eq!(verdict.blocked_by.as_deref(), Some("shell.dangerous_commands"));
}

#[tokio::test]
async fn shell_event_selects_one_of_two_plugins() {
    let plugins = Arc::new(PluginRegistry::new());
    plugins.register(PluginEntry::new(
        "shell-only",
        Transport::Native,
        Arc::new(NativePlugin::from_vtable("shell-only", &QUIET).unwrap()),
        tools(&["Bash"]),
    ));
    plugins.register(PluginEntry::new(
        "write-only",
        Transport::Native,
        Arc::new(NativePlugin::from_vtable("write-only", &BLOCKLIST).unwrap()),
        tools(&["Write"]),
    ));

    let event = EventContext::bash("ls -la");
    let applicable = plugins.applicable_for(&event);
    assert_eq!(applicable.len(), 1);
    assert_eq!(applicable[0].name, "shell-only");

    let verdict = dispatcher_over(plugins, DispatchOptions::default())
        .dispatch(&CallContext::background(), &event)
        .await
        .unwrap();
    assert_eq!(verdict.decision, Decision::Allow);
}

#[derive(Clone)]
struct SlowPlugin;

impl PluginService for SlowPlugin {
    async fn info(self, _: Context) -> PluginInfo {
        PluginInfo {
            name: "slow".into(),
            version: "1.0.0".into(),
            ..PluginInfo::default()
        }
    }

    async fn validate(
        self,
        _: Context,
        _request: toolwarden_plugins::RpcRequest,
    ) -> PluginResponse {
        tokio::time::sleep(Duration::from_secs(10)).await;
        PluginResponse::pass()
    }
}

#[tokio::test]
async fn slow_rpc_plugin_hits_caller_deadline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream, SlowPlugin));
        }
    });

    let config = AppConfig::from_toml_str(&format!(
        "[[plugins.entries]]\nname = \"slow\"\ntype = \"rpc\"\naddress = \"{address}\"\ntimeout_ms = 30000\n"
    ))
    .unwrap();
    let plugins = Arc::new(PluginRegistry::with_default_loaders(
        Default::default(),
        Duration::from_secs(5),
    ));
    let errors = plugins
        .load_all(&CallContext::background(), &config.plugins)
        .await;
    assert!(errors.is_empty(), "{errors:?}");

    let options = DispatchOptions {
        parallel: true,
        ..DispatchOptions::default()
    };
    let dispatcher = dispatcher_over(plugins.clone(), options);
    let cx = CallContext::with_timeout(Duration::from_millis(200));
    let started = std::time::Instant::now();
    let err = dispatcher
        .dispatch(&cx, &EventContext::bash("ls"))
        .await
        .unwrap_err();

    assert_eq!(err, DispatchError::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(dispatcher.close().await.is_empty());
}

/// Records how many instances are inside `validate` at the same moment.
struct Busy {
    info: PluginInfo,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Plugin for Busy {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    async fn validate(
        &self,
        _cx: &CallContext,
        _request: PluginRequest,
    ) -> Result<PluginResponse, PluginError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(PluginResponse::pass())
    }
}

async fn plugin_peak(options: DispatchOptions) -> usize {
    let plugins = Arc::new(PluginRegistry::new());
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    for i in 0..6 {
        let name = format!("busy-{i}");
        let plugin = Busy {
            info: PluginInfo {
                name: name.clone(),
                version: "1.0.0".into(),
                ..PluginInfo::default()
            },
            running: running.clone(),
            peak: peak.clone(),
        };
        plugins.register(PluginEntry::new(
            name,
            Transport::Subprocess,
            Arc::new(plugin),
            tools(&[]),
        ));
    }

    let verdict = dispatcher_over(plugins, options)
        .dispatch(&CallContext::background(), &EventContext::bash("ls"))
        .await
        .unwrap();
    assert_eq!(verdict.decision, Decision::Allow);
    peak.load(Ordering::SeqCst)
}

#[tokio::test]
async fn sequential_mode_runs_plugins_one_at_a_time() {
    let options = DispatchOptions {
        parallel: false,
        ..DispatchOptions::default()
    };
    assert_eq!(plugin_peak(options).await, 1);
}

#[tokio::test]
async fn parallel_plugins_share_the_io_bound() {
    let options = DispatchOptions {
        parallel: true,
        cpu_workers: 4,
        io_workers: 2,
        validator_timeout: None,
    };
    assert_eq!(plugin_peak(options).await, 2);
}
