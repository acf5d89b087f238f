//! Factory — assembles a [`Dispatcher`] from configuration.
//!
//! Registration order (and so aggregation order) is: built-in validators,
//! the rule engine adapter, then the plugin registry. Every construction
//! error is collected; nothing that fails to build stops the rest.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use toolwarden_config::AppConfig;
use toolwarden_core::{CallContext, PluginError, ValidatorError};
use toolwarden_plugins::{PluginRegistry, PluginRegistryValidator};
use toolwarden_rules::{RuleEngine, RuleError, RuleValidator};
use toolwarden_security::PluginPathPolicy;
use toolwarden_validators::BuiltinFactory;
use tracing::info;

use crate::dispatcher::{DispatchOptions, Dispatcher};
use crate::registry::ValidatorRegistry;

/// One thing that failed to build.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("validator: {0}")]
    Validator(#[from] ValidatorError),

    #[error("rule: {0}")]
    Rule(#[from] RuleError),

    #[error("plugin: {0}")]
    Plugin(#[from] PluginError),
}

/// A ready dispatcher plus handles for inspection.
pub struct Build {
    pub dispatcher: Dispatcher,
    pub rules: Arc<RuleEngine>,
    pub plugins: Arc<PluginRegistry>,
    pub errors: Vec<BuildError>,
}

pub struct DispatcherFactory {
    config: AppConfig,
    project_root: Option<PathBuf>,
    builtins: Option<BuiltinFactory>,
}

impl DispatcherFactory {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            project_root: None,
            builtins: None,
        }
    }

    /// Project whose `.toolwarden/plugins` directory may hold plugins; also the git working tree.
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    /// Replace the built-in factory (tests inject a fake git runner this way).
    pub fn with_builtins(mut self, builtins: BuiltinFactory) -> Self {
        self.builtins = Some(builtins);
        self
    }

    pub fn plugin_policy(&self) -> PluginPathPolicy {
        PluginPathPolicy::for_plugin_dirs(
            self.config.global_plugin_dir(),
            self.project_root
                .as_deref()
                .map(AppConfig::project_plugin_dir),
        )
    }

    pub async fn build(mut self, cx: &CallContext) -> Build {
        let mut registry = ValidatorRegistry::new();
        let mut errors: Vec<BuildError> = Vec::new();

        let builtins = self.builtins.take().unwrap_or_else(|| {
            BuiltinFactory::new(self.config.validators.clone(), self.project_root.clone())
        });
        let (built, builtin_errors) = builtins.build();
        for builtin in built {
            registry.register(builtin.validator, builtin.predicate);
        }
        errors.extend(builtin_errors.into_iter().map(BuildError::from));

        let rules = if self.config.rules.enabled {
            let (engine, rule_errors) = RuleEngine::from_config(&self.config.rules);
            errors.extend(rule_errors.into_iter().map(BuildError::from));
            Arc::new(engine)
        } else {
            Arc::new(RuleEngine::empty())
        };
        let rule_validator = RuleValidator::new(rules.clone());
        let rule_predicate = rule_validator.predicate();
        registry.register(Arc::new(rule_validator), rule_predicate);

        let plugins = Arc::new(PluginRegistry::with_default_loaders(
            self.plugin_policy(),
            Duration::from_millis(self.config.plugins.default_timeout_ms),
        ));
        let plugin_errors = plugins.load_all(cx, &self.config.plugins).await;
        errors.extend(plugin_errors.into_iter().map(BuildError::from));
        let options = DispatchOptions::from_config(&self.config.dispatch);
        let plugin_validator = PluginRegistryValidator::new(plugins.clone())
            .with_concurrency(options.plugin_concurrency());
        let plugin_predicate = plugin_validator.predicate();
        registry.register(Arc::new(plugin_validator), plugin_predicate);

        info!(
            validators = registry.len(),
            rules = rules.active_count(),
            plugins = plugins.len(),
            errors = errors.len(),
            "Dispatcher built"
        );

        Build {
            dispatcher: Dispatcher::new(registry, options),
            rules,
            plugins,
            errors,
        }
    }
}

/// Build a dispatcher from `config`, scoped to `project_root` when known.
pub async fn build_from_config(
    cx: &CallContext,
    config: AppConfig,
    project_root: Option<&Path>,
) -> Build {
    let mut factory = DispatcherFactory::new(config);
    if let Some(root) = project_root {
        factory = factory.with_project_root(root);
    }
    factory.build(cx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolwarden_core::{Decision, EventContext};

    fn config(toml: &str) -> AppConfig {
        AppConfig::from_toml_str(toml).unwrap()
    }

    #[tokio::test]
    async fn registers_in_fixed_order() {
        let build = DispatcherFactory::new(AppConfig::default())
            .build(&CallContext::background())
            .await;
        assert!(build.errors.is_empty());
        assert_eq!(
            build.dispatcher.registry().names(),
            [
                "shell.dangerous_commands",
                "file.sensitive_paths",
                "git.push",
                "git.commit",
                "rules",
                "plugins"
            ]
        );
    }

    #[tokio::test]
    async fn errors_from_every_source_are_collected() {
        let build = DispatcherFactory::new(config(
            r#"
[validators.shell]
extra_blocked_patterns = ["("]

[[rules.rules]]
name = "broken"
[rules.rules.match]
command_pattern = "re:("

[[plugins.entries]]
name = "lua"
type = "lua"
"#,
        ))
        .build(&CallContext::background())
        .await;

        assert_eq!(build.errors.len(), 3);
        assert!(matches!(build.errors[0], BuildError::Validator(_)));
        assert!(matches!(build.errors[1], BuildError::Rule(_)));
        assert!(matches!(build.errors[2], BuildError::Plugin(_)));
        // The rest still works.
        let verdict = build
            .dispatcher
            .dispatch(&CallContext::background(), &EventContext::write(".env", "X=1"))
            .await
            .unwrap();
        assert_eq!(verdict.decision, Decision::Block);
    }

    #[tokio::test]
    async fn rules_take_part_in_dispatch() {
        let build = DispatcherFactory::new(config(
            r#"
[validators.git]
enabled = false

[[rules.rules]]
name = "no-npm-publish"
[rules.rules.match]
command_pattern = "npm publish"
[rules.rules.action]
type = "warn"
message = "Publishing is done by CI"
"#,
        ))
        .build(&CallContext::background())
        .await;

        let verdict = build
            .dispatcher
            .dispatch(&CallContext::background(), &EventContext::bash("npm publish"))
            .await
            .unwrap();
        assert_eq!(verdict.decision, Decision::Warn);
        assert_eq!(verdict.message(), "Publishing is done by CI");
    }

    #[tokio::test]
    async fn disabled_rules_section_is_empty() {
        let build = DispatcherFactory::new(config(
            "[rules]\nenabled = false\n[[rules.rules]]\nname = \"x\"\n[rules.rules.match]\ncommand_pattern = \"ls\"\n",
        ))
        .build(&CallContext::background())
        .await;
        assert_eq!(build.rules.active_count(), 0);
    }
}
