//! Dispatcher — runs the applicable validators and reduces their results.
//!
//! Sequential mode runs validators one after another in registration order.
//! Parallel mode runs them all at once, bounded per [`Category`]:
//! CPU checks by the worker count, IO checks by twice that, and git checks
//! one at a time. Either way results are aggregated in registration order,
//! so the verdict never depends on scheduling.
//!
//! A validator that fails or exceeds its own timeout becomes a blocking
//! result for that validator only. The caller's deadline or cancellation
//! ends the whole dispatch with a [`DispatchError`].

use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use toolwarden_config::DispatchConfig;
use toolwarden_core::{
    CallContext, CallError, Category, EventContext, ValidationResult, Validator, ValidatorError,
    Verdict, aggregate,
};
use tracing::{debug, error, info, warn};

use crate::DispatchError;
use crate::registry::ValidatorRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOptions {
    pub parallel: bool,
    pub cpu_workers: usize,
    pub io_workers: usize,
    /// Upper bound for each validator, inside the caller's deadline.
    pub validator_timeout: Option<Duration>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

impl DispatchOptions {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            parallel: config.parallel,
            cpu_workers: config.cpu_worker_count(),
            io_workers: config.io_worker_count(),
            validator_timeout: config.validator_timeout_ms.map(Duration::from_millis),
        }
    }

    /// How many plugins the plugin registry may invoke at once: one in
    /// sequential mode, otherwise the IO pool size.
    pub fn plugin_concurrency(&self) -> usize {
        if self.parallel {
            self.io_workers.max(1)
        } else {
            1
        }
    }
}

struct Limits {
    cpu: Semaphore,
    io: Semaphore,
    git: Semaphore,
}

impl Limits {
    fn for_category(&self, category: Category) -> &Semaphore {
        match category {
            Category::Cpu => &self.cpu,
            Category::Io => &self.io,
            Category::Git => &self.git,
        }
    }
}

pub struct Dispatcher {
    registry: ValidatorRegistry,
    options: DispatchOptions,
    limits: Limits,
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn new(registry: ValidatorRegistry, options: DispatchOptions) -> Self {
        let limits = Limits {
            cpu: Semaphore::new(options.cpu_workers.max(1)),
            io: Semaphore::new(options.io_workers.max(1)),
            git: Semaphore::new(1),
        };
        Self {
            registry,
            options,
            limits,
            closed: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Evaluate one event.
    pub async fn dispatch(
        &self,
        cx: &CallContext,
        event: &EventContext,
    ) -> Result<Verdict, DispatchError> {
        cx.check()?;
        let started = Instant::now();

        let applicable = self.registry.applicable_for(event);
        if applicable.is_empty() {
            debug!(event = %event.event_type, tool = %event.tool_type, "No applicable validators");
            return Ok(Verdict::pass());
        }

        let results = cx.run(self.run_all(cx, event, &applicable)).await??;
        let verdict = aggregate(results);

        info!(
            decision = %verdict.decision,
            validators = verdict.validators.len(),
            blocked_by = verdict.blocked_by.as_deref().unwrap_or("-"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Dispatch complete"
        );
        Ok(verdict)
    }

    async fn run_all(
        &self,
        cx: &CallContext,
        event: &EventContext,
        applicable: &[Arc<dyn Validator>],
    ) -> Result<Vec<(String, ValidationResult)>, DispatchError> {
        if !self.options.parallel {
            let mut results = Vec::with_capacity(applicable.len());
            for validator in applicable {
                results.push(self.run_one(cx, event, validator.as_ref()).await?);
            }
            return Ok(results);
        }

        join_all(applicable.iter().map(|validator| async move {
            let _permit = self
                .limits
                .for_category(validator.category())
                .acquire()
                .await
                .map_err(|_| DispatchError::Cancelled)?;
            self.run_one(cx, event, validator.as_ref()).await
        }))
        .await
        .into_iter()
        .collect()
    }

    async fn run_one(
        &self,
        cx: &CallContext,
        event: &EventContext,
        validator: &dyn Validator,
    ) -> Result<(String, ValidationResult), DispatchError> {
        let name = validator.name().to_string();
        let child = match self.options.validator_timeout {
            Some(timeout) => cx.child_with_timeout(timeout),
            None => cx.child(),
        };

        let started = Instant::now();
        let outcome = match child.run(validator.validate(&child, event)).await {
            Ok(outcome) => outcome,
            Err(call) => Err(ValidatorError::from_call(&name, call)),
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                if let Err(call) = cx.check() {
                    return Err(call.into());
                }
                if e.is_timeout() {
                    warn!(validator = %name, kind = e.kind(), "Validator timed out");
                } else {
                    error!(validator = %name, kind = e.kind(), error = %e, "Validator failed");
                }
                e.into_result().with_detail("validator", name.clone())
            }
        };

        debug!(
            validator = %name,
            decision = %result.decision(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Validator finished"
        );
        Ok((name, result))
    }

    /// Close every validator once. Later calls do nothing.
    pub async fn close(&self) -> Vec<ValidatorError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        let mut errors = Vec::new();
        for validator in self.registry.validators() {
            if let Err(e) = validator.close().await {
                warn!(validator = %validator.name(), error = %e, "Validator close failed");
                errors.push(e);
            }
        }
        errors
    }
}

impl From<CallError> for DispatchError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::DeadlineExceeded => DispatchError::DeadlineExceeded,
            CallError::Cancelled => DispatchError::Cancelled,
        }
    }
}
