//! # toolwarden Dispatch
//!
//! The composition point of the decision engine. A [`ValidatorRegistry`]
//! pairs every check with its predicate; the [`Dispatcher`] runs the checks
//! applicable to one event and reduces their results to a single
//! [`Verdict`](toolwarden_core::Verdict). [`DispatcherFactory`] assembles
//! both from configuration.

pub mod dispatcher;
pub mod factory;
pub mod registry;

pub use dispatcher::{DispatchOptions, Dispatcher};
pub use factory::{Build, BuildError, DispatcherFactory, build_from_config};
pub use registry::{RegisteredValidator, ValidatorRegistry};

/// Why a dispatch produced no verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch deadline exceeded")]
    DeadlineExceeded,

    #[error("dispatch cancelled")]
    Cancelled,
}

impl DispatchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::DeadlineExceeded)
    }
}
