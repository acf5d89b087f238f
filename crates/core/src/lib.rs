//! # toolwarden Core
//!
//! Domain types, traits, and error definitions for the toolwarden decision
//! engine. Every other crate depends inward on this one.
//!
//! ## Design Philosophy
//!
//! The engine answers one question per agent action: allow, warn, or block.
//! This crate defines the vocabulary for that question:
//! - [`EventContext`] — the action under evaluation
//! - [`Predicate`] — whether a check applies to an action
//! - [`Validator`] — a check producing a [`ValidationResult`]
//! - [`Verdict`] — the single reduced outcome of one dispatch
//! - [`CallContext`] — deadline and cancellation shared by every call
//!
//! Implementations (built-ins, rules, plugins, dispatch) live in their
//! respective crates.

pub mod context;
pub mod error;
pub mod event;
pub mod predicate;
pub mod result;
pub mod validator;

// Re-export key types at crate root for ergonomics
pub use context::CallContext;
pub use error::{CallError, PluginError, ValidatorError};
pub use event::{EventContext, EventType, ToolInput, ToolType, git_invocation, git_subcommand};
pub use predicate::Predicate;
pub use result::{Decision, ValidationResult, Verdict, aggregate};
pub use validator::{Category, Validator};
