//! Predicates — composable gates deciding whether a check applies to an event.
//!
//! Predicates are immutable, side-effect-free, and cheap to clone, so the
//! same predicate may be evaluated repeatedly and from many tasks at once.
//!
//! ```
//! use toolwarden_core::{EventContext, EventType, Predicate, ToolType};
//!
//! let git_push = Predicate::event_type_is(EventType::PreToolUse)
//!     .and(Predicate::tool_type_is(ToolType::Bash))
//!     .and(Predicate::git_subcommand_is("push"));
//!
//! assert!(git_push.matches(&EventContext::bash("git push origin main")));
//! assert!(!git_push.matches(&EventContext::bash("git status")));
//! ```

use std::fmt;
use std::sync::Arc;

use crate::event::{EventContext, EventType, ToolType};

type MatchFn = dyn Fn(&EventContext) -> bool + Send + Sync;

#[derive(Clone)]
pub struct Predicate {
    f: Arc<MatchFn>,
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate")
    }
}

impl Predicate {
    /// Build a predicate from any pure function of the event.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&EventContext) -> bool + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn matches(&self, event: &EventContext) -> bool {
        (self.f)(event)
    }

    pub fn always() -> Self {
        Self::from_fn(|_| true)
    }

    pub fn never() -> Self {
        Self::from_fn(|_| false)
    }

    // ── Primitives ─────────────────────────────────────────────────

    pub fn event_type_is(event_type: EventType) -> Self {
        Self::from_fn(move |e| e.event_type == event_type)
    }

    pub fn tool_type_is(tool_type: ToolType) -> Self {
        Self::from_fn(move |e| e.tool_type == tool_type)
    }

    pub fn tool_type_in(tool_types: &[ToolType]) -> Self {
        let tool_types = tool_types.to_vec();
        Self::from_fn(move |e| tool_types.contains(&e.tool_type))
    }

    /// Any file-modifying tool (Write, Edit, MultiEdit).
    pub fn file_tool() -> Self {
        Self::from_fn(|e| e.tool_type.is_file_tool())
    }

    /// Case-insensitive extension match; accepts `md` or `.md`.
    pub fn file_extension_is(extension: &str) -> Self {
        let wanted = extension.trim_start_matches('.').to_ascii_lowercase();
        Self::from_fn(move |e| e.file_extension().as_deref() == Some(wanted.as_str()))
    }

    pub fn file_path_contains(needle: &str) -> Self {
        let needle = needle.to_string();
        Self::from_fn(move |e| e.file_path().is_some_and(|p| p.contains(&needle)))
    }

    pub fn command_contains(needle: &str) -> Self {
        let needle = needle.to_string();
        Self::from_fn(move |e| e.command().is_some_and(|c| c.contains(&needle)))
    }

    pub fn git_subcommand_is(subcommand: &str) -> Self {
        let subcommand = subcommand.to_string();
        Self::from_fn(move |e| e.git_subcommand() == Some(subcommand.as_str()))
    }

    // ── Combinators ────────────────────────────────────────────────

    pub fn and(self, other: Predicate) -> Self {
        Self::from_fn(move |e| self.matches(e) && other.matches(e))
    }

    pub fn or(self, other: Predicate) -> Self {
        Self::from_fn(move |e| self.matches(e) || other.matches(e))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::from_fn(move |e| !self.matches(e))
    }

    /// True when every predicate matches (true for an empty list).
    pub fn all(predicates: Vec<Predicate>) -> Self {
        Self::from_fn(move |e| predicates.iter().all(|p| p.matches(e)))
    }

    /// True when any predicate matches (false for an empty list).
    pub fn any(predicates: Vec<Predicate>) -> Self {
        Self::from_fn(move |e| predicates.iter().any(|p| p.matches(e)))
    }
}
