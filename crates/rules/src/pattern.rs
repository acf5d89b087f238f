//! Rule patterns — plain substrings, globs, regexes, and their negations.
//!
//! The kind is taken from an explicit prefix (`re:` / `glob:`) when present,
//! otherwise inferred from the characters used:
//!
//! | pattern          | kind                         |
//! |------------------|------------------------------|
//! | `re:^git push`   | regex                        |
//! | `glob:*.env`     | glob                         |
//! | `^rm\s+-rf`      | regex (leading `^`, trailing `$`, or `\`, `(`, `|`, `.*`, `.+`) |
//! | `*.tf`           | glob (has `*`, `?` or `[`)   |
//! | `--no-verify`    | plain substring              |
//! | `g++`, `$HOME`   | plain substring              |
//! | `!*.md`          | negation of the rest         |
//!
//! An inferred regex that does not compile falls back to glob or plain
//! matching; only an explicit `re:` reports the parse error.

use glob::MatchOptions;
use regex_lite::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a multi-pattern field combines its patterns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternMode {
    /// At least one pattern must match.
    #[default]
    Any,
    /// Every pattern must match.
    All,
}

impl PatternMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" | "or" => Some(PatternMode::Any),
            "all" | "and" => Some(PatternMode::All),
            _ => None,
        }
    }
}

impl fmt::Display for PatternMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternMode::Any => f.write_str("any"),
            PatternMode::All => f.write_str("all"),
        }
    }
}

/// A compiled pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    Plain {
        needle: String,
        case_insensitive: bool,
    },
    Glob {
        pattern: glob::Pattern,
        case_insensitive: bool,
    },
    Regex(Regex),
    Negated(Box<Pattern>),
}

const REGEX_HINTS: &[&str] = &["\\", "(", "|", ".*", ".+"];
const GLOB_HINTS: &[char] = &['*', '?', '['];

impl Pattern {
    /// Compile a pattern source. Errors carry the underlying parser message.
    pub fn compile(source: &str, case_insensitive: bool) -> Result<Self, String> {
        if let Some(rest) = source.strip_prefix('!') {
            if rest.is_empty() {
                return Err("negation of an empty pattern".into());
            }
            return Ok(Pattern::Negated(Box::new(Self::compile(
                rest,
                case_insensitive,
            )?)));
        }

        if let Some(rest) = source.strip_prefix("re:") {
            return compile_regex(rest, case_insensitive);
        }
        if let Some(rest) = source.strip_prefix("glob:") {
            return compile_glob(rest, case_insensitive);
        }

        if source.is_empty() {
            return Err("empty pattern".into());
        }

        if looks_like_regex(source)
            && let Ok(pattern) = compile_regex(source, case_insensitive)
        {
            return Ok(pattern);
        }
        if source.contains(GLOB_HINTS)
            && let Ok(pattern) = compile_glob(source, case_insensitive)
        {
            return Ok(pattern);
        }
        Ok(Pattern::Plain {
            needle: if case_insensitive {
                source.to_lowercase()
            } else {
                source.to_string()
            },
            case_insensitive,
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            Pattern::Plain {
                needle,
                case_insensitive: true,
            } => text.to_lowercase().contains(needle.as_str()),
            Pattern::Plain { needle, .. } => text.contains(needle.as_str()),
            Pattern::Glob {
                pattern,
                case_insensitive,
            } => pattern.matches_with(
                text,
                MatchOptions {
                    case_sensitive: !case_insensitive,
                    require_literal_separator: false,
                    require_literal_leading_dot: false,
                },
            ),
            Pattern::Regex(re) => re.is_match(text),
            Pattern::Negated(inner) => !inner.matches(text),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Pattern::Plain { .. } => "plain",
            Pattern::Glob { .. } => "glob",
            Pattern::Regex(_) => "regex",
            Pattern::Negated(_) => "negated",
        }
    }
}

/// Anchors count only at the edges, so `$HOME` or `a^b` stay literal.
fn looks_like_regex(source: &str) -> bool {
    source.starts_with('^')
        || (source.ends_with('$') && source.len() > 1)
        || REGEX_HINTS.iter().any(|h| source.contains(h))
}

fn compile_regex(source: &str, case_insensitive: bool) -> Result<Pattern, String> {
    RegexBuilder::new(source)
        .case_insensitive(case_insensitive)
        .build()
        .map(Pattern::Regex)
        .map_err(|e| e.to_string())
}

fn compile_glob(source: &str, case_insensitive: bool) -> Result<Pattern, String> {
    glob::Pattern::new(source)
        .map(|pattern| Pattern::Glob {
            pattern,
            case_insensitive,
        })
        .map_err(|e| e.to_string())
}

/// Several patterns combined under one [`PatternMode`].
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
    mode: PatternMode,
}

impl PatternSet {
    pub fn new(patterns: Vec<Pattern>, mode: PatternMode) -> Self {
        Self { patterns, mode }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// An empty set matches nothing.
    pub fn matches(&self, text: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        match self.mode {
            PatternMode::Any => self.patterns.iter().any(|p| p.matches(text)),
            PatternMode::All => self.patterns.iter().all(|p| p.matches(text)),
        }
    }
}
