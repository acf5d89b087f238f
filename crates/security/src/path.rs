//! Path validation — plugin files must live under allowed plugin directories.
//!
//! The same checks apply to every transport that loads something from disk:
//! 1. No traversal segments (`..`) in the raw path
//! 2. No shell metacharacters
//! 3. `~` expands to the caller's home directory
//! 4. Symlinks are resolved on the candidate and on every allowed directory
//! 5. The resolved file name must end in an allowed extension, if any are set
//! 6. The resolved path must equal or nest under an allowed directory

use std::path::{Component, Path, PathBuf};

/// Characters that never appear in a legitimate plugin path.
pub const FORBIDDEN_CHARS: &[char] = &[';', '|', '&', '$', '`', '"', '\'', '<', '>', '(', ')'];

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Path '{path}' contains forbidden character '{character}'")]
    ForbiddenCharacter { path: String, character: char },

    #[error("Path '{path}' does not have an allowed extension ({allowed})")]
    DisallowedExtension { path: String, allowed: String },

    #[error("Path '{path}' is outside allowed plugin directories")]
    OutsideAllowedRoots { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// Where plugins may be loaded from, and which file types are acceptable.
#[derive(Debug, Clone, Default)]
pub struct PluginPathPolicy {
    allowed_dirs: Vec<PathBuf>,
    allowed_extensions: Vec<String>,
}

impl PluginPathPolicy {
    pub fn new(allowed_dirs: Vec<PathBuf>) -> Self {
        Self {
            allowed_dirs,
            allowed_extensions: Vec::new(),
        }
    }

    /// Standard layout: the global plugin directory plus, if known, the project one.
    pub fn for_plugin_dirs(global_dir: PathBuf, project_dir: Option<PathBuf>) -> Self {
        let mut dirs = vec![global_dir];
        dirs.extend(project_dir);
        Self::new(dirs)
    }

    /// Require one of these extensions (case-insensitive, `.so` or `so`).
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.allowed_extensions = extensions
            .iter()
            .map(|e| format!(".{}", e.trim_start_matches('.').to_lowercase()))
            .collect();
        self
    }

    pub fn allowed_dirs(&self) -> &[PathBuf] {
        &self.allowed_dirs
    }

    /// Validate that a plugin path is safe to load.
    ///
    /// Returns the canonicalized (resolved) path on success.
    pub fn validate(&self, path: &str) -> Result<PathBuf, PathValidationError> {
        if has_traversal(path) {
            return Err(PathValidationError::PathTraversal { path: path.into() });
        }

        if let Some(character) = path.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
            return Err(PathValidationError::ForbiddenCharacter {
                path: path.into(),
                character,
            });
        }

        let expanded = expand_tilde(path);
        let canonical =
            std::fs::canonicalize(&expanded).map_err(|e| PathValidationError::CanonicalizeFailed {
                path: path.into(),
                reason: e.to_string(),
            })?;

        if !self.allowed_extensions.is_empty() {
            let file_name = canonical
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !self
                .allowed_extensions
                .iter()
                .any(|ext| file_name.ends_with(ext.as_str()))
            {
                return Err(PathValidationError::DisallowedExtension {
                    path: path.into(),
                    allowed: self.allowed_extensions.join(", "),
                });
            }
        }

        // Roots must be resolved as well (macOS: /var -> /private/var).
        let inside = self.allowed_dirs.iter().any(|dir| {
            let root = resolve_root(dir);
            canonical == root || canonical.starts_with(&root)
        });
        if !inside {
            return Err(PathValidationError::OutsideAllowedRoots { path: path.into() });
        }

        if canonical
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(PathValidationError::PathTraversal { path: path.into() });
        }

        tracing::debug!(path = %canonical.display(), "Plugin path validated");
        Ok(canonical)
    }
}

fn has_traversal(path: &str) -> bool {
    path.replace('\\', "/").split('/').any(|segment| segment == "..")
}

fn resolve_root(dir: &Path) -> PathBuf {
    let expanded = expand_tilde(&dir.to_string_lossy());
    std::fs::canonicalize(&expanded).unwrap_or(expanded)
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if (path.starts_with("~/") || path == "~")
        && let Ok(home) = home_dir()
    {
        return PathBuf::from(path.replacen('~', &home, 1));
    }
    PathBuf::from(path)
}

fn home_dir() -> Result<String, ()> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").map_err(|_| ())
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").map_err(|_| ())
    }
}
