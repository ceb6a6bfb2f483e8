//! Error types for feedstore.
//!
//! Store failures, malformed remote input and configuration problems each get
//! their own variant so callers can decide on retry policy.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for feedstore operations.
#[derive(Error, Debug)]
pub enum FeedError {
    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Database operation failed. The enclosing transaction is rolled back.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database schema version is newer than this build understands.
    #[error("Database schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: i32, found: i32 },

    /// Database file not found.
    #[error("No database found at {path}. Merge a page first to create it.")]
    DatabaseNotFound { path: PathBuf },

    /// Stored JSON column could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// Remote entity violates a structural assumption of the engine.
    #[error("Malformed remote entity '{id}': {reason}")]
    MalformedEntity { id: String, reason: String },

    /// Page payload could not be decoded.
    #[error("Failed to decode page '{source_name}': {reason}")]
    Decode { source_name: String, reason: String },

    /// Record not found.
    #[error("{item_type} '{id}' not found")]
    NotFound { item_type: &'static str, id: String },

    /// Invalid command-line argument.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    // =========================================================================
    // IO & Configuration Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Path-specific IO error with context.
    #[error("Failed to {operation} '{path}': {source}")]
    PathError {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file parsing error.
    #[error("Invalid configuration in '{path}': {reason}")]
    Config { path: PathBuf, reason: String },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Catch-all for other errors with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type alias for feedstore operations.
pub type Result<T> = std::result::Result<T, FeedError>;

impl FeedError {
    /// Create a malformed entity error.
    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEntity {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(item_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            item_type,
            id: id.into(),
        }
    }

    /// Create a path error with context.
    pub fn path_error(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::PathError {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Wrap an error with additional context.
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether the caller may reasonably retry the same merge.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(_) | Self::Io(_) | Self::PathError { .. } => true,
            Self::WithContext { source, .. } => {
                source.is::<rusqlite::Error>() || source.is::<std::io::Error>()
            }
            _ => false,
        }
    }

    /// Get a suggestion for how to fix this error, if applicable.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::DatabaseNotFound { .. } => {
                Some("Run 'feedstore merge <page.json> --domain <domain>' to create the database.")
            }
            Self::SchemaMismatch { .. } => {
                Some("Upgrade feedstore or point --db at a fresh database file.")
            }
            Self::Decode { .. } | Self::MalformedEntity { .. } => {
                Some("Pages must be a JSON array of statuses; reposts may not wrap reposts.")
            }
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with additional context.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with additional context.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| FeedError::with_context(context, e))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| FeedError::with_context(f(), e))
    }
}

// =============================================================================
// CLI Error Formatting
// =============================================================================

use colored::Colorize;

/// Render an error for stderr: a headline, the underlying cause chain, then
/// one `Hint:` line per suggestion.
#[must_use]
pub fn format_error(title: &str, explanation: &str, suggestions: &[&str]) -> String {
    let mut lines = vec![format!("{} {}", "error:".red().bold(), title.bold())];
    if !explanation.is_empty() {
        lines.push(format!("  {} {explanation}", "caused by:".dimmed()));
    }
    lines.extend(
        suggestions
            .iter()
            .map(|hint| format!("  {} {hint}", "Hint:".cyan())),
    );
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FeedError::malformed("42", "wrapped status has no id");
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("wrapped status has no id"));
    }

    #[test]
    fn test_error_suggestions() {
        let err = FeedError::DatabaseNotFound {
            path: PathBuf::from("/tmp/feedstore.db"),
        };
        assert!(err.suggestion().is_some());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_from_rusqlite_error_is_transient() {
        let err: FeedError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, FeedError::Database(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_result_ext_adds_context() {
        let io: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = io.context("reading page").unwrap_err();
        assert_eq!(err.to_string(), "reading page: missing");
        assert!(err.is_transient());
    }

    #[test]
    fn format_error_multiple_suggestions() {
        let output = format_error("Merge failed", "bad page", &["First", "Second"]);
        assert!(output.contains("Merge failed"));
        assert!(output.contains("bad page"));
        assert!(output.contains("First"));
        assert!(output.contains("Second"));
    }
}
