//! Error types for changelog parsing and transformation.

/// Errors that can occur while handling a changelog document.
#[derive(Debug, thiserror::Error)]
pub enum ChangelogError {
    /// The parser cannot interpret the input document.
    #[error("malformed changelog document at line {line}: {message}")]
    MalformedDocument {
        /// 1-based line number where parsing failed.
        line: usize,
        /// What the parser expected or found.
        message: String,
    },
}

impl ChangelogError {
    /// Creates a `MalformedDocument` error for the given 1-based line.
    #[must_use]
    pub fn malformed(line: usize, message: impl Into<String>) -> Self {
        Self::MalformedDocument {
            line,
            message: message.into(),
        }
    }
}

/// Result type for changelog operations.
pub type Result<T> = std::result::Result<T, ChangelogError>;
