//! Error types for the migration engine.

/// Errors that can occur while lowering and applying a changelog against a
/// SQLite database.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// The changelog document could not be parsed.
    #[error(transparent)]
    Changelog(#[from] conform_changelog::error::ChangelogError),

    /// The target base table does not exist in the live schema.
    #[error("table '{table}' not found in the live schema")]
    TableMissing {
        /// Requested table name.
        table: String,
    },

    /// A referenced identifier could not be resolved to a physical name.
    #[error("identifier '{requested}' not found; known identifiers: {}", known.join(", "))]
    IdentifierNotFound {
        /// The identifier as requested.
        requested: String,
        /// Known physical names, sorted ascendingly.
        known: Vec<String>,
    },

    /// A rebuild step failed; the enclosing transaction was rolled back.
    #[error("rebuild of table '{table}' failed: {source}")]
    RebuildFailed {
        /// Table being rebuilt.
        table: String,
        /// Underlying database error.
        #[source]
        source: sqlx::Error,
    },

    /// The post-rebuild `PRAGMA foreign_key_check` returned violations.
    #[error("foreign key check failed after rebuilding '{table}':\n{details}")]
    ReferentialIntegrityViolated {
        /// Table whose rebuild surfaced the violations.
        table: String,
        /// Per-violation diagnostics, including the foreign-key
        /// definitions of every offending table.
        details: String,
    },

    /// The audit table could not be read or written.
    #[error("audit store operation failed: {0}")]
    AuditStoreFailed(#[source] sqlx::Error),

    /// Database error outside a rebuild.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error while writing artifacts.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
