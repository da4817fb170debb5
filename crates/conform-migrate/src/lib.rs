//! SQLite-aware schema migration engine.
//!
//! `conform-migrate` takes a generic schema-diff changelog and brings a
//! SQLite database into conformance with it. Operations SQLite cannot
//! execute natively are lowered by `conform-changelog`; the foreign-key
//! operations it extracts are applied here through precisely sequenced
//! physical table rebuilds that preserve columns, defaults, NOT NULL, the
//! primary key, AUTOINCREMENT, indexes, and triggers.
//!
//! # Architecture
//!
//! - **Introspect** - reads the live schema (`PRAGMA table_info`,
//!   `foreign_key_list`, `sqlite_master`)
//! - **Normalize** - resolves case/style variants of identifiers against
//!   the live schema
//! - **Plan** - computes the final foreign-key set and the CREATE TABLE
//!   that preserves every observed attribute
//! - **Rebuild** - executes the temp-create, copy, swap, and recreate
//!   sequence transactionally
//! - **Audit** - hashes each applied rebuild plan for at-most-once
//!   enforcement
//! - **Engine** - orchestrates the pipeline and emits the lowered
//!   changelog artifact
//!
//! # Example
//!
//! ```rust,ignore
//! use conform_migrate::prelude::*;
//! use sqlx::sqlite::SqlitePoolOptions;
//!
//! let pool = SqlitePoolOptions::new().connect("sqlite:app.db").await?;
//! let engine = MigrationEngine::with_defaults(pool);
//! let outcome = engine.run(&changelog_text).await?;
//! for table in &outcome.rebuilt_tables {
//!     println!("rebuilt {table}");
//! }
//! ```

pub mod audit;
pub mod engine;
pub mod error;
pub mod introspect;
pub mod normalize;
pub mod plan;
pub mod rebuild;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::audit::{AuditStore, plan_hash};
    pub use crate::engine::{EngineOptions, EngineOutcome, MigrationEngine};
    pub use crate::error::{MigrateError, Result};
    pub use crate::introspect::{ObservedColumn, ObservedIndex, ObservedTable, ObservedTrigger};
    pub use crate::normalize::resolve_identifier;
    pub use crate::rebuild::TableRebuilder;
}
