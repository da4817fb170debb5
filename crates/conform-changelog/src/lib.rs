//! Changelog document model and SQLite lowering.
//!
//! `conform-changelog` is the pure text layer of the conform migration
//! engine. It parses a line-oriented changelog document into a typed tree,
//! applies transformations on that tree, and re-serializes it:
//!
//! - **Model** - changelog, changeSet, and each supported change operation
//! - **Parser/Writer** - round-trips untouched blocks byte-identically
//! - **Namer** - assigns deterministic names to anonymous FK constraints
//! - **Extractor** - removes FK operations, grouping them by base table
//! - **Lowering** - rewrites operations SQLite cannot execute natively
//!
//! The crate has no database dependency; everything that touches a live
//! SQLite connection lives in `conform-migrate`.
//!
//! # Example
//!
//! ```rust,ignore
//! use conform_changelog::prelude::*;
//!
//! let document = ChangeDocument::parse(&changelog_text)?;
//! let lowered = lower_for_sqlite(document);
//!
//! for plan in lowered.rebuild.tables() {
//!     println!("table {} needs a physical rebuild", plan.table);
//! }
//! println!("{}", lowered.document.to_text());
//! ```

pub mod changelog;
pub mod error;
pub mod extract;
pub mod fk;
pub mod lower;
pub mod namer;
pub mod parser;
pub mod writer;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::changelog::{
        AddForeignKey, Change, ChangeDocument, ChangeOp, ChangeSet, ColumnDef, DropForeignKey,
        Preconditions,
    };
    pub use crate::error::{ChangelogError, Result};
    pub use crate::extract::extract_foreign_key_ops;
    pub use crate::fk::{FkOpKind, ForeignKeyOp, ForeignKeySpec, RebuildPlanSet, TablePlan};
    pub use crate::lower::{LoweredChangeLog, PendingTypeChange, lower_for_sqlite};
    pub use crate::namer::assign_constraint_names;
}
