//! Changelog document model.
//!
//! These types describe the structure of a changelog document: an ordered
//! sequence of change sets, each carrying an ordered list of change
//! operations. Recognized operations are parsed into typed payloads;
//! anything else is retained as an opaque block so the document
//! round-trips byte-identically.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::parser;
use crate::writer;

/// A column definition inside `createTable`/`addColumn`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Declared type, verbatim (e.g. "INTEGER", "VARCHAR(255)").
    pub column_type: String,
    /// Whether the column allows NULL values (absent means unspecified).
    pub nullable: Option<bool>,
    /// Whether this column participates in the primary key.
    pub primary_key: bool,
    /// Default expression, verbatim.
    pub default_value: Option<String>,
}

/// `createTable` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTable {
    /// Table name.
    pub table_name: String,
    /// Column definitions.
    pub columns: Vec<ColumnDef>,
}

/// `addColumn` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddColumn {
    /// Table name.
    pub table_name: String,
    /// Columns to add.
    pub columns: Vec<ColumnDef>,
}

/// `dropColumn` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropColumn {
    /// Table name.
    pub table_name: String,
    /// Column name.
    pub column_name: String,
}

/// `addForeignKeyConstraint` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddForeignKey {
    /// Referencing table.
    pub base_table_name: String,
    /// Referencing columns, in declaration order.
    pub base_column_names: Vec<String>,
    /// Referenced table.
    pub referenced_table_name: String,
    /// Referenced columns, in declaration order.
    pub referenced_column_names: Vec<String>,
    /// Constraint name, when present.
    pub constraint_name: Option<String>,
    /// ON DELETE action, verbatim.
    pub on_delete: Option<String>,
    /// ON UPDATE action, verbatim.
    pub on_update: Option<String>,
}

/// `dropForeignKeyConstraint` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropForeignKey {
    /// Referencing table.
    pub base_table_name: String,
    /// Constraint name, when present.
    pub constraint_name: Option<String>,
    /// Referencing columns, when present.
    pub base_column_names: Vec<String>,
    /// Referenced table, when present.
    pub referenced_table_name: Option<String>,
}

/// `addUniqueConstraint` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddUniqueConstraint {
    /// Table name.
    pub table_name: String,
    /// Constrained columns, in declaration order.
    pub column_names: Vec<String>,
    /// Constraint name, when present.
    pub constraint_name: Option<String>,
}

/// `modifyDataType` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyDataType {
    /// Table name.
    pub table_name: String,
    /// Column name.
    pub column_name: String,
    /// New declared type, verbatim.
    pub new_data_type: String,
}

/// `createIndex` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIndex {
    /// Table name.
    pub table_name: String,
    /// Index name.
    pub index_name: String,
    /// Whether this is a unique index.
    pub unique: bool,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
}

/// `dropIndex` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropIndex {
    /// Index name.
    pub index_name: String,
    /// Table name, when present.
    pub table_name: Option<String>,
}

/// A single change operation.
///
/// Kinds outside this set are retained as [`ChangeOp::Other`] with their
/// raw lines and pass through every transformation untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    /// `createTable`.
    CreateTable(CreateTable),
    /// `addColumn`.
    AddColumn(AddColumn),
    /// `dropColumn`.
    DropColumn(DropColumn),
    /// `addForeignKeyConstraint`.
    AddForeignKey(AddForeignKey),
    /// `dropForeignKeyConstraint`.
    DropForeignKey(DropForeignKey),
    /// `addUniqueConstraint`.
    AddUniqueConstraint(AddUniqueConstraint),
    /// `modifyDataType`.
    ModifyDataType(ModifyDataType),
    /// `createIndex`.
    CreateIndex(CreateIndex),
    /// `dropIndex`.
    DropIndex(DropIndex),
    /// `sql` passthrough.
    Sql,
    /// Unrecognized change kind, preserved verbatim.
    Other(String),
}

impl ChangeOp {
    /// Returns the change-kind key as it appears in the document.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::CreateTable(_) => "createTable",
            Self::AddColumn(_) => "addColumn",
            Self::DropColumn(_) => "dropColumn",
            Self::AddForeignKey(_) => "addForeignKeyConstraint",
            Self::DropForeignKey(_) => "dropForeignKeyConstraint",
            Self::AddUniqueConstraint(_) => "addUniqueConstraint",
            Self::ModifyDataType(_) => "modifyDataType",
            Self::CreateIndex(_) => "createIndex",
            Self::DropIndex(_) => "dropIndex",
            Self::Sql => "sql",
            Self::Other(kind) => kind,
        }
    }

    /// Returns the table this operation targets, when one is identifiable.
    ///
    /// `createTable` creates rather than targets a table and returns `None`
    /// here; see [`ChangeOp::created_table`].
    #[must_use]
    pub fn target_table(&self) -> Option<&str> {
        match self {
            Self::AddColumn(c) => Some(&c.table_name),
            Self::DropColumn(c) => Some(&c.table_name),
            Self::AddForeignKey(c) => Some(&c.base_table_name),
            Self::DropForeignKey(c) => Some(&c.base_table_name),
            Self::AddUniqueConstraint(c) => Some(&c.table_name),
            Self::ModifyDataType(c) => Some(&c.table_name),
            Self::CreateIndex(c) => Some(&c.table_name),
            Self::DropIndex(c) => c.table_name.as_deref(),
            Self::CreateTable(_) | Self::Sql | Self::Other(_) => None,
        }
    }

    /// Returns the table this operation creates, for `createTable`.
    #[must_use]
    pub fn created_table(&self) -> Option<&str> {
        match self {
            Self::CreateTable(c) => Some(&c.table_name),
            _ => None,
        }
    }
}

/// A change operation together with its source lines.
///
/// `lines` holds the verbatim block from the input document; it is empty
/// for changes synthesized by a transformation, which the writer renders
/// from the typed payload instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// The typed operation.
    pub op: ChangeOp,
    /// Verbatim source lines; empty for synthesized changes.
    pub lines: Vec<String>,
}

impl Change {
    /// Creates a synthesized change with no source lines.
    #[must_use]
    pub fn synthesized(op: ChangeOp) -> Self {
        Self {
            op,
            lines: Vec::new(),
        }
    }
}

/// Disposition when a precondition fails or errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreconditionDisposition {
    /// Record the change set as ran without executing it.
    MarkRan,
    /// Abort the run.
    Halt,
}

impl PreconditionDisposition {
    /// Returns the document representation of this disposition.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarkRan => "MARK_RAN",
            Self::Halt => "HALT",
        }
    }
}

/// A leaf condition inside a preconditions block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreconditionLeaf {
    /// `tableExists` guard.
    TableExists {
        /// Guarded table name.
        table_name: String,
    },
}

/// A preconditions block guarding a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preconditions {
    /// Disposition when the condition is not met.
    pub on_fail: PreconditionDisposition,
    /// Disposition when evaluating the condition errors.
    pub on_error: PreconditionDisposition,
    /// Leaf conditions, all of which must hold.
    pub and: Vec<PreconditionLeaf>,
}

impl Preconditions {
    /// Builds the `tableExists` guard injected by the lowering pass.
    #[must_use]
    pub fn table_exists(table_name: impl Into<String>) -> Self {
        Self {
            on_fail: PreconditionDisposition::MarkRan,
            on_error: PreconditionDisposition::MarkRan,
            and: vec![PreconditionLeaf::TableExists {
                table_name: table_name.into(),
            }],
        }
    }
}

/// An atomic, ordered unit of schema changes with an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Change set identifier.
    pub id: String,
    /// Author label.
    pub author: String,
    /// Verbatim lines from `- changeSet:` up to (not including) the
    /// `changes:` key: id, author, labels, any pre-existing preconditions,
    /// and anything else the parser does not interpret.
    pub header: Vec<String>,
    /// Preconditions injected by the lowering pass, rendered as a sibling
    /// of `changes:` immediately before it. Pre-existing blocks stay in
    /// `header` verbatim.
    pub injected: Option<Preconditions>,
    /// The verbatim `changes:` key line, when the source had one.
    pub changes_line: Option<String>,
    /// Verbatim lines between `changes:` and the first change item.
    pub leading_lines: Vec<String>,
    /// Column at which change items are indented.
    pub item_indent: usize,
    /// Ordered change operations.
    pub changes: Vec<Change>,
    /// Verbatim lines after the last change item that still belong to this
    /// change set (e.g. a `rollback:` block).
    pub footer: Vec<String>,
}

/// Ordered sequence of change sets plus surrounding document text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDocument {
    /// Verbatim lines up to and including `databaseChangeLog:`.
    pub preamble: Vec<String>,
    /// Change sets, in document order.
    pub change_sets: Vec<ChangeSet>,
    /// Verbatim lines after the last change set (only populated when the
    /// document has no change sets; otherwise trailing lines belong to the
    /// last change set's footer).
    pub trailing: Vec<String>,
}

impl ChangeDocument {
    /// Parses a changelog document.
    ///
    /// # Errors
    ///
    /// Returns [`ChangelogError::MalformedDocument`] when the input cannot
    /// be interpreted.
    ///
    /// [`ChangelogError::MalformedDocument`]: crate::error::ChangelogError::MalformedDocument
    pub fn parse(input: &str) -> Result<Self> {
        parser::parse(input)
    }

    /// Serializes the document back to text.
    ///
    /// Untouched blocks are emitted verbatim, so an unmodified document
    /// round-trips byte-identically.
    #[must_use]
    pub fn to_text(&self) -> String {
        writer::write(self)
    }

    /// Returns true when the document has no change sets left.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.change_sets.is_empty()
    }
}
