//! Foreign-key specifications and the rebuild plan.
//!
//! A [`ForeignKeySpec`] describes one foreign-key constraint the way the
//! rebuild pipeline needs it: ordered base columns, referenced table and
//! columns, and the referential actions. A [`RebuildPlanSet`] aggregates
//! the add/drop operations extracted from a changelog, keyed by base
//! table, and serializes canonically for at-most-once hashing.

use serde::{Deserialize, Serialize};

/// One foreign-key constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    /// Referencing columns, in declaration order.
    pub base_columns: Vec<String>,
    /// Referenced table. Empty for drop operations that identify the
    /// constraint by base columns alone.
    pub referenced_table: String,
    /// Referenced columns, in declaration order. Empty when the constraint
    /// references the parent's implicit primary key.
    pub referenced_columns: Vec<String>,
    /// ON DELETE action, verbatim.
    pub on_delete: Option<String>,
    /// ON UPDATE action, verbatim.
    pub on_update: Option<String>,
    /// MATCH clause, verbatim. SQLite reports `NONE` when unset.
    pub match_clause: Option<String>,
}

impl ForeignKeySpec {
    /// Whitespace-normalized, lower-cased base-column sequence used for
    /// equality by base.
    fn base_key(&self) -> String {
        normalized_key(&self.base_columns)
    }

    /// Two specs are equal by base when their base-column sequences match
    /// case-insensitively after whitespace normalization.
    #[must_use]
    pub fn same_by_base(&self, other: &Self) -> bool {
        self.base_key() == other.base_key()
    }

    /// Two specs are equal by target when the referenced table matches
    /// case-insensitively and the referenced-column sequences match.
    #[must_use]
    pub fn same_by_target(&self, other: &Self) -> bool {
        self.referenced_table
            .eq_ignore_ascii_case(&other.referenced_table)
            && normalized_key(&self.referenced_columns) == normalized_key(&other.referenced_columns)
    }
}

fn normalized_key(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| c.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether a foreign-key operation adds or drops a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FkOpKind {
    /// `addForeignKeyConstraint`.
    Add,
    /// `dropForeignKeyConstraint`.
    Drop,
}

impl FkOpKind {
    /// Canonical token used in plan serialization.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Drop => "DROP",
        }
    }

    fn sort_rank(self) -> u8 {
        match self {
            Self::Add => 0,
            Self::Drop => 1,
        }
    }
}

/// One extracted foreign-key operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyOp {
    /// Add or drop.
    pub kind: FkOpKind,
    /// The constraint the operation concerns.
    pub spec: ForeignKeySpec,
}

/// All foreign-key operations targeting one base table, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePlan {
    /// Base table as written in the changelog.
    pub table: String,
    /// Operations in order of appearance.
    pub ops: Vec<ForeignKeyOp>,
}

impl TablePlan {
    /// Constraints to add, in document order.
    #[must_use]
    pub fn to_add(&self) -> Vec<ForeignKeySpec> {
        self.ops
            .iter()
            .filter(|op| op.kind == FkOpKind::Add)
            .map(|op| op.spec.clone())
            .collect()
    }

    /// Constraints to drop, in document order.
    #[must_use]
    pub fn to_drop(&self) -> Vec<ForeignKeySpec> {
        self.ops
            .iter()
            .filter(|op| op.kind == FkOpKind::Drop)
            .map(|op| op.spec.clone())
            .collect()
    }
}

/// The rebuild plan: foreign-key operations grouped by base table, tables
/// in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildPlanSet {
    tables: Vec<TablePlan>,
}

impl RebuildPlanSet {
    /// Appends an operation to its base table's plan, creating the table
    /// entry on first sight.
    pub fn push(&mut self, table: impl Into<String>, op: ForeignKeyOp) {
        let table = table.into();
        match self
            .tables
            .iter_mut()
            .find(|plan| plan.table.eq_ignore_ascii_case(&table))
        {
            Some(plan) => plan.ops.push(op),
            None => self.tables.push(TablePlan {
                table,
                ops: vec![op],
            }),
        }
    }

    /// Returns true when no operations were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Per-table plans, in order of first appearance.
    #[must_use]
    pub fn tables(&self) -> &[TablePlan] {
        &self.tables
    }

    /// Deterministic textual serialization used as the audit-hash
    /// preimage: tables sorted case-insensitively; per table, operations
    /// sorted by kind and then by lower-cased base columns.
    #[must_use]
    pub fn canonical_text(&self) -> String {
        let mut sorted: Vec<&TablePlan> = self.tables.iter().collect();
        sorted.sort_by_key(|plan| plan.table.to_lowercase());

        let mut out = String::new();
        for plan in sorted {
            out.push_str("TABLE=");
            out.push_str(&plan.table);
            out.push('\n');

            let mut ops: Vec<&ForeignKeyOp> = plan.ops.iter().collect();
            ops.sort_by_key(|op| {
                (
                    op.kind.sort_rank(),
                    op.spec.base_columns.join(",").to_lowercase(),
                )
            });
            for op in ops {
                out.push_str(&canonical_op_line(op));
                out.push('\n');
            }
        }
        out
    }
}

fn canonical_op_line(op: &ForeignKeyOp) -> String {
    let mut line = format!(
        "{} {} -> {}({})",
        op.kind.as_str(),
        op.spec.base_columns.join(","),
        op.spec.referenced_table,
        op.spec.referenced_columns.join(","),
    );
    if let Some(on_delete) = op.spec.on_delete.as_deref().filter(|v| !v.is_empty()) {
        line.push_str(" DEL=");
        line.push_str(on_delete);
    }
    if let Some(on_update) = op.spec.on_update.as_deref().filter(|v| !v.is_empty()) {
        line.push_str(" UPD=");
        line.push_str(on_update);
    }
    if let Some(m) = op
        .spec
        .match_clause
        .as_deref()
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("NONE"))
    {
        line.push_str(" MATCH=");
        line.push_str(m);
    }
    line
}
