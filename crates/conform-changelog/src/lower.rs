//! SQLite lowering pass.
//!
//! Rewrites operations SQLite cannot execute natively:
//!
//! - `addUniqueConstraint` becomes a unique `createIndex`
//! - `modifyDataType` is dropped and reported as a pending type change
//! - foreign-key add/drop operations are removed and aggregated into the
//!   rebuild plan, keyed by base table
//!
//! Change sets touched by a rewrite whose remaining changes target exactly
//! one identifiable table get a `tableExists` precondition guarding
//! execution, unless the change set itself creates that table. A document
//! containing none of the rewritten kinds passes through byte-identical.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::changelog::{
    Change, ChangeDocument, ChangeOp, CreateIndex, Preconditions,
};
use crate::extract::drain_foreign_keys;
use crate::fk::RebuildPlanSet;

/// Maximum length of a derived unique-index name.
const MAX_INDEX_NAME_LEN: usize = 60;

/// A `modifyDataType` that was dropped from the plan. Purely
/// informational; the engine reports it but never applies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTypeChange {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
    /// Requested declared type.
    pub new_type: String,
}

/// Result of lowering a document for SQLite.
#[derive(Debug, Clone)]
pub struct LoweredChangeLog {
    /// The lowered document, ready for the downstream applier.
    pub document: ChangeDocument,
    /// Type changes dropped from the plan.
    pub pending_type_changes: Vec<PendingTypeChange>,
    /// Foreign-key operations to apply through physical table rebuilds.
    pub rebuild: RebuildPlanSet,
}

/// Lowers a document for SQLite.
///
/// Never fails: unknown change kinds pass through untouched.
#[must_use]
pub fn lower_for_sqlite(document: ChangeDocument) -> LoweredChangeLog {
    let mut document = document;
    let mut rebuild = RebuildPlanSet::default();
    let mut pending = Vec::new();

    let mut kept = Vec::with_capacity(document.change_sets.len());
    for mut change_set in document.change_sets {
        let mut modified = drain_foreign_keys(&mut change_set, &mut rebuild);

        let mut remaining = Vec::with_capacity(change_set.changes.len());
        let mut targets: Vec<String> = Vec::new();
        let mut created: Vec<String> = Vec::new();
        for change in change_set.changes.drain(..) {
            let Change { op, lines } = change;
            match op {
                ChangeOp::AddUniqueConstraint(unique) => {
                    modified = true;
                    let index_name = unique
                        .constraint_name
                        .filter(|name| !name.trim().is_empty())
                        .unwrap_or_else(|| {
                            unique_index_name(&unique.table_name, &unique.column_names)
                        });
                    debug!(
                        table = %unique.table_name,
                        index = %index_name,
                        "lowering addUniqueConstraint to a unique index"
                    );
                    // Excluded from the precondition heuristic below.
                    remaining.push(Change::synthesized(ChangeOp::CreateIndex(CreateIndex {
                        table_name: unique.table_name,
                        index_name,
                        unique: true,
                        columns: unique.column_names,
                    })));
                }
                ChangeOp::ModifyDataType(modify) => {
                    modified = true;
                    debug!(
                        table = %modify.table_name,
                        column = %modify.column_name,
                        new_type = %modify.new_data_type,
                        "dropping modifyDataType; recorded as pending"
                    );
                    pending.push(PendingTypeChange {
                        table: modify.table_name,
                        column: modify.column_name,
                        new_type: modify.new_data_type,
                    });
                }
                op => {
                    if let Some(table) = op.created_table() {
                        created.push(table.to_string());
                    } else if let Some(table) = op.target_table()
                        && !table.is_empty()
                        && !targets.iter().any(|t| t.eq_ignore_ascii_case(table))
                    {
                        targets.push(table.to_string());
                    }
                    remaining.push(Change { op, lines });
                }
            }
        }
        change_set.changes = remaining;

        if change_set.changes.is_empty() {
            info!(id = %change_set.id, "pruning change set emptied by lowering");
            continue;
        }

        if modified
            && change_set.changes_line.is_some()
            && targets.len() == 1
            && !created.iter().any(|t| t.eq_ignore_ascii_case(&targets[0]))
        {
            debug!(id = %change_set.id, table = %targets[0], "guarding change set with tableExists");
            change_set.injected = Some(Preconditions::table_exists(targets[0].clone()));
        }

        kept.push(change_set);
    }
    document.change_sets = kept;

    LoweredChangeLog {
        document,
        pending_type_changes: pending,
        rebuild,
    }
}

/// Derives the index name for a lowered unique constraint:
/// `<table>_<columns joined by _>_uq`, non-alphanumerics replaced by `_`,
/// truncated at 60 characters.
#[must_use]
pub fn unique_index_name(table: &str, columns: &[String]) -> String {
    let raw = format!("{table}_{}_uq", columns.join("_"));
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    name.truncate(MAX_INDEX_NAME_LEN);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::ChangeDocument;
    use crate::fk::FkOpKind;

    fn lower(input: &str) -> LoweredChangeLog {
        lower_for_sqlite(ChangeDocument::parse(input).unwrap())
    }

    #[test]
    fn test_noop_lowering_is_byte_identical() {
        let input = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- addColumn:\n        \
tableName: users\n        \
columns:\n        \
- column:\n            \
name: email\n            \
type: TEXT\n    \
- createIndex:\n        \
tableName: users\n        \
indexName: idx_users_email\n        \
columns:\n        \
- column:\n            \
name: email\n";
        let lowered = lower(input);
        assert_eq!(lowered.document.to_text(), input);
        assert!(lowered.rebuild.is_empty());
        assert!(lowered.pending_type_changes.is_empty());
    }

    #[test]
    fn test_unique_constraint_becomes_unique_index() {
        let input = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- addUniqueConstraint:\n        \
tableName: order_item\n        \
columnNames: 'product_id,vendor_id'\n";
        let lowered = lower(input);
        let text = lowered.document.to_text();
        assert!(!text.contains("addUniqueConstraint"));
        assert!(text.contains("- createIndex:"));
        assert!(text.contains("tableName: order_item"));
        assert!(text.contains("indexName: order_item_product_id_vendor_id_uq"));
        assert!(text.contains("unique: true"));
        assert!(text.contains("name: product_id"));
        assert!(text.contains("name: vendor_id"));
    }

    #[test]
    fn test_named_unique_constraint_keeps_its_name() {
        let input = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- addUniqueConstraint:\n        \
tableName: t\n        \
columnNames: a\n        \
constraintName: uq_custom\n";
        let lowered = lower(input);
        assert!(lowered.document.to_text().contains("indexName: uq_custom"));
    }

    #[test]
    fn test_modify_data_type_is_dropped_and_reported() {
        let input = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- modifyDataType:\n        \
tableName: t\n        \
columnName: c\n        \
newDataType: BIGINT\n";
        let lowered = lower(input);
        assert!(lowered.document.is_empty());
        assert_eq!(
            lowered.pending_type_changes,
            vec![PendingTypeChange {
                table: "t".into(),
                column: "c".into(),
                new_type: "BIGINT".into(),
            }]
        );
    }

    #[test]
    fn test_fk_ops_are_aggregated_into_the_plan() {
        let input = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- addForeignKeyConstraint:\n        \
baseTableName: child\n        \
baseColumnNames: parent_id\n        \
referencedTableName: parent\n        \
referencedColumnNames: id\n        \
constraintName: fk_child_parent\n";
        let lowered = lower(input);
        assert!(lowered.document.is_empty());
        assert_eq!(lowered.rebuild.tables().len(), 1);
        let plan = &lowered.rebuild.tables()[0];
        assert_eq!(plan.table, "child");
        assert_eq!(plan.ops[0].kind, FkOpKind::Add);
        assert_eq!(plan.ops[0].spec.referenced_table, "parent");
    }

    #[test]
    fn test_precondition_injected_for_single_table_change_set() {
        let input = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- dropForeignKeyConstraint:\n        \
baseTableName: child\n        \
constraintName: fk_old\n        \
baseColumnNames: parent_id\n    \
- dropColumn:\n        \
tableName: child\n        \
columnName: parent_id\n";
        let lowered = lower(input);
        let text = lowered.document.to_text();
        assert!(text.contains("    preConditions:"));
        assert!(text.contains("      onFail: MARK_RAN"));
        assert!(text.contains("      onError: MARK_RAN"));
        assert!(text.contains("            tableName: 'child'"));
        // The block precedes the changes key.
        let pre = text.find("preConditions:").unwrap();
        let changes = text.find("changes:").unwrap();
        assert!(pre < changes);
    }

    #[test]
    fn test_no_precondition_for_multiple_tables() {
        let input = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- modifyDataType:\n        \
tableName: t1\n        \
columnName: c\n        \
newDataType: BIGINT\n    \
- dropColumn:\n        \
tableName: a_table\n        \
columnName: x\n    \
- dropColumn:\n        \
tableName: b_table\n        \
columnName: y\n";
        let lowered = lower(input);
        assert!(!lowered.document.to_text().contains("preConditions"));
    }

    #[test]
    fn test_no_precondition_when_change_set_creates_the_table() {
        let input = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- createTable:\n        \
tableName: child\n        \
columns:\n        \
- column:\n            \
name: id\n            \
type: INTEGER\n    \
- addForeignKeyConstraint:\n        \
baseTableName: child\n        \
baseColumnNames: parent_id\n        \
referencedTableName: parent\n        \
referencedColumnNames: id\n";
        let lowered = lower(input);
        let text = lowered.document.to_text();
        assert!(text.contains("createTable"));
        assert!(!text.contains("preConditions"));
    }

    #[test]
    fn test_unique_lowering_does_not_contribute_a_target() {
        // The synthesized createIndex is excluded from the heuristic, so a
        // change set holding only an addUniqueConstraint gets no guard.
        let input = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- addUniqueConstraint:\n        \
tableName: t\n        \
columnNames: a\n";
        let lowered = lower(input);
        assert!(!lowered.document.to_text().contains("preConditions"));
    }

    #[test]
    fn test_untouched_change_set_gets_no_precondition() {
        let input = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- dropColumn:\n        \
tableName: users\n        \
columnName: email\n";
        let lowered = lower(input);
        assert_eq!(lowered.document.to_text(), input);
    }

    #[test]
    fn test_unique_index_name_derivation() {
        assert_eq!(
            unique_index_name("order_item", &["product_id".into(), "vendor_id".into()]),
            "order_item_product_id_vendor_id_uq"
        );
        assert_eq!(
            unique_index_name("weird table", &["a b".into()]),
            "weird_table_a_b_uq"
        );
        let long = unique_index_name(&"t".repeat(80), &["c".into()]);
        assert_eq!(long.len(), 60);
    }
}
