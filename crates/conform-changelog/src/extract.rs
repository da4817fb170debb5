//! Foreign-key operation extraction.
//!
//! Walks the document once, removing every `addForeignKeyConstraint` and
//! `dropForeignKeyConstraint` and grouping them by base table in document
//! order. Change sets that become empty are pruned. A foreign-key change
//! whose base table cannot be determined is left in the document untouched
//! rather than silently dropped.

use tracing::debug;

use crate::changelog::{Change, ChangeDocument, ChangeOp, ChangeSet};
use crate::fk::{FkOpKind, ForeignKeyOp, ForeignKeySpec, RebuildPlanSet};

/// Removes foreign-key operations from the document and returns them
/// grouped by base table.
#[must_use]
pub fn extract_foreign_key_ops(document: ChangeDocument) -> (ChangeDocument, RebuildPlanSet) {
    let mut document = document;
    let mut plan = RebuildPlanSet::default();

    let mut kept = Vec::with_capacity(document.change_sets.len());
    for mut change_set in document.change_sets {
        drain_foreign_keys(&mut change_set, &mut plan);
        if change_set.changes.is_empty() {
            debug!(id = %change_set.id, "pruning change set emptied by foreign-key extraction");
            continue;
        }
        kept.push(change_set);
    }
    document.change_sets = kept;

    (document, plan)
}

/// Drains the foreign-key operations of a single change set into `plan`.
///
/// Returns true when at least one operation was removed.
pub(crate) fn drain_foreign_keys(change_set: &mut ChangeSet, plan: &mut RebuildPlanSet) -> bool {
    let mut drained = false;
    let mut remaining = Vec::with_capacity(change_set.changes.len());

    for change in change_set.changes.drain(..) {
        match change.op {
            ChangeOp::AddForeignKey(fk) if !fk.base_table_name.trim().is_empty() => {
                drained = true;
                plan.push(
                    fk.base_table_name.clone(),
                    ForeignKeyOp {
                        kind: FkOpKind::Add,
                        spec: ForeignKeySpec {
                            base_columns: fk.base_column_names,
                            referenced_table: fk.referenced_table_name,
                            referenced_columns: fk.referenced_column_names,
                            on_delete: fk.on_delete,
                            on_update: fk.on_update,
                            match_clause: None,
                        },
                    },
                );
            }
            ChangeOp::DropForeignKey(fk) if !fk.base_table_name.trim().is_empty() => {
                drained = true;
                plan.push(
                    fk.base_table_name.clone(),
                    ForeignKeyOp {
                        kind: FkOpKind::Drop,
                        spec: ForeignKeySpec {
                            base_columns: fk.base_column_names,
                            referenced_table: fk.referenced_table_name.unwrap_or_default(),
                            referenced_columns: Vec::new(),
                            on_delete: None,
                            on_update: None,
                            match_clause: None,
                        },
                    },
                );
            }
            op => remaining.push(Change {
                op,
                lines: change.lines,
            }),
        }
    }

    change_set.changes = remaining;
    drained
}
