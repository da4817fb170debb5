//! Deterministic constraint naming.
//!
//! Assigns a name to every `addForeignKeyConstraint` and
//! `dropForeignKeyConstraint` whose `constraintName` is absent or empty, so
//! downstream passes can key on a stable identifier. The namer is pure and
//! idempotent: the same operation always yields the same name, and named
//! operations are left alone.

use tracing::debug;

use crate::changelog::{ChangeDocument, ChangeOp};
use crate::parser::indent_of;

/// Maximum length of a generated constraint name.
const MAX_NAME_LEN: usize = 60;

/// Assigns deterministic names to anonymous foreign-key operations.
pub fn assign_constraint_names(document: &mut ChangeDocument) {
    for change_set in &mut document.change_sets {
        for change in &mut change_set.changes {
            let name = match &change.op {
                ChangeOp::AddForeignKey(fk) if is_blank(fk.constraint_name.as_deref()) => {
                    foreign_key_name(
                        &fk.base_table_name,
                        &fk.base_column_names,
                        non_blank(&fk.referenced_table_name),
                    )
                }
                ChangeOp::DropForeignKey(fk) if is_blank(fk.constraint_name.as_deref()) => {
                    foreign_key_name(
                        &fk.base_table_name,
                        &fk.base_column_names,
                        fk.referenced_table_name.as_deref().and_then(non_blank),
                    )
                }
                _ => continue,
            };
            debug!(constraint = %name, "named anonymous foreign-key operation");
            insert_constraint_line(&mut change.lines, &name);
            match &mut change.op {
                ChangeOp::AddForeignKey(fk) => fk.constraint_name = Some(name),
                ChangeOp::DropForeignKey(fk) => fk.constraint_name = Some(name),
                _ => unreachable!("only foreign-key operations are named"),
            }
        }
    }
}

/// Builds the deterministic name for a foreign-key operation.
///
/// With a referenced table the shape is
/// `fk_<base-table>_<base-columns>__<referenced-table>`; without one the
/// trailing segment is omitted. Missing base columns fall back to `col`,
/// a missing base table to `table`. The result is truncated at 60
/// characters and always matches `^[a-z0-9_]{1,60}$`.
#[must_use]
pub fn foreign_key_name(
    base_table: &str,
    base_columns: &[String],
    referenced_table: Option<&str>,
) -> String {
    let table_token = if base_table.trim().is_empty() {
        "table"
    } else {
        base_table
    };
    let columns_token = if base_columns.is_empty() {
        "col".to_string()
    } else {
        base_columns.join("_")
    };

    let base = slug(table_token);
    let columns = slug(&columns_token);
    let mut name = match referenced_table {
        Some(referenced) => format!("fk_{base}_{columns}__{}", slug(referenced)),
        None => format!("fk_{base}_{columns}"),
    };
    name.truncate(MAX_NAME_LEN);
    name
}

/// Lowercases, replaces anything outside `[a-z0-9_]` with `_`, collapses
/// runs of `_`, strips a leading `_`, and yields `v` for an empty result.
fn slug(value: &str) -> String {
    let lower = value.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut last_was_underscore = false;
    for c in lower.chars() {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        out.push(mapped);
    }
    let out = out.strip_prefix('_').unwrap_or(&out).to_string();
    if out.is_empty() { "v".to_string() } else { out }
}

fn insert_constraint_line(lines: &mut Vec<String>, name: &str) {
    if lines.is_empty() {
        return;
    }
    let indent = lines
        .iter()
        .skip(1)
        .find(|l| !l.trim().is_empty())
        .map_or(indent_of(&lines[0]) + 4, |l| indent_of(l));
    lines.insert(1, format!("{}constraintName: {name}", " ".repeat(indent)));
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn non_blank(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
