//! Rebuild planning.
//!
//! Computes the final foreign-key set for a table and builds the CREATE
//! TABLE statement that preserves every observed attribute: column order,
//! declared types, NOT NULL, verbatim default expressions, the primary key
//! (inline for a single column, a trailing clause for composites), and
//! AUTOINCREMENT when the original declaration carried it.

use conform_changelog::fk::ForeignKeySpec;

use crate::introspect::{ObservedColumn, quote_identifier};

/// Computes the final foreign-key list for a rebuild: current constraints
/// minus anything equal by base or by target to a drop, plus every add.
///
/// No two constraints in the result share base columns: an add over the
/// base columns of a surviving constraint replaces it, and among adds over
/// the same base columns the last one wins.
#[must_use]
pub fn final_foreign_keys(
    current: &[ForeignKeySpec],
    to_add: &[ForeignKeySpec],
    to_drop: &[ForeignKeySpec],
) -> Vec<ForeignKeySpec> {
    let mut remaining: Vec<ForeignKeySpec> = current
        .iter()
        .filter(|existing| {
            !to_drop
                .iter()
                .any(|drop| existing.same_by_base(drop) || existing.same_by_target(drop))
        })
        .cloned()
        .collect();
    for add in to_add {
        remaining.retain(|existing| !existing.same_by_base(add));
        remaining.push(add.clone());
    }
    remaining
}

/// Detects which primary-key columns carry AUTOINCREMENT.
///
/// Only a single-column primary key can auto-increment; the column is
/// flagged iff its uppercased quoted name and the tokens `INTEGER`,
/// `PRIMARY KEY`, and `AUTOINCREMENT` all appear in the uppercased raw
/// CREATE statement, and the declared type is exactly INTEGER.
#[must_use]
pub fn autoincrement_columns(columns: &[ObservedColumn], create_sql: &str) -> Vec<String> {
    let pk_columns: Vec<&ObservedColumn> =
        columns.iter().filter(|c| c.primary_key).collect();
    if pk_columns.len() != 1 {
        return Vec::new();
    }
    let column = pk_columns[0];
    if !column.declared_type.eq_ignore_ascii_case("INTEGER") {
        return Vec::new();
    }

    let upper = create_sql.to_uppercase();
    let quoted = format!("\"{}\"", column.name.to_uppercase());
    if upper.contains(&quoted)
        && upper.contains("INTEGER")
        && upper.contains("PRIMARY KEY")
        && upper.contains("AUTOINCREMENT")
    {
        vec![column.name.clone()]
    } else {
        Vec::new()
    }
}

/// Builds the CREATE TABLE statement for the rebuild target.
///
/// `target` is always the temporary table name; the definition otherwise
/// mirrors the observed table with `foreign_keys` swapped in.
#[must_use]
pub fn build_create_table(
    target: &str,
    columns: &[ObservedColumn],
    autoincrement: &[String],
    foreign_keys: &[ForeignKeySpec],
) -> String {
    let pk_columns: Vec<&str> = columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.as_str())
        .collect();
    let single_pk = pk_columns.len() == 1;

    let mut defs: Vec<String> = Vec::with_capacity(columns.len() + foreign_keys.len() + 1);
    for column in columns {
        let mut def = format!("  {}", quote_identifier(&column.name));
        if !column.declared_type.is_empty() {
            def.push(' ');
            def.push_str(&column.declared_type);
        }
        if single_pk && column.primary_key {
            def.push_str(" PRIMARY KEY");
            if autoincrement.iter().any(|a| a == &column.name) {
                def.push_str(" AUTOINCREMENT");
            }
        }
        if column.not_null {
            def.push_str(" NOT NULL");
        }
        if let Some(default_expr) = &column.default_expr {
            def.push_str(" DEFAULT ");
            def.push_str(default_expr);
        }
        defs.push(def);
    }

    if pk_columns.len() > 1 {
        let quoted: Vec<String> = pk_columns.iter().map(|c| quote_identifier(c)).collect();
        defs.push(format!("  PRIMARY KEY ({})", quoted.join(", ")));
    }

    for fk in foreign_keys {
        if fk.referenced_table.trim().is_empty() {
            continue;
        }
        defs.push(foreign_key_clause(fk));
    }

    format!(
        "CREATE TABLE {} (\n{}\n)",
        quote_identifier(target),
        defs.join(",\n")
    )
}

fn foreign_key_clause(fk: &ForeignKeySpec) -> String {
    let base: Vec<String> = fk
        .base_columns
        .iter()
        .map(|c| quote_identifier(c.trim()))
        .collect();
    let mut clause = format!(
        "  FOREIGN KEY ({}) REFERENCES {}",
        base.join(", "),
        quote_identifier(&fk.referenced_table)
    );
    if !fk.referenced_columns.is_empty() {
        let referenced: Vec<String> = fk
            .referenced_columns
            .iter()
            .map(|c| quote_identifier(c.trim()))
            .collect();
        clause.push_str(&format!(" ({})", referenced.join(", ")));
    }
    if let Some(on_delete) = fk.on_delete.as_deref().filter(|v| !v.trim().is_empty()) {
        clause.push_str(" ON DELETE ");
        clause.push_str(on_delete);
    }
    if let Some(on_update) = fk.on_update.as_deref().filter(|v| !v.trim().is_empty()) {
        clause.push_str(" ON UPDATE ");
        clause.push_str(on_update);
    }
    if let Some(m) = fk
        .match_clause
        .as_deref()
        .filter(|v| !v.trim().is_empty() && !v.eq_ignore_ascii_case("NONE"))
    {
        clause.push_str(" MATCH ");
        clause.push_str(m);
    }
    clause
}
