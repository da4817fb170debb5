//! Changelog serialization.
//!
//! Emits verbatim source lines for untouched nodes and renders synthesized
//! nodes from their typed payloads, so a document that was parsed and never
//! modified round-trips byte-identically.

use crate::changelog::{
    Change, ChangeDocument, ChangeOp, ChangeSet, CreateIndex, PreconditionLeaf, Preconditions,
};
use crate::parser::indent_of;

/// Serializes a document to text.
#[must_use]
pub fn write(document: &ChangeDocument) -> String {
    let mut out: Vec<String> = Vec::new();
    out.extend(document.preamble.iter().cloned());
    for change_set in &document.change_sets {
        write_change_set(change_set, &mut out);
    }
    out.extend(document.trailing.iter().cloned());
    out.join("\n")
}

fn write_change_set(change_set: &ChangeSet, out: &mut Vec<String>) {
    out.extend(change_set.header.iter().cloned());
    if let Some(preconditions) = &change_set.injected {
        let indent = change_set
            .changes_line
            .as_deref()
            .map_or(change_set.item_indent, indent_of);
        render_preconditions(preconditions, indent, out);
    }
    if let Some(changes_line) = &change_set.changes_line {
        out.push(changes_line.clone());
    }
    out.extend(change_set.leading_lines.iter().cloned());
    for change in &change_set.changes {
        write_change(change, change_set.item_indent, out);
    }
    out.extend(change_set.footer.iter().cloned());
}

fn write_change(change: &Change, item_indent: usize, out: &mut Vec<String>) {
    if !change.lines.is_empty() {
        out.extend(change.lines.iter().cloned());
        return;
    }
    match &change.op {
        ChangeOp::CreateIndex(index) => render_create_index(index, item_indent, out),
        op => out.push(format!("{}- {}:", " ".repeat(item_indent), op.kind())),
    }
}

fn render_create_index(index: &CreateIndex, item_indent: usize, out: &mut Vec<String>) {
    let pad = " ".repeat(item_indent);
    out.push(format!("{pad}- createIndex:"));
    out.push(format!("{pad}    tableName: {}", scalar(&index.table_name)));
    out.push(format!("{pad}    indexName: {}", scalar(&index.index_name)));
    out.push(format!("{pad}    unique: {}", index.unique));
    out.push(format!("{pad}    columns:"));
    for column in &index.columns {
        out.push(format!("{pad}      - column:"));
        out.push(format!("{pad}          name: {}", scalar(column)));
    }
}

fn render_preconditions(preconditions: &Preconditions, indent: usize, out: &mut Vec<String>) {
    let pad = " ".repeat(indent);
    out.push(format!("{pad}preConditions:"));
    out.push(format!("{pad}  onFail: {}", preconditions.on_fail.as_str()));
    out.push(format!("{pad}  onError: {}", preconditions.on_error.as_str()));
    out.push(format!("{pad}  and:"));
    for leaf in &preconditions.and {
        match leaf {
            PreconditionLeaf::TableExists { table_name } => {
                out.push(format!("{pad}    - tableExists:"));
                out.push(format!(
                    "{pad}        tableName: '{}'",
                    table_name.replace('\'', "''")
                ));
            }
        }
    }
}

/// Renders a scalar value, single-quoting it when it contains whitespace,
/// a colon, or starts with a character that is special at the start of a
/// plain scalar.
#[must_use]
pub fn scalar(value: &str) -> String {
    if needs_quoting(value) {
        format!("'{}'", value.replace('\'', "''"))
    } else {
        value.to_string()
    }
}

fn needs_quoting(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    if value.chars().any(|c| c.is_whitespace() || c == ':') {
        return true;
    }
    let first = value.chars().next().unwrap_or(' ');
    "-?[]{}#&*!|>'\"%@`,".contains(first)
}
