//! Changelog parser.
//!
//! Parses the line-oriented block-mapped changelog format into the typed
//! tree of [`crate::changelog`]. Every parsed node keeps its verbatim
//! source lines so the writer can reproduce untouched blocks
//! byte-identically; the typed payloads exist purely so transformations
//! can be written against structure instead of text.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::changelog::{
    AddColumn, AddForeignKey, AddUniqueConstraint, Change, ChangeDocument, ChangeOp, ChangeSet,
    ColumnDef, CreateIndex, CreateTable, DropColumn, DropForeignKey, DropIndex, ModifyDataType,
};
use crate::error::{ChangelogError, Result};

static ITEM_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-\s*([A-Za-z][A-Za-z0-9]*):\s*(.*)$").expect("item regex"));
static KEY_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*):\s*(.*)$").expect("key regex"));

/// Parses a changelog document.
///
/// # Errors
///
/// Returns [`ChangelogError::MalformedDocument`] when the document has no
/// `databaseChangeLog:` key, when a mapping key is duplicated within the
/// same scope, or when indentation collapses mid-block.
pub fn parse(input: &str) -> Result<ChangeDocument> {
    let lines: Vec<&str> = input.split('\n').collect();

    let mut root_idx = None;
    for (i, line) in lines.iter().enumerate() {
        if line.trim_end() == "databaseChangeLog:" {
            root_idx = Some(i);
            break;
        }
        if line.trim_start().starts_with("- changeSet:") {
            return Err(ChangelogError::malformed(
                i + 1,
                "change set before databaseChangeLog key",
            ));
        }
    }
    let Some(root_idx) = root_idx else {
        return Err(ChangelogError::malformed(
            1,
            "missing databaseChangeLog key",
        ));
    };

    let mut preamble: Vec<String> =
        lines[..=root_idx].iter().map(ToString::to_string).collect();

    let mut i = root_idx + 1;
    let mut between = Vec::new();
    while i < lines.len() && lines[i].trim() != "- changeSet:" {
        between.push(lines[i].to_string());
        i += 1;
    }

    let mut document = ChangeDocument::default();
    if i >= lines.len() {
        document.preamble = preamble;
        document.trailing = between;
        return Ok(document);
    }
    preamble.extend(between);
    document.preamble = preamble;

    let set_indent = indent_of(lines[i]);
    while i < lines.len() {
        let start = i;
        let mut end = i + 1;
        while end < lines.len()
            && !(indent_of(lines[end]) == set_indent && lines[end].trim() == "- changeSet:")
        {
            end += 1;
        }
        document
            .change_sets
            .push(parse_change_set(&lines[start..end], start)?);
        i = end;
    }

    Ok(document)
}

fn parse_change_set(block: &[&str], offset: usize) -> Result<ChangeSet> {
    let set_indent = indent_of(block[0]);

    let mut changes_idx = None;
    for (j, line) in block.iter().enumerate().skip(1) {
        if line.trim() == "changes:" && indent_of(line) > set_indent {
            changes_idx = Some(j);
            break;
        }
    }

    let (header_lines, changes_line, body_start) = match changes_idx {
        Some(j) => (&block[..j], Some(block[j].to_string()), j + 1),
        None => (block, None, block.len()),
    };

    let mut id = String::new();
    let mut author = String::new();
    for line in header_lines {
        if let Some(caps) = KEY_VALUE.captures(line.trim()) {
            match &caps[1] {
                "id" if id.is_empty() => id = strip_quotes(caps[2].trim()).to_string(),
                "author" if author.is_empty() => author = strip_quotes(caps[2].trim()).to_string(),
                _ => {}
            }
        }
    }

    let mut change_set = ChangeSet {
        id,
        author,
        header: header_lines.iter().map(ToString::to_string).collect(),
        injected: None,
        changes_line,
        leading_lines: Vec::new(),
        item_indent: set_indent + 2,
        changes: Vec::new(),
        footer: Vec::new(),
    };
    if body_start >= block.len() {
        return Ok(change_set);
    }

    let mut item_indent = None;
    for line in &block[body_start..] {
        if line.trim().is_empty() {
            continue;
        }
        if line.trim_start().starts_with("- ") {
            item_indent = Some(indent_of(line));
        }
        break;
    }
    let Some(item_indent) = item_indent else {
        change_set.footer = block[body_start..].iter().map(ToString::to_string).collect();
        return Ok(change_set);
    };
    change_set.item_indent = item_indent;

    let mut j = body_start;
    while j < block.len() {
        let line = block[j];
        let trimmed = line.trim();
        if trimmed.is_empty() {
            match change_set.changes.last_mut() {
                Some(last) => last.lines.push(line.to_string()),
                None => change_set.leading_lines.push(line.to_string()),
            }
            j += 1;
            continue;
        }
        let indent = indent_of(line);
        if indent == item_indent && trimmed.starts_with("- ") {
            let (change, next) = parse_change_item(block, j, item_indent, offset)?;
            change_set.changes.push(change);
            j = next;
            continue;
        }
        if indent < item_indent {
            change_set.footer = block[j..].iter().map(ToString::to_string).collect();
            break;
        }
        return Err(ChangelogError::malformed(
            offset + j + 1,
            "unexpected indentation inside changes block",
        ));
    }

    Ok(change_set)
}

fn parse_change_item(
    block: &[&str],
    start: usize,
    item_indent: usize,
    offset: usize,
) -> Result<(Change, usize)> {
    let mut end = start + 1;
    while end < block.len() {
        let line = block[end];
        if line.trim().is_empty() || indent_of(line) > item_indent {
            end += 1;
            continue;
        }
        break;
    }

    let raw: Vec<String> = block[start..end].iter().map(ToString::to_string).collect();
    let header = block[start].trim();
    let op = match ITEM_HEADER.captures(header) {
        None => ChangeOp::Other(header.trim_start_matches('-').trim().to_string()),
        Some(caps) => {
            let kind = caps[1].to_string();
            let inline_value = caps[2].trim();
            if kind == "sql" {
                ChangeOp::Sql
            } else if !inline_value.is_empty() {
                ChangeOp::Other(kind)
            } else {
                parse_known_op(&kind, &raw, item_indent, offset + start)?
            }
        }
    };

    Ok((Change { op, lines: raw }, end))
}

fn parse_known_op(
    kind: &str,
    raw: &[String],
    item_indent: usize,
    doc_line: usize,
) -> Result<ChangeOp> {
    let FieldBlock { fields, columns } = parse_field_block(raw, item_indent, doc_line)?;
    let get = |key: &str| {
        fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };
    let opt = |key: &str| get(key).filter(|v| !v.is_empty());

    let op = match kind {
        "createTable" => ChangeOp::CreateTable(CreateTable {
            table_name: get("tableName").unwrap_or_default(),
            columns,
        }),
        "addColumn" => ChangeOp::AddColumn(AddColumn {
            table_name: get("tableName").unwrap_or_default(),
            columns,
        }),
        "dropColumn" => ChangeOp::DropColumn(DropColumn {
            table_name: get("tableName").unwrap_or_default(),
            column_name: get("columnName").unwrap_or_default(),
        }),
        "addForeignKeyConstraint" => ChangeOp::AddForeignKey(AddForeignKey {
            base_table_name: get("baseTableName").unwrap_or_default(),
            base_column_names: split_csv(&get("baseColumnNames").unwrap_or_default()),
            referenced_table_name: get("referencedTableName").unwrap_or_default(),
            referenced_column_names: split_csv(&get("referencedColumnNames").unwrap_or_default()),
            constraint_name: opt("constraintName"),
            on_delete: opt("onDelete"),
            on_update: opt("onUpdate"),
        }),
        "dropForeignKeyConstraint" => ChangeOp::DropForeignKey(DropForeignKey {
            base_table_name: get("baseTableName").unwrap_or_default(),
            constraint_name: opt("constraintName"),
            base_column_names: split_csv(&get("baseColumnNames").unwrap_or_default()),
            referenced_table_name: opt("referencedTableName"),
        }),
        "addUniqueConstraint" => ChangeOp::AddUniqueConstraint(AddUniqueConstraint {
            table_name: get("tableName").unwrap_or_default(),
            column_names: split_csv(&get("columnNames").unwrap_or_default()),
            constraint_name: opt("constraintName"),
        }),
        "modifyDataType" => ChangeOp::ModifyDataType(ModifyDataType {
            table_name: get("tableName").unwrap_or_default(),
            column_name: get("columnName").unwrap_or_default(),
            new_data_type: get("newDataType").unwrap_or_default(),
        }),
        "createIndex" => ChangeOp::CreateIndex(CreateIndex {
            table_name: get("tableName").unwrap_or_default(),
            index_name: get("indexName").unwrap_or_default(),
            unique: get("unique").as_deref() == Some("true"),
            columns: columns.into_iter().map(|c| c.name).collect(),
        }),
        "dropIndex" => ChangeOp::DropIndex(DropIndex {
            index_name: get("indexName").unwrap_or_default(),
            table_name: opt("tableName"),
        }),
        other => ChangeOp::Other(other.to_string()),
    };
    Ok(op)
}

struct FieldBlock {
    fields: Vec<(String, String)>,
    columns: Vec<ColumnDef>,
}

fn parse_field_block(raw: &[String], item_indent: usize, doc_line: usize) -> Result<FieldBlock> {
    let mut fields = Vec::new();
    let mut columns = Vec::new();
    let mut seen = HashSet::new();

    let field_indent = raw
        .iter()
        .skip(1)
        .find(|l| !l.trim().is_empty())
        .map(|l| indent_of(l));
    let Some(field_indent) = field_indent else {
        return Ok(FieldBlock { fields, columns });
    };

    let mut k = 1;
    while k < raw.len() {
        let line = &raw[k];
        let trimmed = line.trim();
        if trimmed.is_empty() {
            k += 1;
            continue;
        }
        let indent = indent_of(line);
        if indent > item_indent && indent < field_indent {
            return Err(ChangelogError::malformed(
                doc_line + k + 1,
                "indentation collapses mid-block",
            ));
        }
        if indent > field_indent {
            k += 1;
            continue;
        }
        let Some(caps) = KEY_VALUE.captures(trimmed) else {
            return Err(ChangelogError::malformed(
                doc_line + k + 1,
                format!("expected a key: value pair, found '{trimmed}'"),
            ));
        };
        let key = caps[1].to_string();
        let value = strip_quotes(caps[2].trim()).to_string();
        if !seen.insert(key.clone()) {
            return Err(ChangelogError::malformed(
                doc_line + k + 1,
                format!("duplicate key '{key}' in the same scope"),
            ));
        }
        if key == "columns" {
            let (cols, next) = parse_columns(raw, k + 1, field_indent, doc_line)?;
            columns = cols;
            k = next;
            continue;
        }
        fields.push((key, value));
        k += 1;
    }

    Ok(FieldBlock { fields, columns })
}

fn parse_columns(
    raw: &[String],
    start: usize,
    field_indent: usize,
    doc_line: usize,
) -> Result<(Vec<ColumnDef>, usize)> {
    let mut columns = Vec::new();
    let mut current: Option<(ColumnDef, HashSet<String>)> = None;

    let mut k = start;
    while k < raw.len() {
        let line = &raw[k];
        let trimmed = line.trim();
        if trimmed.is_empty() {
            k += 1;
            continue;
        }
        // Column items sit either at the field level or one level deeper;
        // anything at the field level that is not a list item ends the list.
        let indent = indent_of(line);
        if indent < field_indent || (indent == field_indent && !trimmed.starts_with("- ")) {
            break;
        }
        if trimmed == "- column:" {
            if let Some((col, _)) = current.take() {
                columns.push(col);
            }
            current = Some((ColumnDef::default(), HashSet::new()));
            k += 1;
            continue;
        }
        if let Some(caps) = KEY_VALUE.captures(trimmed)
            && let Some((col, seen)) = current.as_mut()
        {
            let key = caps[1].to_string();
            let value = strip_quotes(caps[2].trim()).to_string();
            if key != "constraints" && !seen.insert(key.clone()) {
                return Err(ChangelogError::malformed(
                    doc_line + k + 1,
                    format!("duplicate key '{key}' in the same scope"),
                ));
            }
            match key.as_str() {
                "name" => col.name = value,
                "type" => col.column_type = value,
                "nullable" => col.nullable = Some(value == "true"),
                "primaryKey" => col.primary_key = value == "true",
                key if key.starts_with("defaultValue") => col.default_value = Some(value),
                _ => {}
            }
        }
        k += 1;
    }
    if let Some((col, _)) = current.take() {
        columns.push(col);
    }

    Ok((columns, k))
}

/// Number of leading spaces.
pub(crate) fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// Strips one level of surrounding single or double quotes.
pub(crate) fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"'))
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Splits a comma-separated list, trimming entries and dropping empties.
pub(crate) fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
