//! Identifier normalization.
//!
//! Table and column names coming out of a changelog frequently differ from
//! the physical names in case or punctuation (`FormDeveloper` vs
//! `Form_Developer`). The normalizer resolves a requested identifier
//! against the set of live names using, in order: exact match,
//! case-insensitive match, canonical match (strip every non-alphanumeric
//! character and lowercase both sides), and a camel-to-snake heuristic.

use crate::error::{MigrateError, Result};

/// Resolves a requested identifier to a physical name.
///
/// # Errors
///
/// Returns [`MigrateError::IdentifierNotFound`] listing the known names in
/// ascending order when no rule matches.
pub fn resolve_identifier(requested: &str, known: &[String]) -> Result<String> {
    if let Some(name) = known.iter().find(|name| *name == requested) {
        return Ok(name.clone());
    }
    if let Some(name) = known
        .iter()
        .find(|name| name.eq_ignore_ascii_case(requested))
    {
        return Ok(name.clone());
    }
    let canonical_requested = canonical(requested);
    if let Some(name) = known
        .iter()
        .find(|name| canonical(name) == canonical_requested)
    {
        return Ok(name.clone());
    }
    let snake = camel_to_snake(requested);
    if let Some(name) = known.iter().find(|name| name.eq_ignore_ascii_case(&snake)) {
        return Ok(name.clone());
    }

    let mut sorted = known.to_vec();
    sorted.sort();
    Err(MigrateError::IdentifierNotFound {
        requested: requested.to_string(),
        known: sorted,
    })
}

/// Strips every non-alphanumeric character and lowercases the rest.
fn canonical(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_lowercase()
}

/// Inserts `_` before any uppercase letter preceded by a lowercase letter
/// or digit.
#[must_use]
pub fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower_or_digit = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() && prev_lower_or_digit {
            out.push('_');
        }
        prev_lower_or_digit = c.is_ascii_lowercase() || c.is_ascii_digit();
        out.push(c);
    }
    out
}
