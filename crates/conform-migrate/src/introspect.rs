//! Live SQLite schema reader.
//!
//! Reads everything a rebuild needs to preserve about a table: columns in
//! creation order (`PRAGMA table_info`), the raw CREATE statement from
//! `sqlite_master` (used to detect AUTOINCREMENT), the current foreign
//! keys (`PRAGMA foreign_key_list`, grouped by constraint id), and the
//! indexes and triggers with their raw CREATE SQL. Indexes whose SQL is
//! NULL are implicit (derived from the primary key) and are retained with
//! a marker so recreation can skip them.

use conform_changelog::fk::ForeignKeySpec;
use sqlx::sqlite::SqliteConnection;

use crate::error::{MigrateError, Result};

/// A column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedColumn {
    /// Column name.
    pub name: String,
    /// Declared type, verbatim (may be empty).
    pub declared_type: String,
    /// Whether NOT NULL is set.
    pub not_null: bool,
    /// Default expression, verbatim.
    pub default_expr: Option<String>,
    /// Whether the column participates in the primary key.
    pub primary_key: bool,
}

/// An index observed on a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedIndex {
    /// Index name.
    pub name: String,
    /// Raw CREATE SQL; `None` marks an implicit (PK-derived) index that
    /// must not be recreated.
    pub create_sql: Option<String>,
}

/// A trigger observed on a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTrigger {
    /// Trigger name.
    pub name: String,
    /// Raw CREATE SQL.
    pub create_sql: String,
}

/// Everything observed about a live table.
#[derive(Debug, Clone)]
pub struct ObservedTable {
    /// Physical table name.
    pub name: String,
    /// Columns, in the order SQLite reports them (creation order).
    pub columns: Vec<ObservedColumn>,
    /// Raw CREATE statement from `sqlite_master`.
    pub create_sql: String,
    /// Current foreign keys.
    pub foreign_keys: Vec<ForeignKeySpec>,
    /// Indexes, in definition order.
    pub indexes: Vec<ObservedIndex>,
    /// Triggers, in definition order.
    pub triggers: Vec<ObservedTrigger>,
}

/// Lists user tables, excluding SQLite-internal names.
pub async fn list_tables(conn: &mut SqliteConnection) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Reads the full observed state of a table.
///
/// # Errors
///
/// Returns [`MigrateError::TableMissing`] when `sqlite_master` has no row
/// for the table.
pub async fn read_table(conn: &mut SqliteConnection, name: &str) -> Result<ObservedTable> {
    let create_sql = create_sql(conn, name).await?;
    let columns = columns(conn, name).await?;
    let foreign_keys = foreign_keys(conn, name).await?;
    let indexes = indexes(conn, name).await?;
    let triggers = triggers(conn, name).await?;
    Ok(ObservedTable {
        name: name.to_string(),
        columns,
        create_sql,
        foreign_keys,
        indexes,
        triggers,
    })
}

/// Columns in creation order, from `PRAGMA table_info`.
pub async fn columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<ObservedColumn>> {
    let sql = format!("PRAGMA table_info({})", quote_identifier(table));
    let rows: Vec<(i64, String, String, i64, Option<String>, i64)> =
        sqlx::query_as(&sql).fetch_all(conn).await?;
    Ok(rows
        .into_iter()
        .map(|(_cid, name, declared_type, not_null, default_expr, pk)| ObservedColumn {
            name,
            declared_type,
            not_null: not_null != 0,
            default_expr,
            primary_key: pk != 0,
        })
        .collect())
}

/// Raw CREATE statement for a table from `sqlite_master`.
pub async fn create_sql(conn: &mut SqliteConnection, table: &str) -> Result<String> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT sql FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table)
            .fetch_optional(conn)
            .await?;
    match row {
        Some((sql,)) => Ok(sql.unwrap_or_default()),
        None => Err(MigrateError::TableMissing {
            table: table.to_string(),
        }),
    }
}

/// Current foreign keys, aggregated from `PRAGMA foreign_key_list`.
///
/// All rows sharing an `id` form one constraint; `from` and `to` columns
/// are concatenated in `seq` order. A NULL `to` (implicit primary-key
/// reference) yields an empty referenced-column list.
pub async fn foreign_keys(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Vec<ForeignKeySpec>> {
    let sql = format!("PRAGMA foreign_key_list({})", quote_identifier(table));
    let mut rows: Vec<(i64, i64, String, String, Option<String>, String, String, String)> =
        sqlx::query_as(&sql).fetch_all(conn).await?;
    rows.sort_by_key(|&(id, seq, ..)| (id, seq));

    let mut specs: Vec<(i64, ForeignKeySpec)> = Vec::new();
    for (id, _seq, ref_table, from, to, on_update, on_delete, match_clause) in rows {
        let idx = match specs.iter().position(|(spec_id, _)| *spec_id == id) {
            Some(idx) => idx,
            None => {
                specs.push((
                    id,
                    ForeignKeySpec {
                        base_columns: Vec::new(),
                        referenced_table: ref_table,
                        referenced_columns: Vec::new(),
                        on_delete: Some(on_delete),
                        on_update: Some(on_update),
                        match_clause: Some(match_clause),
                    },
                ));
                specs.len() - 1
            }
        };
        let spec = &mut specs[idx].1;
        spec.base_columns.push(from);
        if let Some(to) = to {
            spec.referenced_columns.push(to);
        }
    }
    Ok(specs.into_iter().map(|(_, spec)| spec).collect())
}

/// Indexes on a table with their raw CREATE SQL, in definition order.
pub async fn indexes(conn: &mut SqliteConnection, table: &str) -> Result<Vec<ObservedIndex>> {
    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT name, sql FROM sqlite_master WHERE type='index' AND tbl_name = ? ORDER BY rowid",
    )
    .bind(table)
    .fetch_all(conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(name, create_sql)| ObservedIndex { name, create_sql })
        .collect())
}

/// Triggers on a table with their raw CREATE SQL, in definition order.
pub async fn triggers(conn: &mut SqliteConnection, table: &str) -> Result<Vec<ObservedTrigger>> {
    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT name, sql FROM sqlite_master WHERE type='trigger' AND tbl_name = ? ORDER BY rowid",
    )
    .bind(table)
    .fetch_all(conn)
    .await?;
    Ok(rows
        .into_iter()
        .filter_map(|(name, create_sql)| {
            create_sql.map(|create_sql| ObservedTrigger { name, create_sql })
        })
        .collect())
}

/// Quotes an identifier, doubling any embedded double quote.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    async fn exec(conn: &mut SqliteConnection, sql: &str) {
        sqlx::query(sql).execute(conn).await.unwrap();
    }

    #[tokio::test]
    async fn test_columns_in_creation_order() {
        let pool = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        exec(
            &mut conn,
            "CREATE TABLE t (b TEXT DEFAULT 'B', a INTEGER NOT NULL, c TEXT)",
        )
        .await;

        let cols = columns(&mut conn, "t").await.unwrap();
        assert_eq!(
            cols.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["b", "a", "c"]
        );
        assert_eq!(cols[0].default_expr.as_deref(), Some("'B'"));
        assert!(cols[1].not_null);
        assert!(!cols[0].primary_key);
    }

    #[tokio::test]
    async fn test_foreign_keys_grouped_by_id_and_seq() {
        let pool = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        exec(&mut conn, "CREATE TABLE p (a INTEGER, b INTEGER, PRIMARY KEY (a, b))").await;
        exec(&mut conn, "CREATE TABLE q (id INTEGER PRIMARY KEY)").await;
        exec(
            &mut conn,
            "CREATE TABLE c (x INTEGER, y INTEGER, z INTEGER, \
             FOREIGN KEY (x, y) REFERENCES p (a, b) ON DELETE CASCADE, \
             FOREIGN KEY (z) REFERENCES q (id))",
        )
        .await;

        let fks = foreign_keys(&mut conn, "c").await.unwrap();
        assert_eq!(fks.len(), 2);

        let composite = fks
            .iter()
            .find(|fk| fk.base_columns.len() == 2)
            .expect("composite fk");
        assert_eq!(composite.base_columns, vec!["x", "y"]);
        assert_eq!(composite.referenced_table, "p");
        assert_eq!(composite.referenced_columns, vec!["a", "b"]);
        assert_eq!(composite.on_delete.as_deref(), Some("CASCADE"));

        let simple = fks
            .iter()
            .find(|fk| fk.base_columns.len() == 1)
            .expect("simple fk");
        assert_eq!(simple.base_columns, vec!["z"]);
        assert_eq!(simple.referenced_table, "q");
    }

    #[tokio::test]
    async fn test_implicit_index_is_marked() {
        let pool = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        exec(
            &mut conn,
            "CREATE TABLE t (a INTEGER, b TEXT, PRIMARY KEY (a, b))",
        )
        .await;
        exec(&mut conn, "CREATE INDEX idx_t_b ON t (b)").await;

        let idx = indexes(&mut conn, "t").await.unwrap();
        assert_eq!(idx.len(), 2);
        let implicit = idx.iter().find(|i| i.create_sql.is_none()).unwrap();
        assert!(implicit.name.starts_with("sqlite_autoindex"));
        let explicit = idx.iter().find(|i| i.create_sql.is_some()).unwrap();
        assert_eq!(explicit.name, "idx_t_b");
    }

    #[tokio::test]
    async fn test_triggers_are_read_verbatim() {
        let pool = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        exec(&mut conn, "CREATE TABLE t (a INTEGER, note TEXT)").await;
        let trigger_sql = "CREATE TRIGGER trg_t_bi BEFORE INSERT ON t \
             FOR EACH ROW WHEN NEW.note IS NULL \
             BEGIN SELECT RAISE(ABORT,'note required'); END";
        exec(&mut conn, trigger_sql).await;

        let trg = triggers(&mut conn, "t").await.unwrap();
        assert_eq!(trg.len(), 1);
        assert_eq!(trg[0].name, "trg_t_bi");
        assert_eq!(trg[0].create_sql, trigger_sql);
    }

    #[tokio::test]
    async fn test_list_tables_excludes_internal() {
        let pool = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        exec(
            &mut conn,
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT)",
        )
        .await;
        exec(&mut conn, "INSERT INTO t DEFAULT VALUES").await;

        let tables = list_tables(&mut conn).await.unwrap();
        assert_eq!(tables, vec!["t"]);
    }

    #[tokio::test]
    async fn test_missing_table_errors() {
        let pool = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let err = read_table(&mut conn, "nope").await.unwrap_err();
        assert!(matches!(err, MigrateError::TableMissing { table } if table == "nope"));
    }

    #[test]
    fn test_quote_identifier_doubles_quotes() {
        assert_eq!(quote_identifier("weird table"), "\"weird table\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
