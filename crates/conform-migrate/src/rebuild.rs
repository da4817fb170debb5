//! Physical table rebuilds.
//!
//! SQLite cannot add or drop foreign keys in place, so the executor
//! replaces the table wholesale: create a temporary table with the final
//! constraint set, copy every row, swap the tables through a backup
//! rename, then recreate indexes and triggers from their raw CREATE SQL.
//! The whole sequence runs in one transaction on a dedicated connection;
//! `PRAGMA foreign_keys` is turned off for the duration and restored on
//! every exit path. A post-swap `PRAGMA foreign_key_check` guards
//! referential integrity before commit.

use conform_changelog::fk::ForeignKeySpec;
use sqlx::sqlite::SqliteConnection;
use sqlx::Connection;
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};
use crate::introspect::{self, quote_identifier};
use crate::normalize;
use crate::plan;

/// Rebuilds tables on a dedicated SQLite connection.
///
/// The executor assumes exclusive access to the database for the duration
/// of a rebuild; rebuilds for different tables are performed sequentially
/// by the caller.
pub struct TableRebuilder<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> TableRebuilder<'c> {
    /// Creates a rebuilder owning the connection for the duration.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Rebuilds `table`, dropping every current foreign key equal by base
    /// or by target to a `to_drop` entry and appending every `to_add`.
    ///
    /// # Errors
    ///
    /// - [`MigrateError::IdentifierNotFound`] when the table or a
    ///   referenced identifier cannot be resolved
    /// - [`MigrateError::TableMissing`] when the table reports no columns
    /// - [`MigrateError::ReferentialIntegrityViolated`] when the post-swap
    ///   foreign-key check returns violations
    /// - [`MigrateError::RebuildFailed`] for any other failing step; the
    ///   transaction is rolled back before returning
    pub async fn rebuild(
        &mut self,
        table: &str,
        to_add: &[ForeignKeySpec],
        to_drop: &[ForeignKeySpec],
    ) -> Result<()> {
        info!(table, adds = to_add.len(), drops = to_drop.len(), "rebuilding table");

        let conn: &mut SqliteConnection = &mut *self.conn;

        exec(conn, "PRAGMA foreign_keys=OFF", table).await?;
        if let Err(error) = sqlx::query("PRAGMA legacy_alter_table=ON")
            .execute(&mut *conn)
            .await
        {
            debug!(%error, "legacy_alter_table pragma unavailable");
        }

        let result = match conn.begin().await {
            Ok(mut tx) => {
                let outcome = rebuild_in_tx(&mut tx, table, to_add, to_drop).await;
                match outcome {
                    Ok(()) => tx.commit().await.map_err(|e| rebuild_failed(table, e)),
                    Err(error) => {
                        if let Err(rollback_error) = tx.rollback().await {
                            warn!(%rollback_error, table, "rollback after failed rebuild also failed");
                        }
                        Err(error)
                    }
                }
            }
            Err(source) => Err(rebuild_failed(table, source)),
        };

        restore_connection_state(conn, table).await;

        if result.is_ok() {
            info!(table, "rebuild committed");
        }
        result
    }
}

async fn rebuild_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
    to_add: &[ForeignKeySpec],
    to_drop: &[ForeignKeySpec],
) -> Result<()> {
    let conn: &mut SqliteConnection = &mut *tx;

    let tables = wrap(table, introspect::list_tables(conn).await)?;
    let physical = normalize::resolve_identifier(table, &tables)?;
    let tmp = format!("__tmp_{physical}");
    let bak = format!("__bak_{physical}");

    exec(
        conn,
        &format!("DROP TABLE IF EXISTS {}", quote_identifier(&tmp)),
        table,
    )
    .await?;
    exec(
        conn,
        &format!("DROP TABLE IF EXISTS {}", quote_identifier(&bak)),
        table,
    )
    .await?;

    let observed = wrap(table, introspect::read_table(conn, &physical).await)?;
    if observed.columns.is_empty() {
        return Err(MigrateError::TableMissing { table: physical });
    }

    let own_columns: Vec<String> = observed.columns.iter().map(|c| c.name.clone()).collect();
    let mut final_fks = Vec::new();
    for fk in plan::final_foreign_keys(&observed.foreign_keys, to_add, to_drop) {
        final_fks.push(normalize_foreign_key(conn, fk, &tables, &own_columns).await?);
    }

    let autoincrement = plan::autoincrement_columns(&observed.columns, &observed.create_sql);
    let create = plan::build_create_table(&tmp, &observed.columns, &autoincrement, &final_fks);
    debug!(sql = %create, "creating rebuild target");
    exec(conn, &create, table).await?;

    let column_list = own_columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    exec(
        conn,
        &format!(
            "INSERT INTO {} ({column_list}) SELECT {column_list} FROM {}",
            quote_identifier(&tmp),
            quote_identifier(&physical),
        ),
        table,
    )
    .await?;

    exec_with_fk_guard(conn, &rename_sql(&physical, &bak), table).await?;
    exec_with_fk_guard(conn, &rename_sql(&tmp, &physical), table).await?;
    exec_with_fk_guard(
        conn,
        &format!("DROP TABLE {}", quote_identifier(&bak)),
        table,
    )
    .await?;

    for index in &observed.indexes {
        match &index.create_sql {
            Some(sql) => {
                debug!(index = %index.name, "recreating index");
                exec(conn, sql, table).await?;
            }
            None => debug!(index = %index.name, "skipping implicit index"),
        }
    }
    for trigger in &observed.triggers {
        debug!(trigger = %trigger.name, "recreating trigger");
        exec(conn, &trigger.create_sql, table).await?;
    }

    exec(conn, "PRAGMA foreign_keys=ON", table).await?;
    check_referential_integrity(conn, &physical).await
}

/// Resolves base columns, the referenced table, and referenced columns of
/// one final constraint to physical names.
async fn normalize_foreign_key(
    conn: &mut SqliteConnection,
    mut fk: ForeignKeySpec,
    tables: &[String],
    own_columns: &[String],
) -> Result<ForeignKeySpec> {
    fk.base_columns = fk
        .base_columns
        .iter()
        .map(|c| normalize::resolve_identifier(c.trim(), own_columns))
        .collect::<Result<Vec<_>>>()?;
    if fk.referenced_table.trim().is_empty() {
        return Ok(fk);
    }
    fk.referenced_table = normalize::resolve_identifier(&fk.referenced_table, tables)?;
    if !fk.referenced_columns.is_empty() {
        let referenced_columns: Vec<String> =
            introspect::columns(conn, &fk.referenced_table)
                .await?
                .into_iter()
                .map(|c| c.name)
                .collect();
        fk.referenced_columns = fk
            .referenced_columns
            .iter()
            .map(|c| normalize::resolve_identifier(c.trim(), &referenced_columns))
            .collect::<Result<Vec<_>>>()?;
    }
    Ok(fk)
}

/// Runs `PRAGMA foreign_key_check` and builds the per-violation
/// diagnostics, including every foreign-key definition of each offending
/// table.
async fn check_referential_integrity(conn: &mut SqliteConnection, table: &str) -> Result<()> {
    let violations: Vec<(String, Option<i64>, String, i64)> =
        sqlx::query_as("PRAGMA foreign_key_check")
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| rebuild_failed(table, e))?;
    if violations.is_empty() {
        return Ok(());
    }

    let mut details = String::new();
    let mut offending: Vec<String> = Vec::new();
    for (violating_table, rowid, parent, fk_id) in &violations {
        let rowid = rowid.map_or_else(|| "?".to_string(), |r| r.to_string());
        details.push_str(&format!(
            "violation: table={violating_table} rowid={rowid} parent={parent} fk_id={fk_id}\n"
        ));
        if !offending.iter().any(|t| t == violating_table) {
            offending.push(violating_table.clone());
        }
    }
    for violating_table in &offending {
        let sql = format!(
            "PRAGMA foreign_key_list({})",
            quote_identifier(violating_table)
        );
        let rows: Vec<(i64, i64, String, String, Option<String>, String, String, String)> =
            sqlx::query_as(&sql)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| rebuild_failed(table, e))?;
        for (id, seq, referenced_table, from, to, on_update, on_delete, match_clause) in rows {
            details.push_str(&format!(
                "  {violating_table}.fk[{id}.{seq}] {from} -> {referenced_table}({}) \
                 on_update={on_update} on_delete={on_delete} match={match_clause}\n",
                to.unwrap_or_default(),
            ));
        }
    }

    Err(MigrateError::ReferentialIntegrityViolated {
        table: table.to_string(),
        details,
    })
}

/// Executes a statement, toggling `PRAGMA foreign_keys` off around it when
/// it is currently on, and restoring it after.
async fn exec_with_fk_guard(conn: &mut SqliteConnection, sql: &str, table: &str) -> Result<()> {
    let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| rebuild_failed(table, e))?;
    if enabled != 0 {
        exec(conn, "PRAGMA foreign_keys=OFF", table).await?;
    }
    let result = exec(conn, sql, table).await;
    if enabled != 0 {
        exec(conn, "PRAGMA foreign_keys=ON", table).await?;
    }
    result
}

/// Best-effort restoration of per-connection pragma state.
async fn restore_connection_state(conn: &mut SqliteConnection, table: &str) {
    if let Err(error) = sqlx::query("PRAGMA foreign_keys=ON").execute(&mut *conn).await {
        warn!(%error, table, "failed to restore foreign_keys pragma");
    }
    let _ = sqlx::query("PRAGMA legacy_alter_table=OFF")
        .execute(&mut *conn)
        .await;
}

fn rename_sql(from: &str, to: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_identifier(from),
        quote_identifier(to)
    )
}

async fn exec(conn: &mut SqliteConnection, sql: &str, table: &str) -> Result<()> {
    sqlx::query(sql)
        .execute(conn)
        .await
        .map(|_| ())
        .map_err(|e| rebuild_failed(table, e))
}

fn rebuild_failed(table: &str, source: sqlx::Error) -> MigrateError {
    MigrateError::RebuildFailed {
        table: table.to_string(),
        source,
    }
}

/// Re-tags plain database errors raised inside the rebuild sequence as
/// `RebuildFailed`; every other error kind passes through.
fn wrap<T>(table: &str, result: Result<T>) -> Result<T> {
    result.map_err(|error| match error {
        MigrateError::Database(source) => rebuild_failed(table, source),
        other => other,
    })
}
