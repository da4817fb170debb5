//! Engine orchestration.
//!
//! Wires the full pipeline together: parse the changelog, name anonymous
//! constraints, lower for SQLite, apply the physical rebuilds gated by the
//! audit store, and emit the lowered changelog artifact for the downstream
//! applier.

use std::path::PathBuf;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use tracing::{info, warn};

use conform_changelog::changelog::ChangeDocument;
use conform_changelog::lower::{PendingTypeChange, lower_for_sqlite};
use conform_changelog::namer::assign_constraint_names;

use crate::audit::{AuditStore, plan_hash};
use crate::error::Result;
use crate::rebuild::TableRebuilder;

/// Options steering an engine run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Run the constraint namer before extraction.
    pub auto_name_constraints: bool,
    /// Produce no output artifact when no change sets remain.
    pub skip_when_empty: bool,
    /// Destination directory for emitted changelog artifacts.
    pub output_dir: PathBuf,
    /// Report without rebuilding or writing artifacts.
    pub dry_run: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            auto_name_constraints: true,
            skip_when_empty: true,
            output_dir: PathBuf::from("migrations/generated"),
            dry_run: false,
        }
    }
}

impl EngineOptions {
    /// Sets the artifact output directory.
    #[must_use]
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Enables dry-run mode.
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }
}

/// What an engine run produced.
#[derive(Debug)]
pub struct EngineOutcome {
    /// Path of the emitted changelog artifact, when one was written.
    pub artifact_path: Option<PathBuf>,
    /// The lowered changelog text.
    pub lowered: String,
    /// Type changes dropped from the plan, for manual follow-up.
    pub pending_type_changes: Vec<PendingTypeChange>,
    /// Tables physically rebuilt during this run, in execution order.
    pub rebuilt_tables: Vec<String>,
    /// Canonical serialization of the rebuild plan, when one was derived.
    pub rebuild_plan: Option<String>,
    /// True when the rebuild plan hash was already recorded and the
    /// rebuilds were skipped.
    pub plan_already_applied: bool,
}

/// Lowers changelogs for SQLite and applies the required table rebuilds.
pub struct MigrationEngine {
    pool: SqlitePool,
    options: EngineOptions,
}

impl MigrationEngine {
    /// Creates an engine with the given options.
    pub fn new(pool: SqlitePool, options: EngineOptions) -> Self {
        Self { pool, options }
    }

    /// Creates an engine with default options.
    pub fn with_defaults(pool: SqlitePool) -> Self {
        Self::new(pool, EngineOptions::default())
    }

    /// Ensures the audit table exists.
    pub async fn init(&self) -> Result<()> {
        AuditStore::new(self.pool.clone()).ensure_table().await
    }

    /// Runs the full pipeline on a changelog document.
    ///
    /// Rebuilds for different tables run sequentially, in the order their
    /// first foreign-key operation appeared in the document; a failure in
    /// one rebuild aborts the run.
    pub async fn run(&self, changelog: &str) -> Result<EngineOutcome> {
        let mut document = ChangeDocument::parse(changelog)?;
        if self.options.auto_name_constraints {
            assign_constraint_names(&mut document);
        }
        let lowered = lower_for_sqlite(document);

        let mut rebuilt_tables = Vec::new();
        let mut plan_already_applied = false;
        let mut rebuild_plan = None;
        if !lowered.rebuild.is_empty() {
            let canonical = lowered.rebuild.canonical_text();
            rebuild_plan = Some(canonical.clone());
            let hash = plan_hash(&canonical);
            if self.options.dry_run {
                info!(%hash, "dry run: rebuild plan not applied");
            } else {
                let audit = AuditStore::new(self.pool.clone());
                audit.ensure_table().await?;
                if audit.was_already_applied(&hash).await? {
                    plan_already_applied = true;
                    info!(%hash, "rebuild plan already applied; skipping rebuilds");
                } else {
                    {
                        let mut conn = self.pool.acquire().await?;
                        let mut rebuilder = TableRebuilder::new(&mut conn);
                        for table_plan in lowered.rebuild.tables() {
                            rebuilder
                                .rebuild(
                                    &table_plan.table,
                                    &table_plan.to_add(),
                                    &table_plan.to_drop(),
                                )
                                .await?;
                            rebuilt_tables.push(table_plan.table.clone());
                        }
                    }
                    audit.record_applied(&hash, &canonical).await?;
                }
            }
        }

        let text = lowered.document.to_text();
        let artifact_path = if lowered.document.is_empty() && self.options.skip_when_empty {
            info!("no change sets remain after lowering; skipping artifact");
            None
        } else if self.options.dry_run {
            None
        } else {
            Some(self.write_artifacts(&text, &lowered.pending_type_changes)?)
        };

        Ok(EngineOutcome {
            artifact_path,
            lowered: text,
            pending_type_changes: lowered.pending_type_changes,
            rebuilt_tables,
            rebuild_plan,
            plan_already_applied,
        })
    }

    fn write_artifacts(
        &self,
        lowered: &str,
        pending: &[PendingTypeChange],
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.options.output_dir)?;
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");

        let path = self.options.output_dir.join(format!("changelog-{stamp}.yaml"));
        std::fs::write(&path, lowered)?;
        info!(path = %path.display(), "wrote lowered changelog");

        if !pending.is_empty() {
            let report = self
                .options
                .output_dir
                .join(format!("pending-type-changes-{stamp}.json"));
            std::fs::write(&report, serde_json::to_string_pretty(pending)?)?;
            warn!(
                count = pending.len(),
                path = %report.display(),
                "type changes were dropped from the plan; manual follow-up required"
            );
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditStore;
    use crate::introspect;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    async fn exec(pool: &SqlitePool, sql: &str) {
        sqlx::query(sql).execute(pool).await.unwrap();
    }

    fn engine_with_dir(pool: SqlitePool, dir: &std::path::Path) -> MigrationEngine {
        MigrationEngine::new(pool, EngineOptions::default().output_dir(dir))
    }

    const ADD_FK_CHANGELOG: &str = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: generated\n    \
changes:\n    \
- addForeignKeyConstraint:\n        \
baseTableName: child\n        \
baseColumnNames: parent_id\n        \
referencedTableName: parent\n        \
referencedColumnNames: id\n        \
constraintName: fk_child_parent\n";

    async fn seed_parent_child(pool: &SqlitePool) {
        exec(pool, "CREATE TABLE parent (id INTEGER PRIMARY KEY)").await;
        exec(
            pool,
            "CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER)",
        )
        .await;
        exec(pool, "INSERT INTO parent (id) VALUES (1)").await;
        exec(pool, "INSERT INTO child (id, parent_id) VALUES (1, 1)").await;
    }

    #[tokio::test]
    async fn test_add_foreign_key_end_to_end() {
        let pool = create_test_pool().await;
        seed_parent_child(&pool).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_dir(pool.clone(), dir.path());

        let outcome = engine.run(ADD_FK_CHANGELOG).await.unwrap();
        assert_eq!(outcome.rebuilt_tables, vec!["child"]);
        assert!(!outcome.plan_already_applied);
        assert!(!outcome.lowered.contains("addForeignKeyConstraint"));
        // The only change set held the FK operation, so nothing remains.
        assert!(outcome.artifact_path.is_none());

        let mut conn = pool.acquire().await.unwrap();
        let fks = introspect::foreign_keys(&mut conn, "child").await.unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].referenced_table, "parent");
        assert_eq!(fks[0].base_columns, vec!["parent_id"]);
        assert_eq!(fks[0].referenced_columns, vec!["id"]);
    }

    #[tokio::test]
    async fn test_second_run_is_skipped_by_the_audit_store() {
        let pool = create_test_pool().await;
        seed_parent_child(&pool).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_dir(pool.clone(), dir.path());

        let first = engine.run(ADD_FK_CHANGELOG).await.unwrap();
        assert_eq!(first.rebuilt_tables, vec!["child"]);

        let second = engine.run(ADD_FK_CHANGELOG).await.unwrap();
        assert!(second.plan_already_applied);
        assert!(second.rebuilt_tables.is_empty());

        let audit = AuditStore::new(pool.clone());
        assert_eq!(audit.count_applied().await.unwrap(), 1);

        let mut conn = pool.acquire().await.unwrap();
        let fks = introspect::foreign_keys(&mut conn, "child").await.unwrap();
        assert_eq!(fks.len(), 1);
    }

    #[tokio::test]
    async fn test_modify_data_type_is_reported_not_applied() {
        let pool = create_test_pool().await;
        exec(&pool, "CREATE TABLE t (id INTEGER PRIMARY KEY, c INTEGER)").await;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_dir(pool.clone(), dir.path());

        let changelog = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- modifyDataType:\n        \
tableName: t\n        \
columnName: c\n        \
newDataType: BIGINT\n";
        let outcome = engine.run(changelog).await.unwrap();
        assert_eq!(outcome.pending_type_changes.len(), 1);
        assert_eq!(outcome.pending_type_changes[0].table, "t");
        assert_eq!(outcome.pending_type_changes[0].column, "c");
        assert_eq!(outcome.pending_type_changes[0].new_type, "BIGINT");
        // Change set pruned, skip_when_empty holds back the artifact.
        assert!(outcome.artifact_path.is_none());

        let mut conn = pool.acquire().await.unwrap();
        let cols = introspect::columns(&mut conn, "t").await.unwrap();
        assert_eq!(cols[1].declared_type, "INTEGER");
    }

    #[tokio::test]
    async fn test_artifact_and_pending_report_are_written() {
        let pool = create_test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_dir(pool.clone(), dir.path());

        let changelog = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- dropColumn:\n        \
tableName: t\n        \
columnName: old\n    \
- modifyDataType:\n        \
tableName: t\n        \
columnName: c\n        \
newDataType: BIGINT\n";
        let outcome = engine.run(changelog).await.unwrap();

        let artifact = outcome.artifact_path.expect("artifact written");
        let written = std::fs::read_to_string(&artifact).unwrap();
        assert_eq!(written, outcome.lowered);
        assert!(written.contains("dropColumn"));
        assert!(!written.contains("modifyDataType"));

        let report = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().starts_with("pending-type-changes-"))
            .expect("pending report written");
        let json: Vec<PendingTypeChange> =
            serde_json::from_str(&std::fs::read_to_string(report.path()).unwrap()).unwrap();
        assert_eq!(json, outcome.pending_type_changes);
    }

    #[tokio::test]
    async fn test_skip_when_empty_disabled_writes_empty_artifact() {
        let pool = create_test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let mut options = EngineOptions::default().output_dir(dir.path());
        options.skip_when_empty = false;
        let engine = MigrationEngine::new(pool, options);

        let changelog = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- modifyDataType:\n        \
tableName: t\n        \
columnName: c\n        \
newDataType: BIGINT\n";
        let outcome = engine.run(changelog).await.unwrap();
        assert!(outcome.artifact_path.is_some());
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let pool = create_test_pool().await;
        seed_parent_child(&pool).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = MigrationEngine::new(
            pool.clone(),
            EngineOptions::default().output_dir(dir.path()).dry_run(true),
        );

        let outcome = engine.run(ADD_FK_CHANGELOG).await.unwrap();
        assert!(outcome.rebuilt_tables.is_empty());
        assert!(outcome.artifact_path.is_none());

        let mut conn = pool.acquire().await.unwrap();
        let fks = introspect::foreign_keys(&mut conn, "child").await.unwrap();
        assert!(fks.is_empty());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_failed_rebuild_records_no_audit_hash() {
        let pool = create_test_pool().await;
        exec(&pool, "CREATE TABLE parent (id INTEGER PRIMARY KEY)").await;
        exec(
            &pool,
            "CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER)",
        )
        .await;
        // Orphan row: the foreign-key check after the swap must fail.
        exec(&pool, "INSERT INTO child (id, parent_id) VALUES (1, 99)").await;
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_dir(pool.clone(), dir.path());

        let err = engine.run(ADD_FK_CHANGELOG).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::MigrateError::ReferentialIntegrityViolated { .. }
        ));

        let audit = AuditStore::new(pool.clone());
        assert_eq!(audit.count_applied().await.unwrap(), 0);

        // The original table survived untouched.
        let mut conn = pool.acquire().await.unwrap();
        let fks = introspect::foreign_keys(&mut conn, "child").await.unwrap();
        assert!(fks.is_empty());
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM child")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_namer_runs_before_extraction() {
        let pool = create_test_pool().await;
        seed_parent_child(&pool).await;
        let dir = tempfile::tempdir().unwrap();
        let engine = MigrationEngine::new(
            pool.clone(),
            EngineOptions::default().output_dir(dir.path()).dry_run(true),
        );

        // Anonymous FK: still lowered and planned, with a derived name.
        let changelog = "databaseChangeLog:\n\
- changeSet:\n    \
id: 1\n    \
author: a\n    \
changes:\n    \
- addForeignKeyConstraint:\n        \
baseTableName: child\n        \
baseColumnNames: parent_id\n        \
referencedTableName: parent\n        \
referencedColumnNames: id\n";
        let outcome = engine.run(changelog).await.unwrap();
        assert!(!outcome.lowered.contains("addForeignKeyConstraint"));
    }
}
