//! Rebuild audit store.
//!
//! Records a content hash of every rebuild plan already applied, so
//! re-running the engine with the same lowered plan skips the physical
//! rebuilds (at-most-once enforcement). The hash is the lowercase hex of
//! SHA-256 over the plan's canonical textual serialization.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;

use crate::error::{MigrateError, Result};

/// SQL to create the audit table.
pub const CREATE_AUDIT_TABLE_SQL: &str = "\
CREATE TABLE IF NOT EXISTS MIGRATION_API_AUDIT (
    id INTEGER PRIMARY KEY,
    hash VARCHAR(128) NOT NULL UNIQUE,
    description TEXT,
    applied_at TEXT NOT NULL
)";

/// Computes the audit hash of a canonical plan serialization.
#[must_use]
pub fn plan_hash(canonical_plan: &str) -> String {
    let digest = Sha256::digest(canonical_plan.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Manages the rebuild audit table.
pub struct AuditStore {
    pool: SqlitePool,
}

impl AuditStore {
    /// Creates a new audit store on the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ensures the audit table exists.
    pub async fn ensure_table(&self) -> Result<()> {
        sqlx::query(CREATE_AUDIT_TABLE_SQL)
            .execute(&self.pool)
            .await
            .map_err(MigrateError::AuditStoreFailed)?;
        Ok(())
    }

    /// Returns whether a plan with this hash was already applied.
    pub async fn was_already_applied(&self, hash: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM MIGRATION_API_AUDIT WHERE hash = ?")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await
                .map_err(MigrateError::AuditStoreFailed)?;
        Ok(row.is_some())
    }

    /// Records a plan as applied. Duplicate hashes are a no-op.
    pub async fn record_applied(&self, hash: &str, description: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO MIGRATION_API_AUDIT (hash, description, applied_at) \
             VALUES (?, ?, ?)",
        )
        .bind(hash)
        .bind(description)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(MigrateError::AuditStoreFailed)?;
        Ok(())
    }

    /// Counts recorded plans.
    pub async fn count_applied(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM MIGRATION_API_AUDIT")
            .fetch_one(&self.pool)
            .await
            .map_err(MigrateError::AuditStoreFailed)?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    #[test]
    fn test_plan_hash_is_stable_lowercase_hex() {
        let a = plan_hash("TABLE=child\nADD pid -> parent(id)\n");
        let b = plan_hash("TABLE=child\nADD pid -> parent(id)\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let c = plan_hash("TABLE=other\n");
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let pool = create_test_pool().await;
        let audit = AuditStore::new(pool);
        audit.ensure_table().await.unwrap();
        audit.ensure_table().await.unwrap();
    }

    #[tokio::test]
    async fn test_record_and_check_applied() {
        let pool = create_test_pool().await;
        let audit = AuditStore::new(pool);
        audit.ensure_table().await.unwrap();

        let hash = plan_hash("TABLE=t\n");
        assert!(!audit.was_already_applied(&hash).await.unwrap());

        audit.record_applied(&hash, "TABLE=t\n").await.unwrap();
        assert!(audit.was_already_applied(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_record_is_a_noop() {
        let pool = create_test_pool().await;
        let audit = AuditStore::new(pool);
        audit.ensure_table().await.unwrap();

        let hash = plan_hash("TABLE=t\n");
        audit.record_applied(&hash, "first").await.unwrap();
        audit.record_applied(&hash, "second").await.unwrap();
        assert_eq!(audit.count_applied().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_table_surfaces_audit_error() {
        let pool = create_test_pool().await;
        let audit = AuditStore::new(pool);
        let err = audit.was_already_applied("x").await.unwrap_err();
        assert!(matches!(err, MigrateError::AuditStoreFailed(_)));
    }
}
