//! Durable share metadata backed by SQLite.
//!
//! All quota accounting funnels through [`MetadataStore::increment_download_if_allowed`],
//! a single conditional UPDATE evaluated inside SQLite. The calling layer
//! never does a read-then-write quota check; that is the one linearization
//! point the whole service relies on under concurrent downloads.

use crate::errors::{ShareError, ShareResult};
use crate::models::share::ShareRecord;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Schema for the `shares` table, embedded so `--migrate` and tests apply
/// the exact same statements.
pub const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

/// Result of the atomic check-and-increment on a share's download counter.
#[derive(Debug, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// Counter advanced; carries the new download count.
    Allowed(i64),
    /// Quota already reached; counter untouched.
    QuotaExceeded,
    /// No such record (possibly deleted by a concurrent reaper or lazy delete).
    NotFound,
}

const SELECT_COLUMNS: &str = "id, blob_ref, display_name, content_type, size_bytes, \
     created_at, expires_at, max_downloads, download_count, password_hash";

/// Store for `ShareRecord` rows, sharing the process-wide SQLite pool.
#[derive(Clone)]
pub struct MetadataStore {
    db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Apply the embedded schema. Idempotent.
    pub async fn migrate(&self) -> ShareResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Insert a freshly created record. Fails with `DuplicateId` if the id
    /// (or blob_ref) is already taken.
    pub async fn insert(&self, record: &ShareRecord) -> ShareResult<()> {
        let result = sqlx::query(
            "INSERT INTO shares (
                id, blob_ref, display_name, content_type, size_bytes,
                created_at, expires_at, max_downloads, download_count, password_hash
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(record.blob_ref)
        .bind(&record.display_name)
        .bind(record.content_type.as_deref())
        .bind(record.size_bytes)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.max_downloads)
        .bind(record.download_count)
        .bind(record.password_hash.as_deref())
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(ShareError::DuplicateId),
            Err(err) => Err(ShareError::Sqlx(err)),
        }
    }

    pub async fn get(&self, id: Uuid) -> ShareResult<Option<ShareRecord>> {
        let record = sqlx::query_as::<_, ShareRecord>(&format!(
            "SELECT {SELECT_COLUMNS} FROM shares WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Atomically increment the download counter if quota allows.
    ///
    /// The quota check and the increment are one conditional UPDATE, so two
    /// racing callers on a share with one remaining download can never both
    /// observe success.
    pub async fn increment_download_if_allowed(&self, id: Uuid) -> ShareResult<IncrementOutcome> {
        let new_count = sqlx::query_scalar::<_, i64>(
            "UPDATE shares
             SET download_count = download_count + 1
             WHERE id = ?
               AND (max_downloads IS NULL OR download_count < max_downloads)
             RETURNING download_count",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        match new_count {
            Some(count) => Ok(IncrementOutcome::Allowed(count)),
            // Zero rows updated: either the record is gone or the quota is
            // spent. A follow-up probe tells the two apart; the answer is
            // advisory (the record may vanish between the two statements)
            // but the increment itself already settled.
            None => {
                let exists =
                    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM shares WHERE id = ?")
                        .bind(id)
                        .fetch_one(&*self.db)
                        .await?;
                if exists > 0 {
                    Ok(IncrementOutcome::QuotaExceeded)
                } else {
                    Ok(IncrementOutcome::NotFound)
                }
            }
        }
    }

    /// Delete a record. Returns whether a row was actually removed.
    pub async fn delete(&self, id: Uuid) -> ShareResult<bool> {
        let result = sqlx::query("DELETE FROM shares WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All records whose time-based expiry has passed as of `now`.
    ///
    /// Candidates are narrowed in SQL and the deadline comparison happens in
    /// Rust, keeping it independent of the driver's timestamp text format.
    pub async fn expired_shares(&self, now: DateTime<Utc>) -> ShareResult<Vec<ShareRecord>> {
        let candidates = sqlx::query_as::<_, ShareRecord>(&format!(
            "SELECT {SELECT_COLUMNS} FROM shares WHERE expires_at IS NOT NULL"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(candidates
            .into_iter()
            .filter(|record| record.is_expired(now))
            .collect())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
