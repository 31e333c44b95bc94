//! The share lifecycle engine.
//!
//! Every access evaluates the record's state fresh: expiry first, then the
//! password gate, then the atomic quota increment that decides delivery.
//! Terminal states (expired, exhausted) trigger lazy deletion of record and
//! blob on the access that discovers them; a background reaper sweep uses
//! the same purge path but is only a best-effort cleanup, never the
//! correctness mechanism.

use crate::errors::{ShareError, ShareResult};
use crate::models::share::ShareRecord;
use crate::services::{
    blob_store::BlobStore,
    metadata_store::{IncrementOutcome, MetadataStore},
    password, policy,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// A successfully delivered payload.
#[derive(Debug)]
pub struct Delivery {
    pub bytes: Bytes,
    pub display_name: String,
    pub content_type: Option<String>,
}

/// Snapshot of a still-valid share, for the status endpoint.
#[derive(Debug, Serialize)]
pub struct ShareStatus {
    pub id: Uuid,
    pub display_name: String,
    pub size_bytes: i64,
    /// `None` means unlimited.
    pub remaining_downloads: Option<i64>,
    pub requires_password: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Orchestrates the metadata store and the blob store; safe to clone and
/// share across request handlers and the reaper task.
#[derive(Clone)]
pub struct ShareService {
    meta: MetadataStore,
    blobs: BlobStore,
}

impl ShareService {
    pub fn new(meta: MetadataStore, blobs: BlobStore) -> Self {
        Self { meta, blobs }
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.meta
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blobs
    }

    /// Create a new share: validate policy, hash the password, persist the
    /// blob, then the record.
    ///
    /// The blob is written before the record; if the record insert fails the
    /// blob is deleted again, so no orphan blob survives a failed create.
    pub async fn create(
        &self,
        bytes: &[u8],
        display_name: &str,
        content_type: Option<String>,
        duration_token: &str,
        max_downloads_token: Option<&str>,
        plaintext_password: Option<&str>,
    ) -> ShareResult<ShareRecord> {
        let now = Utc::now();
        let expires_at = policy::expiry_from_token(duration_token, now)?;
        let max_downloads = policy::max_downloads_from_token(max_downloads_token)?;
        let password_hash = plaintext_password
            .filter(|p| !p.is_empty())
            .map(password::hash_password)
            .transpose()?;

        let blob_ref = self.blobs.put(bytes).await?;

        let record = ShareRecord {
            id: Uuid::new_v4(),
            blob_ref,
            display_name: display_name.to_string(),
            content_type,
            size_bytes: bytes.len() as i64,
            created_at: now,
            expires_at,
            max_downloads,
            download_count: 0,
            password_hash,
        };

        if let Err(err) = self.meta.insert(&record).await {
            // Compensating rollback so the blob does not outlive the failed
            // record insert.
            if let Err(cleanup_err) = self.blobs.delete(blob_ref).await {
                warn!(%blob_ref, error = %cleanup_err, "failed to roll back blob after insert failure");
            }
            return Err(err);
        }

        info!(id = %record.id, expires_at = ?record.expires_at,
              max_downloads = ?record.max_downloads, "share created");
        Ok(record)
    }

    /// Deliver a share's payload, consuming one download from its quota.
    ///
    /// The payload is read into memory before the increment: once a request
    /// wins the last download slot, a concurrent loser purging the
    /// exhausted share can no longer yank the blob out from under it. A
    /// failed blob fetch therefore never consumes quota either.
    pub async fn consume(
        &self,
        id: Uuid,
        password_attempt: Option<&str>,
    ) -> ShareResult<Delivery> {
        let record = self.load_valid(id, password_attempt).await?;
        let blob_ref = record.blob_ref;
        let delivery = self.fetch_delivery(record).await?;

        match self.meta.increment_download_if_allowed(id).await? {
            IncrementOutcome::Allowed(count) => {
                info!(%id, download_count = count, "download allowed");
                Ok(delivery)
            }
            IncrementOutcome::QuotaExceeded => {
                info!(%id, "quota exhausted, purging share");
                self.purge(id, blob_ref).await;
                Err(ShareError::QuotaExhausted)
            }
            // Lost a race with a concurrent deleter.
            IncrementOutcome::NotFound => Err(ShareError::NotFound),
        }
    }

    /// Deliver a share's payload without touching the download counter.
    ///
    /// Previews never bypass the password gate: a password-protected share
    /// is not previewable at all, whatever attempt accompanies the request.
    /// An exhausted share is not previewable either; a record that used its
    /// last download but has not been purged yet must serve nothing.
    pub async fn preview(&self, id: Uuid) -> ShareResult<Delivery> {
        let record = self.load_valid(id, None).await?;
        if record.remaining_downloads() == Some(0) {
            info!(%id, "quota exhausted, purging share");
            self.purge(record.id, record.blob_ref).await;
            return Err(ShareError::QuotaExhausted);
        }
        self.fetch_delivery(record).await
    }

    /// Report a share's validity without serving content or mutating state,
    /// beyond lazily purging shares discovered to be expired or exhausted.
    pub async fn status(&self, id: Uuid) -> ShareResult<ShareStatus> {
        let record = self.meta.get(id).await?.ok_or(ShareError::NotFound)?;

        if record.is_expired(Utc::now()) {
            info!(%id, "share expired, purging");
            self.purge(record.id, record.blob_ref).await;
            return Err(ShareError::Expired);
        }
        if record.remaining_downloads() == Some(0) {
            info!(%id, "quota exhausted, purging share");
            self.purge(record.id, record.blob_ref).await;
            return Err(ShareError::QuotaExhausted);
        }

        let remaining_downloads = record.remaining_downloads();
        Ok(ShareStatus {
            id: record.id,
            display_name: record.display_name,
            size_bytes: record.size_bytes,
            remaining_downloads,
            requires_password: record.password_hash.is_some(),
            expires_at: record.expires_at,
        })
    }

    /// Delete every share whose expiry has passed. Returns how many were
    /// purged. Idempotent and safe to run concurrently with live accesses.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> ShareResult<usize> {
        let expired = self.meta.expired_shares(now).await?;
        let mut purged = 0;
        for record in expired {
            info!(id = %record.id, expired_at = ?record.expires_at, "reaper purging expired share");
            self.purge(record.id, record.blob_ref).await;
            purged += 1;
        }
        Ok(purged)
    }

    /// Shared validity checks for consume and preview: existence, expiry,
    /// then the password gate. Failed or missing passwords never mutate the
    /// record.
    async fn load_valid(
        &self,
        id: Uuid,
        password_attempt: Option<&str>,
    ) -> ShareResult<ShareRecord> {
        let record = self.meta.get(id).await?.ok_or(ShareError::NotFound)?;

        // Expiry precedes every other check.
        if record.is_expired(Utc::now()) {
            info!(%id, "share expired, purging");
            self.purge(record.id, record.blob_ref).await;
            return Err(ShareError::Expired);
        }

        if let Some(hash) = &record.password_hash {
            match password_attempt {
                None => return Err(ShareError::PasswordRequired),
                Some(attempt) if !password::verify_password(attempt, hash) => {
                    info!(%id, "wrong password attempt");
                    return Err(ShareError::WrongPassword);
                }
                Some(_) => {}
            }
        }

        Ok(record)
    }

    async fn fetch_delivery(&self, record: ShareRecord) -> ShareResult<Delivery> {
        match self.blobs.get(record.blob_ref).await? {
            Some(bytes) => Ok(Delivery {
                bytes,
                display_name: record.display_name,
                content_type: record.content_type,
            }),
            None => {
                // A missing blob usually means the whole share was purged
                // concurrently between our record load and this fetch.
                if self.meta.get(record.id).await?.is_none() {
                    return Err(ShareError::NotFound);
                }
                // Record still present without backing blob: repair the
                // invariant by dropping the orphan record.
                warn!(id = %record.id, blob_ref = %record.blob_ref,
                      "record present but blob missing, deleting orphan record");
                if let Err(err) = self.meta.delete(record.id).await {
                    warn!(id = %record.id, error = %err, "failed to delete orphan record");
                }
                Err(ShareError::CorruptedShare)
            }
        }
    }

    /// Remove record and blob, record first, so a crash in between leaves an
    /// orphan blob (harmless, reapable) rather than a valid-looking record
    /// with no payload. Best-effort: failures are logged, not propagated,
    /// because callers are already on a terminal-state path.
    async fn purge(&self, id: Uuid, blob_ref: Uuid) {
        match self.meta.delete(id).await {
            Ok(_) => {}
            Err(err) => {
                warn!(%id, error = %err, "failed to delete share record");
                return;
            }
        }
        if let Err(err) = self.blobs.delete(blob_ref).await {
            warn!(%id, %blob_ref, error = %err, "failed to delete blob");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn service_with_key(key: Option<[u8; 32]>) -> (ShareService, TempDir) {
        let dir = TempDir::new().unwrap();
        let opts = SqliteConnectOptions::new()
            .filename(dir.path().join("shares.db"))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .unwrap();
        let meta = MetadataStore::new(Arc::new(pool));
        meta.migrate().await.unwrap();
        let blobs = BlobStore::new(dir.path().join("blobs"), key);
        (ShareService::new(meta, blobs), dir)
    }

    async fn service() -> (ShareService, TempDir) {
        service_with_key(None).await
    }

    /// Insert a share with an arbitrary expiry, bypassing the policy table.
    async fn insert_with_expiry(
        svc: &ShareService,
        bytes: &[u8],
        expires_at: Option<DateTime<Utc>>,
        max_downloads: Option<i64>,
        password_hash: Option<String>,
    ) -> ShareRecord {
        let blob_ref = svc.blobs.put(bytes).await.unwrap();
        let record = ShareRecord {
            id: Uuid::new_v4(),
            blob_ref,
            display_name: "stale.bin".into(),
            content_type: None,
            size_bytes: bytes.len() as i64,
            created_at: Utc::now() - Duration::days(2),
            expires_at,
            max_downloads,
            download_count: 0,
            password_hash,
        };
        svc.meta.insert(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn create_then_consume_roundtrip() {
        let (svc, _dir) = service().await;
        let record = svc
            .create(b"payload bytes", "doc.txt", Some("text/plain".into()), "1d", None, None)
            .await
            .unwrap();

        let delivery = svc.consume(record.id, None).await.unwrap();
        assert_eq!(delivery.bytes.as_ref(), b"payload bytes");
        assert_eq!(delivery.display_name, "doc.txt");
        assert_eq!(delivery.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn roundtrip_through_encryption() {
        let (svc, _dir) = service_with_key(Some([0x11; 32])).await;
        let record = svc
            .create(b"sealed bytes", "sealed.bin", None, "3h", None, None)
            .await
            .unwrap();

        let delivery = svc.consume(record.id, None).await.unwrap();
        assert_eq!(delivery.bytes.as_ref(), b"sealed bytes");
    }

    #[tokio::test]
    async fn single_download_share_lifecycle() {
        // Single-download share with a 3-hour expiry, no password.
        let (svc, _dir) = service().await;
        let record = svc
            .create(b"once", "once.txt", None, "3h", Some("1"), None)
            .await
            .unwrap();

        assert!(svc.consume(record.id, None).await.is_ok());
        assert!(matches!(
            svc.consume(record.id, None).await,
            Err(ShareError::QuotaExhausted)
        ));
        // The exhausted share was lazily purged: record and blob are gone.
        assert!(matches!(
            svc.consume(record.id, None).await,
            Err(ShareError::NotFound)
        ));
        assert!(svc.blobs.get(record.blob_ref).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn password_gate_flow() {
        let (svc, _dir) = service().await;
        let record = svc
            .create(b"guarded", "secret.txt", None, "1d", None, Some("secret"))
            .await
            .unwrap();

        assert!(matches!(
            svc.consume(record.id, None).await,
            Err(ShareError::PasswordRequired)
        ));
        assert!(matches!(
            svc.consume(record.id, Some("wrong")).await,
            Err(ShareError::WrongPassword)
        ));

        // Failed attempts never consume quota.
        let loaded = svc.meta.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.download_count, 0);

        let delivery = svc.consume(record.id, Some("secret")).await.unwrap();
        assert_eq!(delivery.bytes.as_ref(), b"guarded");
    }

    #[tokio::test]
    async fn expired_share_is_purged_on_access() {
        let (svc, _dir) = service().await;
        let past = Utc::now() - Duration::days(1);
        let record = insert_with_expiry(&svc, b"old", Some(past), None, None).await;

        assert!(matches!(
            svc.consume(record.id, None).await,
            Err(ShareError::Expired)
        ));
        assert!(svc.meta.get(record.id).await.unwrap().is_none());
        assert!(svc.blobs.get(record.blob_ref).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expiry_checked_before_quota_and_password() {
        let (svc, _dir) = service().await;
        let past = Utc::now() - Duration::seconds(1);
        let hash = password::hash_password("pw").unwrap();
        let record = insert_with_expiry(&svc, b"old", Some(past), Some(5), Some(hash)).await;

        // Even with remaining quota and no password supplied, expiry wins.
        assert!(matches!(
            svc.consume(record.id, None).await,
            Err(ShareError::Expired)
        ));
    }

    #[tokio::test]
    async fn preview_does_not_consume_quota() {
        let (svc, _dir) = service().await;
        let record = svc
            .create(b"peek", "peek.png", Some("image/png".into()), "1w", Some("1"), None)
            .await
            .unwrap();

        let preview = svc.preview(record.id).await.unwrap();
        assert_eq!(preview.bytes.as_ref(), b"peek");
        assert_eq!(preview.content_type.as_deref(), Some("image/png"));

        let loaded = svc.meta.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.download_count, 0);

        // The single allowed download is still available.
        assert!(svc.consume(record.id, None).await.is_ok());
    }

    #[tokio::test]
    async fn preview_rejects_exhausted_share() {
        let (svc, _dir) = service().await;
        let record = svc
            .create(b"spent", "spent.txt", None, "1d", Some("1"), None)
            .await
            .unwrap();

        // The last allowed download leaves the record behind with its quota
        // used up; preview must not serve it.
        assert!(svc.consume(record.id, None).await.is_ok());
        assert!(svc.meta.get(record.id).await.unwrap().is_some());

        assert!(matches!(
            svc.preview(record.id).await,
            Err(ShareError::QuotaExhausted)
        ));
        // And the discovery lazily purged record and blob.
        assert!(svc.meta.get(record.id).await.unwrap().is_none());
        assert!(svc.blobs.get(record.blob_ref).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn preview_never_bypasses_password_gate() {
        let (svc, _dir) = service().await;
        let record = svc
            .create(b"guarded", "secret.txt", None, "1d", None, Some("pw"))
            .await
            .unwrap();

        assert!(matches!(
            svc.preview(record.id).await,
            Err(ShareError::PasswordRequired)
        ));
    }

    #[tokio::test]
    async fn status_reports_validity() {
        let (svc, _dir) = service().await;
        let record = svc
            .create(b"stat", "stat.txt", None, "1d", Some("3"), Some("pw"))
            .await
            .unwrap();

        let status = svc.status(record.id).await.unwrap();
        assert_eq!(status.remaining_downloads, Some(3));
        assert!(status.requires_password);
        assert!(status.expires_at.is_some());

        assert!(matches!(
            svc.status(Uuid::new_v4()).await,
            Err(ShareError::NotFound)
        ));
    }

    #[tokio::test]
    async fn status_purges_expired_share() {
        let (svc, _dir) = service().await;
        let past = Utc::now() - Duration::hours(1);
        let record = insert_with_expiry(&svc, b"old", Some(past), None, None).await;

        assert!(matches!(
            svc.status(record.id).await,
            Err(ShareError::Expired)
        ));
        assert!(svc.meta.get(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_blob_repairs_orphan_record() {
        let (svc, _dir) = service().await;
        let record = svc
            .create(b"gone", "gone.txt", None, "1d", None, None)
            .await
            .unwrap();

        // Simulate a lost blob behind the engine's back.
        svc.blobs.delete(record.blob_ref).await.unwrap();

        assert!(matches!(
            svc.consume(record.id, None).await,
            Err(ShareError::CorruptedShare)
        ));
        assert!(svc.meta.get(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_policy_rejected_before_any_write() {
        let (svc, dir) = service().await;
        assert!(matches!(
            svc.create(b"x", "x.txt", None, "2 weeks", None, None).await,
            Err(ShareError::InvalidPolicy(_))
        ));
        assert!(matches!(
            svc.create(b"x", "x.txt", None, "1d", Some("0"), None).await,
            Err(ShareError::InvalidPolicy(_))
        ));
        // No blob directory was even created.
        assert!(!dir.path().join("blobs").exists());
    }

    #[tokio::test]
    async fn failed_insert_rolls_back_blob() {
        let (svc, dir) = service().await;
        svc.meta.pool().close().await;

        assert!(matches!(
            svc.create(b"orphan?", "o.txt", None, "1d", None, None).await,
            Err(ShareError::Sqlx(_))
        ));

        // The compensating delete removed the blob again.
        let mut stack = vec![dir.path().join("blobs")];
        while let Some(path) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&path) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                assert!(path.is_dir(), "unexpected leftover file {path:?}");
                stack.push(path);
            }
        }
    }

    #[tokio::test]
    async fn concurrent_consumers_respect_quota_of_one() {
        let (svc, _dir) = service().await;
        let record = svc
            .create(b"contended", "c.bin", None, "1d", Some("1"), None)
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let svc = svc.clone();
            let id = record.id;
            tasks.push(tokio::spawn(async move { svc.consume(id, None).await }));
        }

        let mut delivered = 0;
        for outcome in futures::future::join_all(tasks).await {
            match outcome.unwrap() {
                Ok(delivery) => {
                    assert_eq!(delivery.bytes.as_ref(), b"contended");
                    delivered += 1;
                }
                Err(ShareError::QuotaExhausted | ShareError::NotFound) => {}
                Err(other) => panic!("unexpected outcome: {other}"),
            }
        }
        assert_eq!(delivered, 1, "exactly one request may win the last download");
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_shares() {
        let (svc, _dir) = service().await;
        let now = Utc::now();
        let expired =
            insert_with_expiry(&svc, b"old", Some(now - Duration::hours(1)), None, None).await;
        let live = svc
            .create(b"new", "new.txt", None, "1d", None, None)
            .await
            .unwrap();

        assert_eq!(svc.sweep_expired(now).await.unwrap(), 1);
        assert!(svc.meta.get(expired.id).await.unwrap().is_none());
        assert!(svc.blobs.get(expired.blob_ref).await.unwrap().is_none());
        assert!(svc.meta.get(live.id).await.unwrap().is_some());

        // Sweeping again finds nothing.
        assert_eq!(svc.sweep_expired(now).await.unwrap(), 0);
    }
}
