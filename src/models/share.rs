//! The share record — the one persistent entity in the system.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for a single shared file.
///
/// A share is created once, mutated only by the atomic download-count
/// increment, and destroyed when it expires or exhausts its quota. The
/// payload bytes live in the blob store under `blob_ref`, never inline.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct ShareRecord {
    /// Public identifier handed out in share links. Random v4, unguessable.
    pub id: Uuid,

    /// Reference to the stored payload. Random, never derived from the
    /// user-supplied filename.
    pub blob_ref: Uuid,

    /// Original filename as uploaded. Untrusted; sanitized before any
    /// header use and never used to build filesystem paths.
    pub display_name: String,

    /// MIME type reported at upload time, if any.
    pub content_type: Option<String>,

    /// Payload size in bytes (plaintext size, before any encryption).
    pub size_bytes: i64,

    /// When the share was created.
    pub created_at: DateTime<Utc>,

    /// Time-based expiry. `None` means the share never expires by time.
    pub expires_at: Option<DateTime<Utc>>,

    /// Download quota. `None` means unlimited.
    pub max_downloads: Option<i64>,

    /// Successful deliveries so far. Never exceeds `max_downloads`.
    pub download_count: i64,

    /// Argon2id PHC hash of the access password, if one was set.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
}

impl ShareRecord {
    /// Remaining quota, or `None` when downloads are unlimited.
    pub fn remaining_downloads(&self) -> Option<i64> {
        self.max_downloads
            .map(|max| (max - self.download_count).max(0))
    }

    /// Whether the record's time-based expiry has passed as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}
