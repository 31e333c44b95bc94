//! On-disk blob storage for share payloads.
//!
//! Blobs live beneath `base_path/{shard}/{shard}/{blob_ref}` where the two
//! shard levels come from the MD5 of the blob ref, keeping directory fan-out
//! bounded. Paths are derived only from the random blob ref, never from the
//! user-supplied filename.
//!
//! When an encryption key is configured, payloads are sealed with
//! ChaCha20-Poly1305 before touching disk: a fresh random 12-byte nonce is
//! generated per blob and prepended to the ciphertext. The key is
//! process-wide configuration and is never persisted alongside the blobs.

use crate::errors::{ShareError, ShareResult};
use bytes::Bytes;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Stores raw share payloads on disk, optionally encrypted at rest.
#[derive(Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    key: Option<[u8; 32]>,
}

impl BlobStore {
    pub fn new(base_path: impl Into<PathBuf>, key: Option<[u8; 32]>) -> Self {
        Self {
            base_path: base_path.into(),
            key,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Two-level shard identifiers from the MD5 of the blob ref.
    fn shards(blob_ref: Uuid) -> (String, String) {
        let digest = md5::compute(blob_ref.as_bytes());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn blob_path(&self, blob_ref: Uuid) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(blob_ref);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(blob_ref.to_string());
        path
    }

    /// Persist a payload under a fresh random blob ref.
    ///
    /// Bytes are written to a temporary file, fsynced, and renamed into
    /// place, so a crash mid-write never leaves a partial blob at the final
    /// path.
    pub async fn put(&self, bytes: &[u8]) -> ShareResult<Uuid> {
        let blob_ref = Uuid::new_v4();
        let file_path = self.blob_path(blob_ref);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ShareError::Io(ErrorKind::Other.into()))?;
        fs::create_dir_all(&parent).await?;

        let payload = self.seal(bytes)?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = write_all_durable(&mut file, &payload).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ShareError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ShareError::Io(err));
        }

        Ok(blob_ref)
    }

    /// Fetch and (if configured) decrypt a payload. `None` when the blob is
    /// missing.
    pub async fn get(&self, blob_ref: Uuid) -> ShareResult<Option<Bytes>> {
        let file_path = self.blob_path(blob_ref);
        let raw = match fs::read(&file_path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(ShareError::Io(err)),
        };
        let plaintext = self.open(raw)?;
        Ok(Some(Bytes::from(plaintext)))
    }

    /// Remove a payload, pruning any shard directories left empty.
    /// Returns whether a blob was actually removed.
    pub async fn delete(&self, blob_ref: Uuid) -> ShareResult<bool> {
        let file_path = self.blob_path(blob_ref);
        let removed = match fs::remove_file(&file_path).await {
            Ok(_) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", file_path.display());
                false
            }
            Err(err) => return Err(ShareError::Io(err)),
        };

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(removed)
    }

    fn seal(&self, plaintext: &[u8]) -> ShareResult<Vec<u8>> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_vec());
        };

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = ChaCha20Poly1305::new(key.into());
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| ShareError::Crypto("blob encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, raw: Vec<u8>) -> ShareResult<Vec<u8>> {
        let Some(key) = &self.key else {
            return Ok(raw);
        };

        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(ShareError::Crypto("sealed blob too short".into()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);

        let cipher = ChaCha20Poly1305::new(key.into());
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                ShareError::Crypto("blob decryption failed (authentication error)".into())
            })
    }

    /// Recursively remove empty shard directories up to the base path.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

async fn write_all_durable(file: &mut File, payload: &[u8]) -> std::io::Result<()> {
    file.write_all(payload).await?;
    file.flush().await?;
    file.sync_all().await
}
