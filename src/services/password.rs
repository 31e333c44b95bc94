//! Password hashing for password-gated shares.
//!
//! Uses Argon2id and stores PHC-formatted strings; the plaintext never
//! reaches the metadata store.

use crate::errors::{ShareError, ShareResult};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand_core::OsRng;

/// Hash a share password with a fresh random salt.
pub fn hash_password(password: &str) -> ShareResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ShareError::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify an attempt against a stored hash.
///
/// An unparsable stored hash counts as a failed verification rather than an
/// internal error; either way the caller must not serve content.
pub fn verify_password(attempt: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(attempt.as_bytes(), &parsed)
        .is_ok()
}
