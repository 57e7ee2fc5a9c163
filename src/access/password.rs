//! Argon2 password hashing.
//!
//! New hashes are PHC strings (`$argon2id$v=19$...`). A bare 64-digit hex
//! SHA-256 digest is accepted as an unsalted legacy hash and still verifies.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand_core::OsRng;
use sha2::{Digest, Sha256};

use super::AccessError;

const LEGACY_HEX_LEN: usize = 64;

/// Hashes `password` with a fresh random salt into a PHC string.
pub fn hash_password(password: &str) -> Result<String, AccessError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AccessError::Hashing(e.to_string()))?;
    Ok(hash.to_string())
}

/// Checks `password` against a stored hash. Malformed hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    if let Some(expected) = legacy_digest(stored) {
        return Sha256::digest(password.as_bytes()).as_slice() == expected.as_slice();
    }
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// True for strings [`verify_password`] can check: a parsable PHC string or a
/// legacy hex digest.
pub fn is_well_formed(stored: &str) -> bool {
    legacy_digest(stored).is_some() || PasswordHash::new(stored).is_ok()
}

fn legacy_digest(stored: &str) -> Option<Vec<u8>> {
    if stored.len() != LEGACY_HEX_LEN {
        return None;
    }
    hex::decode(stored).ok()
}
