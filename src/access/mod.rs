//! Librarian registry, credential checks, and the authorizing desk.

use thiserror::Error;

/// Session-gated facade over the lending engine.
pub mod desk;
/// Argon2 password hashing with a legacy SHA-256 fallback.
pub mod password;
/// Librarian registration and authentication.
pub mod registry;

/// Access-control failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// Unknown id, username mismatch, or wrong password; deliberately indistinguishable.
    #[error("invalid username, id or password")]
    InvalidCredentials,
    /// A librarian with this id is already registered.
    #[error("librarian with id '{0}' already exists")]
    DuplicateId(String),
    /// A mutating operation was attempted without a logged-in librarian.
    #[error("you must be logged in as a librarian to perform this action")]
    NotAuthenticated,
    /// Registration input failed validation.
    #[error("validation error: {0}")]
    Validation(String),
    /// The password hasher rejected its input.
    #[error("password hashing failed: {0}")]
    Hashing(String),
}
