use std::sync::LazyLock;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{engine::snapshot::SkippedRow, types::LibrarianId};

use super::{
    AccessError,
    password::{hash_password, is_well_formed, verify_password},
};

/// Hash checked when the id is unknown, so both failure paths do the same work.
static DECOY_HASH: LazyLock<Option<String>> = LazyLock::new(|| hash_password("decoy").ok());

/// Persisted librarian row: `username, id, password_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarianRow {
    /// Display name checked at login.
    pub username: String,
    /// Unique librarian id.
    pub id: LibrarianId,
    /// Argon2 PHC string or legacy hex digest.
    pub password_hash: String,
}

/// Registered librarian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Librarian {
    username: String,
    id: LibrarianId,
    password_hash: String,
}

impl Librarian {
    /// Name given at registration.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Unique id.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Proof of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Logged-in librarian.
    pub librarian_id: LibrarianId,
    /// Name used at login.
    pub username: String,
}

/// Librarian registry keyed by id, in registration order.
#[derive(Debug, Default, Clone)]
pub struct LibrarianRegistry {
    by_id: HashMap<LibrarianId, Librarian>,
    order: Vec<LibrarianId>,
}

impl LibrarianRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a librarian with a freshly hashed password.
    pub fn register(&mut self, username: &str, id: &str, password: &str) -> Result<&Librarian, AccessError> {
        let (username, id) = (username.trim(), id.trim());
        if username.is_empty() || id.is_empty() {
            return Err(AccessError::Validation("username and id are required".to_string()));
        }
        if password.is_empty() {
            return Err(AccessError::Validation("password is required".to_string()));
        }
        if self.by_id.contains_key(id) {
            tracing::error!(id, "registration failed: id already exists");
            return Err(AccessError::DuplicateId(id.to_string()));
        }

        tracing::info!(username, id, "librarian registered");
        Ok(self.insert(Librarian {
            username: username.to_string(),
            id: id.to_string(),
            password_hash: hash_password(password)?,
        }))
    }

    /// Verifies all three credentials. Every failure is the same error.
    pub fn authenticate(&self, username: &str, id: &str, password: &str) -> Result<Session, AccessError> {
        let (username, id) = (username.trim(), id.trim());
        let verified = match self.by_id.get(id) {
            Some(lib) => {
                let password_ok = verify_password(password, &lib.password_hash);
                password_ok && lib.username == username
            }
            None => {
                if let Some(decoy) = DECOY_HASH.as_deref() {
                    let _ = verify_password(password, decoy);
                }
                false
            }
        };

        if !verified {
            tracing::warn!(username, id, "authentication failed");
            return Err(AccessError::InvalidCredentials);
        }
        tracing::info!(username, id, "librarian logged in");
        Ok(Session {
            librarian_id: id.to_string(),
            username: username.to_string(),
        })
    }

    /// True when `id` is taken.
    pub fn is_registered(&self, id: &str) -> bool {
        self.by_id.contains_key(id.trim())
    }

    /// Librarian registered under `id`.
    pub fn get(&self, id: &str) -> Option<&Librarian> {
        self.by_id.get(id)
    }

    /// Number of librarians.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Rows for persistence, in registration order.
    pub fn export_rows(&self) -> Vec<LibrarianRow> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .map(|lib| LibrarianRow {
                username: lib.username.clone(),
                id: lib.id.clone(),
                password_hash: lib.password_hash.clone(),
            })
            .collect()
    }

    /// Rebuilds a registry from persisted rows, skipping blank, duplicate, or
    /// unverifiable entries.
    pub fn from_rows(rows: Vec<LibrarianRow>) -> (Self, Vec<SkippedRow>) {
        let mut registry = Self::new();
        let mut skipped = Vec::new();

        for (idx, row) in rows.into_iter().enumerate() {
            let line = idx as u64 + 1;
            let reason = if row.username.trim().is_empty() || row.id.trim().is_empty() {
                Some("username and id are required".to_string())
            } else if registry.by_id.contains_key(row.id.trim()) {
                Some(format!("duplicate librarian id {}", row.id.trim()))
            } else if !is_well_formed(&row.password_hash) {
                Some("malformed password hash".to_string())
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    tracing::warn!(line, %reason, "skipping invalid librarian row");
                    skipped.push(SkippedRow { line, reason });
                }
                None => {
                    registry.insert(Librarian {
                        username: row.username.trim().to_string(),
                        id: row.id.trim().to_string(),
                        password_hash: row.password_hash,
                    });
                }
            }
        }

        (registry, skipped)
    }

    fn insert(&mut self, librarian: Librarian) -> &Librarian {
        self.order.push(librarian.id.clone());
        self.by_id
            .entry(librarian.id.clone())
            .insert(librarian)
            .into_mut()
    }
}
