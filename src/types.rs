//! Shared identifiers and the normalized book key.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::StoreError;

/// Monotonic audit-journal sequence number.
pub type OpSeq = u64;
/// Librarian identifier as entered at registration.
pub type LibrarianId = String;

/// Normalized `(title, author)` identity shared by catalog and statistics.
///
/// Both parts are trimmed and lowercased. They are kept apart so that a colon
/// inside a title can never make two different books collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookKey {
    title: String,
    author: String,
}

impl BookKey {
    /// Builds a key, rejecting blank titles or authors.
    pub fn new(title: &str, author: &str) -> Result<Self, StoreError> {
        if title.trim().is_empty() || author.trim().is_empty() {
            return Err(StoreError::Validation(
                "both title and author are required to build a book key".to_string(),
            ));
        }
        Ok(Self::normalized(title, author))
    }

    pub(crate) fn normalized(title: &str, author: &str) -> Self {
        Self {
            title: title.trim().to_lowercase(),
            author: author.trim().to_lowercase(),
        }
    }

    /// Normalized title component.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Normalized author component.
    pub fn author(&self) -> &str {
        &self.author
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.title, self.author)
    }
}
