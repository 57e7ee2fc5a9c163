use crate::{book::BookRecord, core::StoreError};

use super::lending::LendingEngine;

/// Catalog query. Text needles match case-insensitive substrings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookQuery {
    /// Every book.
    All,
    /// Title contains the needle.
    Title(String),
    /// Author contains the needle.
    Author(String),
    /// Genre contains the needle.
    Genre(String),
    /// At least one copy on the shelf.
    Available,
    /// Every copy of a stocked title is lent out.
    Loaned,
}

impl BookQuery {
    fn needle(&self) -> Option<&str> {
        match self {
            Self::Title(n) | Self::Author(n) | Self::Genre(n) => Some(n.as_str()),
            Self::All | Self::Available | Self::Loaned => None,
        }
    }

    fn matches(&self, rec: &BookRecord, needle: &str) -> bool {
        let contains = |haystack: &str| haystack.to_lowercase().contains(needle);
        match self {
            Self::All => true,
            Self::Title(_) => contains(&rec.title),
            Self::Author(_) => contains(&rec.author),
            Self::Genre(_) => contains(&rec.genre),
            Self::Available => rec.available > 0,
            Self::Loaned => rec.is_loaned(),
        }
    }
}

impl LendingEngine {
    /// Books matching `query`, in catalog order. Blank text needles are rejected.
    pub fn search(&self, query: &BookQuery) -> Result<Vec<&BookRecord>, StoreError> {
        let needle = match query.needle() {
            Some(n) if n.trim().is_empty() => {
                return Err(StoreError::Validation("search term required".to_string()));
            }
            Some(n) => n.trim().to_lowercase(),
            None => String::new(),
        };

        Ok(self
            .books()
            .into_iter()
            .filter(|rec| query.matches(rec, &needle))
            .collect())
    }

    /// Up to `n` most requested books, highest count first; ties keep catalog order.
    pub fn popular(&self, n: usize) -> Vec<(&BookRecord, u64)> {
        let mut ranked: Vec<_> = self
            .books()
            .into_iter()
            .map(|rec| (rec, self.request_count(&rec.key())))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(n);
        ranked
    }
}
