use hashbrown::HashMap;

use crate::{book::BookRecord, types::BookKey};

use super::StoreError;

/// Insertion-ordered map of book key to record.
#[derive(Debug, Default, Clone)]
pub struct CatalogStore {
    records: HashMap<BookKey, BookRecord>,
    order: Vec<BookKey>,
}

impl CatalogStore {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record` under `key`. The key must be the record's own key.
    pub fn add(&mut self, key: BookKey, record: BookRecord) -> Result<(), StoreError> {
        if self.records.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        if record.key() != key {
            return Err(StoreError::Validation(format!(
                "record '{}' by '{}' does not match key {key}",
                record.title, record.author
            )));
        }
        if record.available > record.copies {
            return Err(StoreError::Validation(format!(
                "available copies ({}) exceed total ({}) for {key}",
                record.available, record.copies
            )));
        }

        self.order.push(key.clone());
        self.records.insert(key, record);
        Ok(())
    }

    /// Removes a book whose copies are all on the shelf.
    pub fn remove(&mut self, key: &BookKey) -> Result<BookRecord, StoreError> {
        let rec = self
            .records
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if rec.available < rec.copies {
            return Err(StoreError::HasOutstandingLoans {
                key: key.clone(),
                on_loan: rec.on_loan(),
            });
        }

        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.records
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    /// Record stored under `key`.
    pub fn get(&self, key: &BookKey) -> Option<&BookRecord> {
        self.records.get(key)
    }

    /// True when `key` is cataloged.
    pub fn has(&self, key: &BookKey) -> bool {
        self.records.contains_key(key)
    }

    /// Records in insertion order.
    pub fn all(&self) -> Vec<&BookRecord> {
        self.order
            .iter()
            .filter_map(|key| self.records.get(key))
            .collect()
    }

    /// Owned copy of [`CatalogStore::all`].
    pub fn all_cloned(&self) -> Vec<BookRecord> {
        self.all().into_iter().cloned().collect()
    }

    /// Number of titles.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when no titles are stored.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn get_mut(&mut self, key: &BookKey) -> Result<&mut BookRecord, StoreError> {
        self.records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }
}
