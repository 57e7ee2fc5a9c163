use serde::{Deserialize, Serialize};

use crate::{
    book::{BookRecord, Entrant},
    core::StoreError,
};

use super::lending::LendingEngine;

/// One persisted book with its statistics, in stable field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRow {
    /// Display title.
    pub title: String,
    /// Display author.
    pub author: String,
    /// Derived on export; ignored on import.
    pub is_loaned: bool,
    /// Total copies owned.
    pub copies: u32,
    /// Free-form genre.
    pub genre: String,
    /// Publication year.
    pub year: i32,
    /// Copies on the shelf.
    pub available: u32,
    /// Borrow attempts so far.
    pub request_counter: u64,
    /// Oldest first.
    pub waitlist: Vec<Entrant>,
}

/// Full catalog plus statistics, ordered by catalog insertion.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    /// One row per cataloged title.
    pub books: Vec<BookRow>,
}

/// A persisted row that was not loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based row or line number in the source.
    pub line: u64,
    /// Why the row was rejected.
    pub reason: String,
}

/// Outcome of [`LendingEngine::import_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportReport {
    /// Rows loaded into the engine.
    pub imported: usize,
    /// Rows left out, sorted by line.
    pub skipped: Vec<SkippedRow>,
}

impl ImportReport {
    /// Number of rows left out.
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

impl LendingEngine {
    /// Every book with its counter and waitlist, in catalog order.
    pub fn export_snapshot(&self) -> LibrarySnapshot {
        let books = self
            .catalog()
            .all()
            .into_iter()
            .map(|rec| {
                let key = rec.key();
                BookRow {
                    title: rec.title.clone(),
                    author: rec.author.clone(),
                    is_loaned: rec.is_loaned(),
                    copies: rec.copies,
                    genre: rec.genre.clone(),
                    year: rec.year,
                    available: rec.available,
                    request_counter: self.request_count(&key),
                    waitlist: self.waitlist(&key),
                }
            })
            .collect();

        LibrarySnapshot { books }
    }

    /// Rebuilds an engine from persisted rows. Invalid rows are logged and skipped.
    pub fn import_snapshot(snapshot: LibrarySnapshot) -> (Self, ImportReport) {
        let mut engine = Self::new();
        let mut report = ImportReport::default();

        for (idx, row) in snapshot.books.into_iter().enumerate() {
            let line = idx as u64 + 1;
            match engine.import_row(row) {
                Ok(()) => report.imported += 1,
                Err(err) => {
                    tracing::warn!(line, error = %err, "skipping invalid book row");
                    report.skipped.push(SkippedRow {
                        line,
                        reason: err.to_string(),
                    });
                }
            }
        }

        (engine, report)
    }

    fn import_row(&mut self, row: BookRow) -> Result<(), StoreError> {
        if row.title.trim().is_empty() || row.author.trim().is_empty() {
            return Err(StoreError::Validation("title and author are required".to_string()));
        }
        if row.year < 0 {
            return Err(StoreError::Validation("year cannot be negative".to_string()));
        }
        for entrant in &row.waitlist {
            entrant.validate()?;
        }

        let key = self.insert_record(BookRecord {
            title: row.title.trim().to_string(),
            author: row.author.trim().to_string(),
            genre: row.genre.trim().to_string(),
            year: row.year,
            copies: row.copies,
            available: row.available,
        })?;
        self.restore_statistics(&key, row.request_counter, row.waitlist);
        Ok(())
    }
}
