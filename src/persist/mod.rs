//! Storage adapters and the loader that turns stored state back into a desk.

/// Flat delimited-file adapter.
pub mod flatfile;
/// SQLite adapter with an audit journal.
pub mod sqlite;

use thiserror::Error;

use crate::{
    access::{desk::LibraryDesk, registry::{LibrarianRegistry, LibrarianRow}},
    engine::{
        lending::LendingEngine,
        snapshot::{BookRow, ImportReport, LibrarySnapshot, SkippedRow},
    },
    op::StoredOp,
    types::OpSeq,
};

/// Storage failure.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite driver error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Delimited-file read or write error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Journal payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything else, already formatted.
    #[error("{0}")]
    Message(String),
}

/// Result alias for storage operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Snapshot rows that decoded, plus rows the adapter could not decode.
#[derive(Debug, Clone, Default)]
pub struct LoadedSnapshot {
    /// Decoded book rows in stored order.
    pub snapshot: LibrarySnapshot,
    /// Source line of each decoded row, parallel to `snapshot.books`.
    pub lines: Vec<u64>,
    /// Rows the adapter could not decode.
    pub skipped: Vec<SkippedRow>,
}

impl LoadedSnapshot {
    pub(crate) fn push(&mut self, line: u64, row: BookRow) {
        self.snapshot.books.push(row);
        self.lines.push(line);
    }
}

/// Librarian rows that decoded, plus rows the adapter could not decode.
#[derive(Debug, Clone, Default)]
pub struct LoadedLibrarians {
    /// Decoded rows in stored order.
    pub rows: Vec<LibrarianRow>,
    /// Source line of each decoded row, parallel to `rows`.
    pub lines: Vec<u64>,
    /// Rows the adapter could not decode.
    pub skipped: Vec<SkippedRow>,
}

impl LoadedLibrarians {
    pub(crate) fn push(&mut self, line: u64, row: LibrarianRow) {
        self.rows.push(row);
        self.lines.push(line);
    }
}

/// Rewrites 1-based positions in `skipped` to the source lines in `lines`.
fn remap_lines(skipped: &mut [SkippedRow], lines: &[u64]) {
    for row in skipped {
        if let Some(line) = lines.get((row.line as usize).saturating_sub(1)) {
            row.line = *line;
        }
    }
}

/// Durable target for full-state snapshots and the audit journal.
pub trait SnapshotSink: Send {
    /// Overwrites the stored catalog and statistics.
    fn write_snapshot(&mut self, snapshot: &LibrarySnapshot) -> PersistResult<()>;
    /// Overwrites the stored librarian registry.
    fn write_librarians(&mut self, rows: &[LibrarianRow]) -> PersistResult<()>;
    /// Appends journal entries. Adapters without a journal ignore them.
    fn append_ops(&mut self, _ops: &[StoredOp]) -> PersistResult<()> {
        Ok(())
    }
    /// Makes earlier writes durable.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}

/// Read side of an adapter.
pub trait SnapshotSource {
    /// Reads the stored catalog and statistics.
    fn load_snapshot(&self) -> PersistResult<LoadedSnapshot>;
    /// Reads the stored librarian registry.
    fn load_librarians(&self) -> PersistResult<LoadedLibrarians>;
    /// Highest journaled sequence, for adapters that keep a journal.
    fn latest_op_seq(&self) -> PersistResult<OpSeq> {
        Ok(0)
    }
}

/// Builds a desk from whatever `source` holds. Bad rows are reported, not fatal.
pub fn open_desk(source: &dyn SnapshotSource) -> PersistResult<(LibraryDesk, ImportReport)> {
    let loaded = source.load_snapshot()?;
    let (engine, mut report) = LendingEngine::import_snapshot(loaded.snapshot);
    remap_lines(&mut report.skipped, &loaded.lines);
    report.skipped.extend(loaded.skipped);
    report.skipped.sort_by_key(|row| row.line);

    let librarians = source.load_librarians()?;
    let (registry, mut skipped_librarians) = LibrarianRegistry::from_rows(librarians.rows);
    remap_lines(&mut skipped_librarians, &librarians.lines);
    skipped_librarians.extend(librarians.skipped);
    skipped_librarians.sort_by_key(|row| row.line);
    report.skipped.extend(skipped_librarians);

    let desk = LibraryDesk::new(engine, registry).resume_after(source.latest_op_seq()?);
    tracing::info!(
        books = report.imported,
        librarians = desk.registry().len(),
        skipped = report.skipped_count(),
        "library state loaded"
    );
    Ok((desk, report))
}
