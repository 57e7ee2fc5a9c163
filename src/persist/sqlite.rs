//! SQLite-backed snapshot store with an append-only audit journal.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    access::registry::LibrarianRow,
    book::Entrant,
    engine::snapshot::{BookRow, LibrarySnapshot, SkippedRow},
    op::{OP_FORMAT_VERSION, StoredOp, StoredOpEnvelope},
    types::OpSeq,
};

use super::{LoadedLibrarians, LoadedSnapshot, PersistError, PersistResult, SnapshotSink, SnapshotSource};

/// SQLite implementation of [`SnapshotSink`] and [`SnapshotSource`].
pub struct SqliteStore {
    conn: Connection,
}

type RawBook = (i64, String, String, String, i64, i64, i64, i64);

impl SqliteStore {
    /// Opens or creates a database at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory database.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Journaled operations strictly after `seq`.
    pub fn load_events_after(&self, seq: OpSeq) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM events WHERE seq > ?1 ORDER BY seq ASC")?;
        let payloads = stmt
            .query_map(params![seq as i64], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|payload| decode_stored_op_payload(payload))
            .collect()
    }

    fn load_waitlist(&self, position: i64) -> PersistResult<Vec<Entrant>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, email, phone FROM waitlist WHERE book_position = ?1 ORDER BY slot ASC",
        )?;
        let rows = stmt.query_map(params![position], |row| {
            Ok(Entrant {
                name: row.get(0)?,
                email: row.get(1)?,
                phone: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl SnapshotSink for SqliteStore {
    fn write_snapshot(&mut self, snapshot: &LibrarySnapshot) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM waitlist", [])?;
        tx.execute("DELETE FROM books", [])?;
        {
            let mut book_stmt = tx.prepare(
                "INSERT INTO books(position, title, author, genre, year, copies, available, request_counter)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            let mut wait_stmt = tx.prepare(
                "INSERT INTO waitlist(book_position, slot, name, email, phone) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, book) in snapshot.books.iter().enumerate() {
                let position = position as i64;
                book_stmt.execute(params![
                    position,
                    book.title,
                    book.author,
                    book.genre,
                    book.year,
                    book.copies,
                    book.available,
                    book.request_counter as i64,
                ])?;
                for (slot, e) in book.waitlist.iter().enumerate() {
                    wait_stmt.execute(params![position, slot as i64, e.name, e.email, e.phone])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn write_librarians(&mut self, rows: &[LibrarianRow]) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM librarians", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO librarians(position, username, id, password_hash) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, row) in rows.iter().enumerate() {
                stmt.execute(params![position as i64, row.username, row.id, row.password_hash])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events(seq, ts_ms, librarian_id, kind, book_key, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for stored in ops {
                let payload = serde_json::to_vec(&StoredOpEnvelope::new(stored.clone()))?;
                stmt.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    stored.librarian_id,
                    stored.op.kind(),
                    stored.op.book_key().to_string(),
                    payload,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

impl SnapshotSource for SqliteStore {
    fn load_snapshot(&self) -> PersistResult<LoadedSnapshot> {
        let mut stmt = self.conn.prepare(
            "SELECT position, title, author, genre, year, copies, available, request_counter
             FROM books ORDER BY position ASC",
        )?;
        let raw_rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .collect::<Result<Vec<RawBook>, _>>()?;

        let mut loaded = LoadedSnapshot::default();
        for (idx, raw) in raw_rows.into_iter().enumerate() {
            let line = idx as u64 + 1;
            let position = raw.0;
            match book_row_from_raw(raw) {
                Ok(mut row) => {
                    row.waitlist = self.load_waitlist(position)?;
                    loaded.push(line, row);
                }
                Err(reason) => {
                    tracing::warn!(line, %reason, "skipping out-of-range book row");
                    loaded.skipped.push(SkippedRow { line, reason });
                }
            }
        }
        Ok(loaded)
    }

    fn load_librarians(&self) -> PersistResult<LoadedLibrarians> {
        let mut stmt = self
            .conn
            .prepare("SELECT username, id, password_hash FROM librarians ORDER BY position ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LibrarianRow {
                    username: row.get(0)?,
                    id: row.get(1)?,
                    password_hash: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut loaded = LoadedLibrarians::default();
        for (idx, row) in rows.into_iter().enumerate() {
            loaded.push(idx as u64 + 1, row);
        }
        Ok(loaded)
    }

    fn latest_op_seq(&self) -> PersistResult<OpSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM events", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(seq.unwrap_or(0) as OpSeq)
    }
}

fn book_row_from_raw(raw: RawBook) -> Result<BookRow, String> {
    let (_, title, author, genre, year, copies, available, request_counter) = raw;
    let copies = u32::try_from(copies).map_err(|_| format!("copies out of range: {copies}"))?;
    let available =
        u32::try_from(available).map_err(|_| format!("available out of range: {available}"))?;
    Ok(BookRow {
        title,
        author,
        is_loaned: available == 0 && copies > 0,
        copies,
        genre,
        year: i32::try_from(year).map_err(|_| format!("year out of range: {year}"))?,
        available,
        request_counter: u64::try_from(request_counter)
            .map_err(|_| format!("request_counter out of range: {request_counter}"))?,
        waitlist: Vec::new(),
    })
}

fn decode_stored_op_payload(payload: &[u8]) -> PersistResult<StoredOp> {
    let envelope: StoredOpEnvelope = serde_json::from_slice(payload)?;
    if envelope.format_version != OP_FORMAT_VERSION {
        return Err(PersistError::Message(format!(
            "unsupported op format version: {}",
            envelope.format_version
        )));
    }
    Ok(envelope.stored)
}
