//! Flat delimited-file adapter.
//!
//! One directory holds `books.csv` and `librarians.csv`. Each write replaces
//! the whole file through a temporary sibling and a rename.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use csv::{ReaderBuilder, StringRecord, Writer};

use crate::{
    access::registry::LibrarianRow,
    book::Entrant,
    engine::snapshot::{BookRow, LibrarySnapshot, SkippedRow},
};

use super::{LoadedLibrarians, LoadedSnapshot, PersistResult, SnapshotSink, SnapshotSource};

/// Catalog file name inside the data directory.
pub const BOOKS_FILE: &str = "books.csv";
/// Librarian file name inside the data directory.
pub const LIBRARIANS_FILE: &str = "librarians.csv";

const BOOK_HEADER: [&str; 9] = [
    "title",
    "author",
    "is_loaned",
    "copies",
    "genre",
    "year",
    "available",
    "request_counter",
    "waitlist",
];
const LIBRARIAN_HEADER: [&str; 3] = ["username", "id", "password_hash"];

const ENTRY_SEP: &str = ";";
const FIELD_SEP: &str = ",";

/// CSV-backed [`SnapshotSink`] and [`SnapshotSource`].
#[derive(Debug, Clone)]
pub struct FlatFileStore {
    dir: PathBuf,
}

impl FlatFileStore {
    /// Uses `dir` for both files, creating it when missing.
    pub fn open(dir: impl AsRef<Path>) -> PersistResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Full path of [`BOOKS_FILE`].
    pub fn books_path(&self) -> PathBuf {
        self.dir.join(BOOKS_FILE)
    }

    /// Full path of [`LIBRARIANS_FILE`].
    pub fn librarians_path(&self) -> PathBuf {
        self.dir.join(LIBRARIANS_FILE)
    }
}

impl SnapshotSink for FlatFileStore {
    fn write_snapshot(&mut self, snapshot: &LibrarySnapshot) -> PersistResult<()> {
        let rows = snapshot.books.iter().map(|b| {
            vec![
                b.title.clone(),
                b.author.clone(),
                if b.is_loaned { "yes" } else { "no" }.to_string(),
                b.copies.to_string(),
                b.genre.clone(),
                b.year.to_string(),
                b.available.to_string(),
                b.request_counter.to_string(),
                encode_waitlist(&b.waitlist),
            ]
        });
        write_replacing(&self.books_path(), &BOOK_HEADER, rows)?;
        tracing::debug!(books = snapshot.books.len(), path = %self.books_path().display(), "books saved");
        Ok(())
    }

    fn write_librarians(&mut self, rows: &[LibrarianRow]) -> PersistResult<()> {
        let records = rows
            .iter()
            .map(|r| vec![r.username.clone(), r.id.clone(), r.password_hash.clone()]);
        write_replacing(&self.librarians_path(), &LIBRARIAN_HEADER, records)
    }
}

impl SnapshotSource for FlatFileStore {
    fn load_snapshot(&self) -> PersistResult<LoadedSnapshot> {
        let path = self.books_path();
        let mut loaded = LoadedSnapshot::default();
        let Some(records) = read_records(&path)? else {
            tracing::warn!(path = %path.display(), "books file not found, starting empty");
            return Ok(loaded);
        };

        for (line, record) in records {
            match record.and_then(|rec| parse_book_row(&rec)) {
                Ok(row) => loaded.push(line, row),
                Err(reason) => {
                    tracing::warn!(line, %reason, "skipping malformed book row");
                    loaded.skipped.push(SkippedRow { line, reason });
                }
            }
        }
        Ok(loaded)
    }

    fn load_librarians(&self) -> PersistResult<LoadedLibrarians> {
        let path = self.librarians_path();
        let mut loaded = LoadedLibrarians::default();
        let Some(records) = read_records(&path)? else {
            tracing::warn!(path = %path.display(), "librarians file not found, starting empty");
            return Ok(loaded);
        };

        for (line, record) in records {
            match record.and_then(|rec| parse_librarian_row(&rec)) {
                Ok(row) => loaded.push(line, row),
                Err(reason) => {
                    tracing::warn!(line, %reason, "skipping malformed librarian row");
                    loaded.skipped.push(SkippedRow { line, reason });
                }
            }
        }
        Ok(loaded)
    }
}

type NumberedRecord = (u64, Result<StringRecord, String>);

/// Data records with the file line each one starts on, or `None` if the file
/// is absent. Quoted fields may span lines.
fn read_records(path: &Path) -> PersistResult<Option<Vec<NumberedRecord>>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut records = Vec::new();
    let mut last_line = 1;
    for rec in rdr.records() {
        let line = match &rec {
            Ok(rec) => rec.position().map(|p| p.line()),
            Err(err) => err.position().map(|p| p.line()),
        }
        .unwrap_or(last_line + 1);
        last_line = line;
        records.push((line, rec.map_err(|e| e.to_string())));
    }
    Ok(Some(records))
}

fn write_replacing<I>(path: &Path, header: &[&str], rows: I) -> PersistResult<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let tmp = path.with_extension("csv.tmp");
    {
        let mut wtr = Writer::from_path(&tmp)?;
        wtr.write_record(header)?;
        for row in rows {
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Accepts the current nine-field layout and older files without a waitlist column.
fn parse_book_row(rec: &StringRecord) -> Result<BookRow, String> {
    if rec.len() != BOOK_HEADER.len() && rec.len() != BOOK_HEADER.len() - 1 {
        return Err(format!("expected {} fields, found {}", BOOK_HEADER.len(), rec.len()));
    }
    let field = |idx: usize| rec.get(idx).unwrap_or("").trim();

    let copies = parse_number::<u32>(field(3), "copies")?;
    let available = parse_number::<u32>(field(6), "available")?;
    Ok(BookRow {
        title: field(0).to_string(),
        author: field(1).to_string(),
        is_loaned: available == 0 && copies > 0,
        copies,
        genre: field(4).to_string(),
        year: parse_number(field(5), "year")?,
        available,
        request_counter: parse_number(field(7), "request_counter")?,
        waitlist: decode_waitlist(field(8))?,
    })
}

fn parse_librarian_row(rec: &StringRecord) -> Result<LibrarianRow, String> {
    if rec.len() != LIBRARIAN_HEADER.len() {
        return Err(format!("expected {} fields, found {}", LIBRARIAN_HEADER.len(), rec.len()));
    }
    Ok(LibrarianRow {
        username: rec[0].to_string(),
        id: rec[1].to_string(),
        password_hash: rec[2].to_string(),
    })
}

fn parse_number<T: FromStr>(raw: &str, name: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("{name} is not a valid number: '{raw}'"))
}

fn encode_waitlist(entrants: &[Entrant]) -> String {
    entrants
        .iter()
        .map(|e| format!("{}{FIELD_SEP}{}{FIELD_SEP}{}", e.name, e.email, e.phone))
        .collect::<Vec<_>>()
        .join(ENTRY_SEP)
}

fn decode_waitlist(raw: &str) -> Result<Vec<Entrant>, String> {
    raw.split(ENTRY_SEP)
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(FIELD_SEP).collect();
            let [name, email, phone] = parts.as_slice() else {
                return Err(format!("waitlist entry '{entry}' is not a name,email,phone triple"));
            };
            Entrant::new(*name, *email, *phone).map_err(|e| e.to_string())
        })
        .collect()
}
