//! Book records, drafts, patches, and waitlist entrants.

use serde::{Deserialize, Serialize};

use crate::{core::StoreError, types::BookKey};

/// Characters reserved by the flat-file waitlist encoding.
const RESERVED: [char; 4] = [';', ',', '\n', '\r'];

/// A borrower waiting for a copy of a specific book.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entrant {
    /// Requester name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Contact phone.
    pub phone: String,
}

impl Entrant {
    /// Validates and trims the requester's details.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        phone: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let entrant = Self {
            name: name.into().trim().to_string(),
            email: email.into().trim().to_string(),
            phone: phone.into().trim().to_string(),
        };
        entrant.validate()?;
        Ok(entrant)
    }

    /// Checks the invariants [`Entrant::new`] enforces; used on import.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.is_empty() {
            return Err(StoreError::Validation("entrant name is required".to_string()));
        }
        for (field, value) in [("name", &self.name), ("email", &self.email), ("phone", &self.phone)] {
            if value.contains(&RESERVED[..]) {
                return Err(StoreError::Validation(format!(
                    "entrant {field} must not contain ';', ',' or line breaks"
                )));
            }
        }
        Ok(())
    }
}

/// Lending state of a single title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    /// At least one copy is on the shelf.
    Available,
    /// No copy is on the shelf; borrow requests queue.
    FullyLoaned,
}

/// Authoritative catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    /// Display title.
    pub title: String,
    /// Display author.
    pub author: String,
    /// Free-form genre.
    pub genre: String,
    /// Publication year.
    pub year: i32,
    /// Total copies owned.
    pub copies: u32,
    /// Copies currently on the shelf.
    pub available: u32,
}

impl BookRecord {
    /// Identity key derived from title and author.
    pub fn key(&self) -> BookKey {
        BookKey::normalized(&self.title, &self.author)
    }

    /// Copies currently lent out.
    pub fn on_loan(&self) -> u32 {
        self.copies - self.available
    }

    /// True when every copy of a stocked title is lent out.
    pub fn is_loaned(&self) -> bool {
        self.available == 0 && self.copies > 0
    }

    /// Current lending state. Zero-copy titles are always fully loaned.
    pub fn availability(&self) -> Availability {
        if self.available > 0 {
            Availability::Available
        } else {
            Availability::FullyLoaned
        }
    }
}

/// Insert payload used to create a new [`BookRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDraft {
    /// Display title.
    pub title: String,
    /// Display author.
    pub author: String,
    /// Initial number of copies; all start on the shelf.
    pub copies: u32,
    /// Free-form genre.
    pub genre: String,
    /// Publication year, must not be negative.
    pub year: i32,
}

impl BookDraft {
    /// Convenience constructor mirroring the add-book form order.
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        copies: u32,
        genre: impl Into<String>,
        year: i32,
    ) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            copies,
            genre: genre.into(),
            year,
        }
    }

    /// Validates the draft and materializes a fully-available record.
    pub fn into_record(self) -> Result<BookRecord, StoreError> {
        let title = self.title.trim();
        let author = self.author.trim();
        if title.is_empty() || author.is_empty() {
            return Err(StoreError::Validation("title and author cannot be empty".to_string()));
        }
        if self.year < 0 {
            return Err(StoreError::Validation("year cannot be negative".to_string()));
        }
        Ok(BookRecord {
            title: title.to_string(),
            author: author.to_string(),
            genre: self.genre.trim().to_string(),
            year: self.year,
            copies: self.copies,
            available: self.copies,
        })
    }
}

/// Sparse patch of descriptive fields; identity fields are not patchable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookPatch {
    /// Optional replacement genre.
    pub genre: Option<String>,
    /// Optional replacement year.
    pub year: Option<i32>,
}

impl BookPatch {
    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut BookRecord) -> Result<(), StoreError> {
        if let Some(year) = self.year {
            if year < 0 {
                return Err(StoreError::Validation("year cannot be negative".to_string()));
            }
            rec.year = year;
        }
        if let Some(genre) = &self.genre {
            rec.genre = genre.trim().to_string();
        }
        Ok(())
    }
}
