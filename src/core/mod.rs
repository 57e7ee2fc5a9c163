//! In-memory catalog and statistics stores.

use thiserror::Error;

use crate::types::BookKey;

/// Authoritative book catalog keyed by [`BookKey`].
pub mod catalog;
/// Per-book request counters and FIFO waitlists.
pub mod stats;

/// Domain errors raised by the catalog, statistics, and lending engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No book is stored under the key.
    #[error("book not found: {0}")]
    NotFound(BookKey),
    /// A book is already stored under the key.
    #[error("book already exists: {0}")]
    AlreadyExists(BookKey),
    /// The operation needs every copy back on the shelf.
    #[error("book {key} has {on_loan} copies on loan")]
    HasOutstandingLoans {
        /// Affected book.
        key: BookKey,
        /// Copies currently lent out.
        on_loan: u32,
    },
    /// A return was attempted while every copy is already on the shelf.
    #[error("all copies of {0} have already been returned")]
    AllCopiesReturned(BookKey),
    /// Nobody is waiting for the book.
    #[error("waitlist for {0} is empty")]
    EmptyWaitlist(BookKey),
    /// Input or persisted data failed validation.
    #[error("validation error: {0}")]
    Validation(String),
}
