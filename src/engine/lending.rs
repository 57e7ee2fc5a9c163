use serde::{Deserialize, Serialize};

use crate::{
    book::{Availability, BookDraft, BookPatch, BookRecord, Entrant},
    core::{StoreError, catalog::CatalogStore, stats::StatisticsTracker},
    types::BookKey,
};

/// Result of a borrow request. Queued requests are not loans.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BorrowOutcome {
    /// A copy was lent out.
    Lent {
        /// Copies left on the shelf.
        remaining: u32,
    },
    /// No copy was free; the requester is on the waitlist.
    Queued {
        /// 1-based waitlist position.
        position: usize,
    },
}

impl BorrowOutcome {
    /// True when a copy actually changed hands.
    pub fn is_lent(&self) -> bool {
        matches!(self, Self::Lent { .. })
    }
}

/// Emitted when a return frees a copy for the oldest waiting entrant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistNotification {
    /// Book that became available.
    pub key: BookKey,
    /// Display title of the book.
    pub title: String,
    /// Display author of the book.
    pub author: String,
    /// Entrant popped from the waitlist.
    pub entrant: Entrant,
}

/// Result of a successful return.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnReceipt {
    /// Copies on the shelf after the return.
    pub available: u32,
    /// Oldest waitlisted entrant to notify, if anyone was waiting.
    pub notification: Option<WaitlistNotification>,
}

/// Borrow/return state machine over the catalog and statistics stores.
///
/// Per book: `Available` while `available > 0`, `FullyLoaned` otherwise.
/// `0 <= available <= copies` holds after every operation.
#[derive(Debug, Default, Clone)]
pub struct LendingEngine {
    catalog: CatalogStore,
    stats: StatisticsTracker,
}

impl LendingEngine {
    /// Engine with an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the catalog.
    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    /// Read access to counters and waitlists.
    pub fn stats(&self) -> &StatisticsTracker {
        &self.stats
    }

    /// Adds a title with every copy on the shelf and a zero request count.
    pub fn add_book(&mut self, draft: BookDraft) -> Result<BookKey, StoreError> {
        let record = draft.into_record()?;
        let key = record.key();
        self.catalog.add(key.clone(), record)?;
        self.stats.set_request_count(&key, 0);
        Ok(key)
    }

    /// Removes a title with no outstanding loans, discarding its statistics.
    pub fn remove_book(&mut self, key: &BookKey) -> Result<BookRecord, StoreError> {
        let record = self.catalog.remove(key)?;
        let dropped = self.stats.forget(key);
        if !dropped.is_empty() {
            tracing::warn!(book = %key, waiting = dropped.len(), "removed book with a non-empty waitlist");
        }
        Ok(record)
    }

    /// Lends a copy, or queues `entrant` when none is on the shelf.
    ///
    /// Every call on an existing book counts as a request.
    pub fn borrow(&mut self, key: &BookKey, entrant: Entrant) -> Result<BorrowOutcome, StoreError> {
        let rec = self.catalog.get_mut(key)?;
        self.stats.increment_requests(key);

        match rec.availability() {
            Availability::Available => {
                rec.available -= 1;
                Ok(BorrowOutcome::Lent {
                    remaining: rec.available,
                })
            }
            Availability::FullyLoaned => {
                let position = self.stats.enqueue_waitlist(key, entrant);
                Ok(BorrowOutcome::Queued { position })
            }
        }
    }

    /// Puts a copy back on the shelf and pops the oldest waiting entrant.
    pub fn return_book(&mut self, key: &BookKey) -> Result<ReturnReceipt, StoreError> {
        let rec = self.catalog.get_mut(key)?;
        if rec.available >= rec.copies {
            return Err(StoreError::AllCopiesReturned(key.clone()));
        }
        rec.available += 1;
        let available = rec.available;
        let (title, author) = (rec.title.clone(), rec.author.clone());

        let notification = match self.stats.dequeue_waitlist(key) {
            Ok(entrant) => Some(WaitlistNotification {
                key: key.clone(),
                title,
                author,
                entrant,
            }),
            Err(StoreError::EmptyWaitlist(_)) => None,
            Err(other) => return Err(other),
        };

        Ok(ReturnReceipt {
            available,
            notification,
        })
    }

    /// Sets the total number of copies; the shelf count moves by the same delta.
    pub fn restock(&mut self, key: &BookKey, copies: u32) -> Result<BookRecord, StoreError> {
        let rec = self.catalog.get_mut(key)?;
        let on_loan = rec.on_loan();
        if copies < on_loan {
            return Err(StoreError::HasOutstandingLoans {
                key: key.clone(),
                on_loan,
            });
        }
        rec.copies = copies;
        rec.available = copies - on_loan;
        Ok(rec.clone())
    }

    /// Applies a patch to genre and year.
    pub fn update_details(&mut self, key: &BookKey, patch: &BookPatch) -> Result<BookRecord, StoreError> {
        let rec = self.catalog.get_mut(key)?;
        patch.apply_to(rec)?;
        Ok(rec.clone())
    }

    /// Enrolls `entrant` without a borrow attempt. Returns the 1-based position.
    pub fn join_waitlist(&mut self, key: &BookKey, entrant: Entrant) -> Result<usize, StoreError> {
        if !self.catalog.has(key) {
            return Err(StoreError::NotFound(key.clone()));
        }
        Ok(self.stats.enqueue_waitlist(key, entrant))
    }

    /// Current record for `key`.
    pub fn book(&self, key: &BookKey) -> Option<&BookRecord> {
        self.catalog.get(key)
    }

    /// Every record in catalog order.
    pub fn books(&self) -> Vec<&BookRecord> {
        self.catalog.all()
    }

    /// Borrow attempts recorded for `key`.
    pub fn request_count(&self, key: &BookKey) -> u64 {
        self.stats.get_request_count(key)
    }

    /// Waiting entrants, oldest first.
    pub fn waitlist(&self, key: &BookKey) -> Vec<Entrant> {
        self.stats.waitlist(key)
    }

    pub(crate) fn restore_statistics(&mut self, key: &BookKey, request_count: u64, waitlist: Vec<Entrant>) {
        self.stats.set_request_count(key, request_count);
        self.stats.restore_waitlist(key, waitlist);
    }

    pub(crate) fn insert_record(&mut self, record: BookRecord) -> Result<BookKey, StoreError> {
        let key = record.key();
        self.catalog.add(key.clone(), record)?;
        Ok(key)
    }
}
