//! Audit journal operations and persistence wrappers.

use serde::{Deserialize, Serialize};

use crate::{
    book::{BookPatch, BookRecord, Entrant},
    types::{BookKey, LibrarianId, OpSeq},
};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// A successful catalog mutation, as performed by a librarian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// A title was added.
    AddBook {
        /// Record as created.
        book: BookRecord,
    },
    /// A title was removed.
    RemoveBook {
        /// Removed book.
        key: BookKey,
    },
    /// A borrow request was served or queued.
    Borrow {
        /// Requested book.
        key: BookKey,
        /// Requester.
        entrant: Entrant,
        /// True when the requester was waitlisted instead of lent a copy.
        queued: bool,
    },
    /// A copy came back.
    Return {
        /// Returned book.
        key: BookKey,
        /// Entrant popped from the waitlist, if any.
        notified: Option<Entrant>,
    },
    /// Total copies changed.
    Restock {
        /// Restocked book.
        key: BookKey,
        /// Previous total.
        prev_copies: u32,
        /// New total.
        copies: u32,
    },
    /// Descriptive fields changed.
    UpdateDetails {
        /// Patched book.
        key: BookKey,
        /// Applied patch.
        patch: BookPatch,
    },
    /// An entrant was waitlisted without a borrow attempt.
    JoinWaitlist {
        /// Book waited for.
        key: BookKey,
        /// Enrolled entrant.
        entrant: Entrant,
    },
}

impl Op {
    /// Short action label used in logs and journal rows.
    pub fn kind(&self) -> &'static str {
        match self {
            Op::AddBook { .. } => "add_book",
            Op::RemoveBook { .. } => "remove_book",
            Op::Borrow { .. } => "borrow_book",
            Op::Return { .. } => "return_book",
            Op::Restock { .. } => "restock",
            Op::UpdateDetails { .. } => "update_details",
            Op::JoinWaitlist { .. } => "added_to_waitlist",
        }
    }

    /// Book the operation touched.
    pub fn book_key(&self) -> BookKey {
        match self {
            Op::AddBook { book } => book.key(),
            Op::RemoveBook { key }
            | Op::Borrow { key, .. }
            | Op::Return { key, .. }
            | Op::Restock { key, .. }
            | Op::UpdateDetails { key, .. }
            | Op::JoinWaitlist { key, .. } => key.clone(),
        }
    }
}

/// Journal row metadata plus operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation timestamp in milliseconds.
    pub ts_ms: u64,
    /// Librarian who performed the operation.
    pub librarian_id: LibrarianId,
    /// Operation body.
    pub op: Op,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub stored: StoredOp,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(stored: StoredOp) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            stored,
        }
    }
}
