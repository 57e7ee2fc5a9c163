//! Runtime event stream payloads.

use crate::{
    book::Entrant,
    engine::lending::WaitlistNotification,
    types::{BookKey, LibrarianId, OpSeq},
};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEvent {
    /// A librarian account was created.
    LibrarianRegistered {
        /// New librarian id.
        id: LibrarianId,
    },
    /// A librarian session started.
    LoggedIn {
        /// Logged-in librarian id.
        id: LibrarianId,
    },
    /// The current session ended.
    LoggedOut,
    /// A title was added.
    BookAdded {
        /// New book.
        key: BookKey,
    },
    /// A title was removed.
    BookRemoved {
        /// Removed book.
        key: BookKey,
    },
    /// A copy was lent out.
    Lent {
        /// Borrowed book.
        key: BookKey,
        /// Copies left on the shelf.
        remaining: u32,
    },
    /// A borrow request joined the waitlist.
    Queued {
        /// Requested book.
        key: BookKey,
        /// Waitlisted requester.
        entrant: Entrant,
        /// 1-based waitlist position.
        position: usize,
    },
    /// A copy came back.
    Returned {
        /// Returned book.
        key: BookKey,
        /// Copies on the shelf after the return.
        available: u32,
    },
    /// The oldest waiting entrant should be told a copy is free.
    WaitlistNotified(WaitlistNotification),
    /// Total copies or descriptive fields changed.
    Updated {
        /// Changed book.
        key: BookKey,
    },
    /// Persistence has reached at least this journal sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
    /// A background write failed; in-memory state is ahead of storage.
    PersistFailed {
        /// Rendered persistence error.
        message: String,
    },
}
