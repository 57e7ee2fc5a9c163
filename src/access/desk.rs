use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::{
    book::{BookDraft, BookPatch, BookRecord, Entrant},
    core::StoreError,
    engine::{
        lending::{BorrowOutcome, LendingEngine, ReturnReceipt},
        snapshot::LibrarySnapshot,
    },
    op::{Op, StoredOp},
    types::{BookKey, OpSeq},
};

use super::{
    AccessError,
    registry::{LibrarianRegistry, LibrarianRow, Session},
};

/// Failure of a desk operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeskError {
    /// Catalog or lending rule violation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Missing session or bad credentials.
    #[error(transparent)]
    Access(#[from] AccessError),
}

/// Session-gated front over the lending engine and librarian registry.
///
/// Mutations require a logged-in librarian, are logged with that librarian's
/// name, and are journaled as [`StoredOp`]s until drained. Queries are open.
#[derive(Debug)]
pub struct LibraryDesk {
    engine: LendingEngine,
    registry: LibrarianRegistry,
    session: Option<Session>,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
}

impl Default for LibraryDesk {
    fn default() -> Self {
        Self::new(LendingEngine::new(), LibrarianRegistry::new())
    }
}

impl LibraryDesk {
    /// Desk with no session and an empty journal buffer.
    pub fn new(engine: LendingEngine, registry: LibrarianRegistry) -> Self {
        Self {
            engine,
            registry,
            session: None,
            pending_ops: Vec::new(),
            next_op_seq: 1,
        }
    }

    /// Continues journal numbering after `last_seq`.
    pub fn resume_after(mut self, last_seq: OpSeq) -> Self {
        self.next_op_seq = self.next_op_seq.max(last_seq.saturating_add(1));
        self
    }

    /// Lending engine for queries.
    pub fn engine(&self) -> &LendingEngine {
        &self.engine
    }

    /// Librarian registry.
    pub fn registry(&self) -> &LibrarianRegistry {
        &self.registry
    }

    /// Active session, if any.
    pub fn current(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Registers a librarian. Open to everyone so the first account can be created.
    pub fn register(&mut self, username: &str, id: &str, password: &str) -> Result<(), DeskError> {
        self.registry.register(username, id, password)?;
        Ok(())
    }

    /// Replaces the current session on success; a failed login keeps the old one.
    pub fn login(&mut self, username: &str, id: &str, password: &str) -> Result<Session, DeskError> {
        let session = self.registry.authenticate(username, id, password)?;
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Ends the session and returns it.
    pub fn logout(&mut self) -> Option<Session> {
        let session = self.session.take();
        if let Some(s) = &session {
            tracing::info!(librarian = %s.username, "librarian logged out");
        }
        session
    }

    /// Adds a title.
    pub fn add_book(&mut self, draft: BookDraft) -> Result<BookKey, DeskError> {
        let actor = self.require_session()?;
        let key = self.engine.add_book(draft)?;
        let book = self
            .engine
            .book(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        self.record(&actor, Op::AddBook { book });
        Ok(key)
    }

    /// Removes a title with every copy on the shelf.
    pub fn remove_book(&mut self, key: &BookKey) -> Result<BookRecord, DeskError> {
        let actor = self.require_session()?;
        let record = self.engine.remove_book(key)?;
        self.record(&actor, Op::RemoveBook { key: key.clone() });
        Ok(record)
    }

    /// Lends a copy or queues the entrant.
    pub fn borrow(&mut self, key: &BookKey, entrant: Entrant) -> Result<BorrowOutcome, DeskError> {
        let actor = self.require_session()?;
        let outcome = self.engine.borrow(key, entrant.clone())?;
        self.record(
            &actor,
            Op::Borrow {
                key: key.clone(),
                entrant,
                queued: !outcome.is_lent(),
            },
        );
        Ok(outcome)
    }

    /// Returns a copy and pops the oldest waiting entrant.
    pub fn return_book(&mut self, key: &BookKey) -> Result<ReturnReceipt, DeskError> {
        let actor = self.require_session()?;
        let receipt = self.engine.return_book(key)?;
        self.record(
            &actor,
            Op::Return {
                key: key.clone(),
                notified: receipt.notification.as_ref().map(|n| n.entrant.clone()),
            },
        );
        Ok(receipt)
    }

    /// Sets the total number of copies.
    pub fn restock(&mut self, key: &BookKey, copies: u32) -> Result<BookRecord, DeskError> {
        let actor = self.require_session()?;
        let prev_copies = self
            .engine
            .book(key)
            .map(|rec| rec.copies)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let record = self.engine.restock(key, copies)?;
        self.record(
            &actor,
            Op::Restock {
                key: key.clone(),
                prev_copies,
                copies,
            },
        );
        Ok(record)
    }

    /// Patches genre and year.
    pub fn update_details(&mut self, key: &BookKey, patch: BookPatch) -> Result<BookRecord, DeskError> {
        let actor = self.require_session()?;
        let record = self.engine.update_details(key, &patch)?;
        self.record(&actor, Op::UpdateDetails { key: key.clone(), patch });
        Ok(record)
    }

    /// Waitlists an entrant without a borrow attempt.
    pub fn join_waitlist(&mut self, key: &BookKey, entrant: Entrant) -> Result<usize, DeskError> {
        let actor = self.require_session()?;
        let position = self.engine.join_waitlist(key, entrant.clone())?;
        self.record(&actor, Op::JoinWaitlist { key: key.clone(), entrant });
        Ok(position)
    }

    /// Snapshot of the catalog and statistics.
    pub fn export_snapshot(&self) -> LibrarySnapshot {
        self.engine.export_snapshot()
    }

    /// Librarian rows for persistence.
    pub fn librarian_rows(&self) -> Vec<LibrarianRow> {
        self.registry.export_rows()
    }

    /// Takes journal entries not yet handed to storage.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    /// Puts undelivered journal entries back ahead of newer ones.
    pub(crate) fn requeue_ops(&mut self, mut ops: Vec<StoredOp>) {
        ops.append(&mut self.pending_ops);
        self.pending_ops = ops;
    }

    /// Sequence of the newest journal entry; zero before any.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn require_session(&self) -> Result<Session, AccessError> {
        self.session.clone().ok_or(AccessError::NotAuthenticated)
    }

    fn record(&mut self, actor: &Session, op: Op) {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        tracing::info!(
            librarian = %actor.username,
            action = op.kind(),
            book = %op.book_key(),
            seq,
            "librarian action"
        );
        self.pending_ops.push(StoredOp {
            seq,
            ts_ms: now_ms(),
            librarian_id: actor.librarian_id.clone(),
            op,
        });
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
