use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};

use crate::{
    access::{
        desk::{DeskError, LibraryDesk},
        registry::{LibrarianRow, Session},
    },
    book::{BookDraft, BookPatch, BookRecord, Entrant},
    engine::{
        lending::{BorrowOutcome, ReturnReceipt},
        search::BookQuery,
        snapshot::LibrarySnapshot,
    },
    op::StoredOp,
    persist::{PersistError, SnapshotSink},
    types::{BookKey, OpSeq},
};

use super::events::LibraryEvent;

/// Failure of a runtime call.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The desk rejected the command.
    #[error(transparent)]
    Desk(#[from] DeskError),
    /// A flush could not make state durable. In-memory state is unaffected.
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
    /// The runtime task has stopped.
    #[error("library runtime is not running")]
    ChannelClosed,
}

/// Persistence behavior of the runtime; the `[runtime]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Queue a full snapshot after every successful mutation.
    pub persist_on_mutation: bool,
    /// Capacity of the queue feeding the persistence worker.
    pub persist_queue_bound: usize,
    /// Longest a queued batch waits before it is written.
    pub batch_max_latency_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            persist_on_mutation: true,
            persist_queue_bound: 64,
            batch_max_latency_ms: 75,
        }
    }
}

/// Cloneable front to the single-writer library task.
#[derive(Clone)]
pub struct LibraryHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<LibraryEvent>,
}

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;
type ReadFn = Box<dyn FnOnce(&LibraryDesk) + Send>;

enum Command {
    Register {
        username: String,
        id: String,
        password: String,
        resp: Reply<()>,
    },
    Login {
        username: String,
        id: String,
        password: String,
        resp: Reply<Session>,
    },
    Logout {
        resp: oneshot::Sender<Option<Session>>,
    },
    AddBook {
        draft: BookDraft,
        resp: Reply<BookKey>,
    },
    RemoveBook {
        key: BookKey,
        resp: Reply<BookRecord>,
    },
    Borrow {
        key: BookKey,
        entrant: Entrant,
        resp: Reply<BorrowOutcome>,
    },
    Return {
        key: BookKey,
        resp: Reply<ReturnReceipt>,
    },
    Restock {
        key: BookKey,
        copies: u32,
        resp: Reply<BookRecord>,
    },
    UpdateDetails {
        key: BookKey,
        patch: BookPatch,
        resp: Reply<BookRecord>,
    },
    JoinWaitlist {
        key: BookKey,
        entrant: Entrant,
        resp: Reply<usize>,
    },
    Read(ReadFn),
    Flush {
        resp: Reply<OpSeq>,
    },
    Shutdown {
        resp: Reply<()>,
    },
}

enum PersistMsg {
    State {
        snapshot: Option<LibrarySnapshot>,
        ops: Vec<StoredOp>,
        last_seq: OpSeq,
    },
    Librarians {
        rows: Vec<LibrarianRow>,
    },
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Starts the library task. Without a sink, state lives only in memory.
pub fn spawn_library(
    desk: LibraryDesk,
    sink: Option<Box<dyn SnapshotSink>>,
    config: RuntimeConfig,
) -> LibraryHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<LibraryEvent>(1024);

    let (persist_tx_opt, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<OpSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let events_tx_loop = events_tx.clone();

    tokio::spawn(async move {
        let mut desk = desk;

        loop {
            if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        let done = handle_command(
                            cmd,
                            &mut desk,
                            &events_tx_loop,
                            persist_tx_opt.as_ref(),
                            &config,
                        ).await;
                        if done {
                            break;
                        }
                    }
                    durable = rx.recv() => {
                        match durable {
                            Some(Ok(op_seq)) => {
                                let _ = events_tx_loop.send(LibraryEvent::DurableUpTo { op_seq });
                            }
                            Some(Err(err)) => {
                                let _ = events_tx_loop.send(LibraryEvent::PersistFailed { message: err.to_string() });
                            }
                            None => {}
                        }
                    }
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                let done = handle_command(
                    cmd,
                    &mut desk,
                    &events_tx_loop,
                    persist_tx_opt.as_ref(),
                    &config,
                )
                .await;
                if done {
                    break;
                }
            }
        }
        tracing::debug!("library runtime stopped");
    });

    LibraryHandle { cmd_tx, events_tx }
}

impl LibraryHandle {
    /// Receiver for every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.events_tx.subscribe()
    }

    /// Registers a librarian. No session needed.
    pub async fn register(
        &self,
        username: impl Into<String>,
        id: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<(), RuntimeError> {
        let (username, id, password) = (username.into(), id.into(), password.into());
        self.call(|resp| Command::Register {
            username,
            id,
            password,
            resp,
        })
        .await?
    }

    /// Starts a session.
    pub async fn login(
        &self,
        username: impl Into<String>,
        id: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Session, RuntimeError> {
        let (username, id, password) = (username.into(), id.into(), password.into());
        self.call(|resp| Command::Login {
            username,
            id,
            password,
            resp,
        })
        .await?
    }

    /// Ends the session, returning it if there was one.
    pub async fn logout(&self) -> Result<Option<Session>, RuntimeError> {
        self.call(|resp| Command::Logout { resp }).await
    }

    /// Adds a title.
    pub async fn add_book(&self, draft: BookDraft) -> Result<BookKey, RuntimeError> {
        self.call(|resp| Command::AddBook { draft, resp }).await?
    }

    /// Removes a title with every copy on the shelf.
    pub async fn remove_book(&self, key: BookKey) -> Result<BookRecord, RuntimeError> {
        self.call(|resp| Command::RemoveBook { key, resp }).await?
    }

    /// Lends a copy or queues the entrant.
    pub async fn borrow(&self, key: BookKey, entrant: Entrant) -> Result<BorrowOutcome, RuntimeError> {
        self.call(|resp| Command::Borrow { key, entrant, resp }).await?
    }

    /// Returns a copy; the receipt names the entrant to notify.
    pub async fn return_book(&self, key: BookKey) -> Result<ReturnReceipt, RuntimeError> {
        self.call(|resp| Command::Return { key, resp }).await?
    }

    /// Sets the total number of copies.
    pub async fn restock(&self, key: BookKey, copies: u32) -> Result<BookRecord, RuntimeError> {
        self.call(|resp| Command::Restock { key, copies, resp }).await?
    }

    /// Patches genre and year.
    pub async fn update_details(&self, key: BookKey, patch: BookPatch) -> Result<BookRecord, RuntimeError> {
        self.call(|resp| Command::UpdateDetails { key, patch, resp }).await?
    }

    /// Waitlists an entrant without a borrow attempt.
    pub async fn join_waitlist(&self, key: BookKey, entrant: Entrant) -> Result<usize, RuntimeError> {
        self.call(|resp| Command::JoinWaitlist { key, entrant, resp }).await?
    }

    /// Runs `f` against the desk between commands.
    pub async fn read<T, F>(&self, f: F) -> Result<T, RuntimeError>
    where
        T: Send + 'static,
        F: FnOnce(&LibraryDesk) -> T + Send + 'static,
    {
        self.call(move |resp| {
            Command::Read(Box::new(move |desk: &LibraryDesk| {
                let _ = resp.send(f(desk));
            }))
        })
        .await
    }

    /// Current record for `key`.
    pub async fn book(&self, key: BookKey) -> Result<Option<BookRecord>, RuntimeError> {
        self.read(move |desk| desk.engine().book(&key).cloned()).await
    }

    /// Every record in catalog order.
    pub async fn books(&self) -> Result<Vec<BookRecord>, RuntimeError> {
        self.read(|desk| desk.engine().catalog().all_cloned()).await
    }

    /// Books matching `query`.
    pub async fn search(&self, query: BookQuery) -> Result<Vec<BookRecord>, RuntimeError> {
        self.read(move |desk| {
            desk.engine()
                .search(&query)
                .map(|found| found.into_iter().cloned().collect::<Vec<_>>())
        })
        .await?
        .map_err(|err| RuntimeError::Desk(err.into()))
    }

    /// Up to `n` most requested books with their counts.
    pub async fn popular(&self, n: usize) -> Result<Vec<(BookRecord, u64)>, RuntimeError> {
        self.read(move |desk| {
            desk.engine()
                .popular(n)
                .into_iter()
                .map(|(rec, count)| (rec.clone(), count))
                .collect::<Vec<_>>()
        })
        .await
    }

    /// Waiting entrants, oldest first.
    pub async fn waitlist(&self, key: BookKey) -> Result<Vec<Entrant>, RuntimeError> {
        self.read(move |desk| desk.engine().waitlist(&key)).await
    }

    /// Borrow attempts recorded for `key`.
    pub async fn request_count(&self, key: BookKey) -> Result<u64, RuntimeError> {
        self.read(move |desk| desk.engine().request_count(&key)).await
    }

    /// Active session, if any.
    pub async fn current(&self) -> Result<Option<Session>, RuntimeError> {
        self.read(|desk| desk.current().cloned()).await
    }

    /// Writes the full state and returns the highest durable journal sequence.
    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        self.call(|resp| Command::Flush { resp }).await?
    }

    /// Flushes, then stops the runtime and its persistence worker.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.call(|resp| Command::Shutdown { resp }).await?
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

async fn handle_command(
    cmd: Command,
    desk: &mut LibraryDesk,
    events_tx: &broadcast::Sender<LibraryEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
) -> bool {
    match cmd {
        Command::Register {
            username,
            id,
            password,
            resp,
        } => {
            let res = desk
                .register(&username, &id, &password)
                .map_err(RuntimeError::from)
                .map(|()| {
                    let _ = events_tx.send(LibraryEvent::LibrarianRegistered {
                        id: id.trim().to_string(),
                    });
                    enqueue_librarians(desk, events_tx, persist_tx);
                });
            let _ = resp.send(res);
        }
        Command::Login {
            username,
            id,
            password,
            resp,
        } => {
            let res = desk.login(&username, &id, &password).map_err(RuntimeError::from);
            if let Ok(session) = &res {
                let _ = events_tx.send(LibraryEvent::LoggedIn {
                    id: session.librarian_id.clone(),
                });
            }
            let _ = resp.send(res);
        }
        Command::Logout { resp } => {
            let session = desk.logout();
            if session.is_some() {
                let _ = events_tx.send(LibraryEvent::LoggedOut);
            }
            let _ = resp.send(session);
        }
        Command::AddBook { draft, resp } => {
            let res = desk.add_book(draft).map_err(RuntimeError::from).map(|key| {
                let _ = events_tx.send(LibraryEvent::BookAdded { key: key.clone() });
                enqueue_state(desk, events_tx, persist_tx, config);
                key
            });
            let _ = resp.send(res);
        }
        Command::RemoveBook { key, resp } => {
            let res = desk.remove_book(&key).map_err(RuntimeError::from).map(|rec| {
                let _ = events_tx.send(LibraryEvent::BookRemoved { key });
                enqueue_state(desk, events_tx, persist_tx, config);
                rec
            });
            let _ = resp.send(res);
        }
        Command::Borrow { key, entrant, resp } => {
            let res = desk
                .borrow(&key, entrant.clone())
                .map_err(RuntimeError::from)
                .map(|outcome| {
                    let event = match outcome {
                        BorrowOutcome::Lent { remaining } => LibraryEvent::Lent { key, remaining },
                        BorrowOutcome::Queued { position } => LibraryEvent::Queued {
                            key,
                            entrant,
                            position,
                        },
                    };
                    let _ = events_tx.send(event);
                    enqueue_state(desk, events_tx, persist_tx, config);
                    outcome
                });
            let _ = resp.send(res);
        }
        Command::Return { key, resp } => {
            let res = desk.return_book(&key).map_err(RuntimeError::from).map(|receipt| {
                let _ = events_tx.send(LibraryEvent::Returned {
                    key,
                    available: receipt.available,
                });
                if let Some(notification) = &receipt.notification {
                    let _ = events_tx.send(LibraryEvent::WaitlistNotified(notification.clone()));
                }
                enqueue_state(desk, events_tx, persist_tx, config);
                receipt
            });
            let _ = resp.send(res);
        }
        Command::Restock { key, copies, resp } => {
            let res = desk.restock(&key, copies).map_err(RuntimeError::from).map(|rec| {
                let _ = events_tx.send(LibraryEvent::Updated { key });
                enqueue_state(desk, events_tx, persist_tx, config);
                rec
            });
            let _ = resp.send(res);
        }
        Command::UpdateDetails { key, patch, resp } => {
            let res = desk
                .update_details(&key, patch)
                .map_err(RuntimeError::from)
                .map(|rec| {
                    let _ = events_tx.send(LibraryEvent::Updated { key });
                    enqueue_state(desk, events_tx, persist_tx, config);
                    rec
                });
            let _ = resp.send(res);
        }
        Command::JoinWaitlist { key, entrant, resp } => {
            let res = desk
                .join_waitlist(&key, entrant.clone())
                .map_err(RuntimeError::from)
                .map(|position| {
                    let _ = events_tx.send(LibraryEvent::Queued {
                        key,
                        entrant,
                        position,
                    });
                    enqueue_state(desk, events_tx, persist_tx, config);
                    position
                });
            let _ = resp.send(res);
        }
        Command::Read(f) => f(&*desk),
        Command::Flush { resp } => {
            let out = match persist_tx {
                Some(tx) => flush_all(desk, tx).await,
                None => Ok(desk.latest_op_seq()),
            };
            let _ = resp.send(out);
        }
        Command::Shutdown { resp } => {
            let out = match persist_tx {
                Some(tx) => {
                    let flushed = flush_all(desk, tx).await.map(|_| ());
                    let (done_tx, done_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                        Err(RuntimeError::ChannelClosed)
                    } else {
                        match done_rx.await {
                            Ok(()) => flushed,
                            Err(_) => Err(RuntimeError::ChannelClosed),
                        }
                    }
                }
                None => Ok(()),
            };
            let _ = resp.send(out);
            return true;
        }
    }

    false
}

/// Hands the journal tail, and a snapshot when configured, to the worker.
///
/// A full queue leaves the in-memory mutation in place and emits
/// [`LibraryEvent::PersistFailed`]; unsent journal entries ride with the next batch.
fn enqueue_state(
    desk: &mut LibraryDesk,
    events_tx: &broadcast::Sender<LibraryEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
) {
    let Some(tx) = persist_tx else {
        desk.drain_pending_ops();
        let _ = events_tx.send(LibraryEvent::DurableUpTo {
            op_seq: desk.latest_op_seq(),
        });
        return;
    };

    let msg = PersistMsg::State {
        snapshot: config.persist_on_mutation.then(|| desk.export_snapshot()),
        ops: desk.drain_pending_ops(),
        last_seq: desk.latest_op_seq(),
    };
    if let Err(err) = tx.try_send(msg) {
        let reason = err.to_string();
        if let mpsc::error::TrySendError::Full(PersistMsg::State { ops, .. })
        | mpsc::error::TrySendError::Closed(PersistMsg::State { ops, .. }) = err
        {
            desk.requeue_ops(ops);
        }
        report_queue_error(events_tx, "library state", &reason);
    }
}

fn enqueue_librarians(
    desk: &LibraryDesk,
    events_tx: &broadcast::Sender<LibraryEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
) {
    let Some(tx) = persist_tx else {
        return;
    };
    if let Err(err) = tx.try_send(PersistMsg::Librarians {
        rows: desk.librarian_rows(),
    }) {
        report_queue_error(events_tx, "librarians", &err.to_string());
    }
}

fn report_queue_error(events_tx: &broadcast::Sender<LibraryEvent>, what: &str, reason: &str) {
    tracing::error!(%reason, what, "could not queue for persistence");
    let _ = events_tx.send(LibraryEvent::PersistFailed {
        message: format!("persist queue error ({what}): {reason}"),
    });
}

async fn flush_all(desk: &mut LibraryDesk, tx: &mpsc::Sender<PersistMsg>) -> Result<OpSeq, RuntimeError> {
    let state = PersistMsg::State {
        snapshot: Some(desk.export_snapshot()),
        ops: desk.drain_pending_ops(),
        last_seq: desk.latest_op_seq(),
    };
    let librarians = PersistMsg::Librarians {
        rows: desk.librarian_rows(),
    };
    let (flush_tx, flush_rx) = oneshot::channel();

    for msg in [state, librarians, PersistMsg::Flush { resp: flush_tx }] {
        tx.send(msg).await.map_err(|_| RuntimeError::ChannelClosed)?;
    }
    flush_rx
        .await
        .map_err(|_| RuntimeError::ChannelClosed)?
        .map_err(RuntimeError::from)
}

#[derive(Default)]
struct Pending {
    snapshot: Option<LibrarySnapshot>,
    librarians: Option<Vec<LibrarianRow>>,
    ops: Vec<StoredOp>,
    last_seq: OpSeq,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.librarians.is_none() && self.ops.is_empty()
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn SnapshotSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    let latency = Duration::from_millis(config.batch_max_latency_ms);
    tokio::spawn(async move {
        let mut pending = Pending::default();
        let mut deadline = Instant::now() + latency;
        let mut last_durable: OpSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = write_pending(&sink, &mut pending, &mut last_durable, &durable_tx).await;
                        break;
                    };

                    if pending.is_empty() {
                        deadline = Instant::now() + latency;
                    }
                    match msg {
                        PersistMsg::State { snapshot, ops, last_seq } => {
                            if snapshot.is_some() {
                                pending.snapshot = snapshot;
                            }
                            pending.ops.extend(ops);
                            pending.last_seq = pending.last_seq.max(last_seq);
                        }
                        PersistMsg::Librarians { rows } => {
                            pending.librarians = Some(rows);
                        }
                        PersistMsg::Flush { resp } => {
                            let result = write_pending(&sink, &mut pending, &mut last_durable, &durable_tx).await;
                            let _ = resp.send(result.map(|_| last_durable));
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = write_pending(&sink, &mut pending, &mut last_durable, &durable_tx).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !pending.is_empty() => {
                    let _ = write_pending(&sink, &mut pending, &mut last_durable, &durable_tx).await;
                }
            }
        }
    });
}

async fn write_pending(
    sink: &Arc<Mutex<Box<dyn SnapshotSink>>>,
    pending: &mut Pending,
    last_durable: &mut OpSeq,
    durable_tx: &mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
) -> Result<(), PersistError> {
    if pending.is_empty() {
        return Ok(());
    }

    let batch = std::mem::take(pending);
    let last_seq = batch.last_seq;
    let sink_ref = Arc::clone(sink);
    let joined = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        sink.append_ops(&batch.ops)?;
        if let Some(snapshot) = &batch.snapshot {
            sink.write_snapshot(snapshot)?;
        }
        if let Some(rows) = &batch.librarians {
            sink.write_librarians(rows)?;
        }
        sink.flush()
    })
    .await;

    let result = match joined {
        Ok(inner) => inner,
        Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
    };

    match result {
        Ok(()) => {
            *last_durable = (*last_durable).max(last_seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            tracing::error!(error = %err, "persisting library state failed");
            let _ = durable_tx.send(Err(PersistError::Message(format!("write failed: {err}"))));
            Err(err)
        }
    }
}
