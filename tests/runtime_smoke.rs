use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tempfile::TempDir;

use booklend::{
    access::{AccessError, desk::{DeskError, LibraryDesk}, registry::LibrarianRow},
    book::{BookDraft, Entrant},
    engine::{lending::BorrowOutcome, search::BookQuery, snapshot::LibrarySnapshot},
    persist::{PersistError, PersistResult, SnapshotSink, SnapshotSource, open_desk, sqlite::SqliteStore},
    runtime::{
        events::LibraryEvent,
        handle::{RuntimeConfig, RuntimeError, spawn_library},
    },
};

fn entrant(name: &str) -> Entrant {
    Entrant::new(name, format!("{name}@example.org"), "555").expect("entrant")
}

#[derive(Default)]
struct Recorded {
    snapshots: Vec<LibrarySnapshot>,
    librarians: Vec<Vec<LibrarianRow>>,
    op_seqs: Vec<u64>,
}

struct RecordingSink {
    seen: Arc<Mutex<Recorded>>,
    delay: Duration,
}

impl SnapshotSink for RecordingSink {
    fn write_snapshot(&mut self, snapshot: &LibrarySnapshot) -> PersistResult<()> {
        std::thread::sleep(self.delay);
        self.seen.lock().expect("lock").snapshots.push(snapshot.clone());
        Ok(())
    }

    fn write_librarians(&mut self, rows: &[LibrarianRow]) -> PersistResult<()> {
        self.seen.lock().expect("lock").librarians.push(rows.to_vec());
        Ok(())
    }

    fn append_ops(&mut self, ops: &[booklend::op::StoredOp]) -> PersistResult<()> {
        self.seen.lock().expect("lock").op_seqs.extend(ops.iter().map(|o| o.seq));
        Ok(())
    }
}

struct FailingSink;

impl SnapshotSink for FailingSink {
    fn write_snapshot(&mut self, _snapshot: &LibrarySnapshot) -> PersistResult<()> {
        Err(PersistError::Message("disk full".into()))
    }

    fn write_librarians(&mut self, _rows: &[LibrarianRow]) -> PersistResult<()> {
        Ok(())
    }
}

async fn next_matching<F>(sub: &mut tokio::sync::broadcast::Receiver<LibraryEvent>, pred: F) -> LibraryEvent
where
    F: Fn(&LibraryEvent) -> bool,
{
    loop {
        let evt = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("event timeout")
            .expect("recv");
        if pred(&evt) {
            return evt;
        }
    }
}

#[tokio::test]
async fn return_broadcasts_waitlist_notification() {
    let handle = spawn_library(LibraryDesk::default(), None, RuntimeConfig::default());
    let mut sub = handle.subscribe();

    handle.register("ada", "L1", "s3cret").await.expect("register");
    handle.login("ada", "L1", "s3cret").await.expect("login");
    let key = handle
        .add_book(BookDraft::new("Dune", "Frank Herbert", 1, "SciFi", 1965))
        .await
        .expect("add");

    let lent = handle.borrow(key.clone(), entrant("ann")).await.expect("lend");
    assert_eq!(lent, BorrowOutcome::Lent { remaining: 0 });
    let queued = handle.borrow(key.clone(), entrant("bob")).await.expect("queue");
    assert_eq!(queued, BorrowOutcome::Queued { position: 1 });

    let receipt = handle.return_book(key.clone()).await.expect("return");
    assert_eq!(receipt.available, 1);

    let evt = next_matching(&mut sub, |e| matches!(e, LibraryEvent::WaitlistNotified(_))).await;
    let LibraryEvent::WaitlistNotified(note) = evt else {
        unreachable!()
    };
    assert_eq!(note.entrant, entrant("bob"));
    assert_eq!(note.key, key);

    assert_eq!(handle.request_count(key.clone()).await.expect("count"), 2);
    assert!(handle.waitlist(key.clone()).await.expect("waitlist").is_empty());
    let available = handle.search(BookQuery::Available).await.expect("search");
    assert_eq!(available.len(), 1);

    handle.shutdown().await.expect("shutdown");
    assert!(matches!(handle.flush().await, Err(RuntimeError::ChannelClosed)));
}

#[tokio::test]
async fn guarded_commands_fail_until_login() {
    let handle = spawn_library(LibraryDesk::default(), None, RuntimeConfig::default());
    let err = handle
        .add_book(BookDraft::new("Dune", "Herbert", 1, "", 1965))
        .await
        .expect_err("no session");
    assert!(matches!(
        err,
        RuntimeError::Desk(DeskError::Access(AccessError::NotAuthenticated))
    ));
    assert!(handle.books().await.expect("books").is_empty());
    assert!(handle.logout().await.expect("logout").is_none());
    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn mutations_reach_the_sink_and_flush_reports_durability() {
    let seen = Arc::new(Mutex::new(Recorded::default()));
    let sink = RecordingSink {
        seen: Arc::clone(&seen),
        delay: Duration::ZERO,
    };
    let handle = spawn_library(LibraryDesk::default(), Some(Box::new(sink)), RuntimeConfig::default());
    let mut sub = handle.subscribe();

    handle.register("ada", "L1", "s3cret").await.expect("register");
    handle.login("ada", "L1", "s3cret").await.expect("login");
    let key = handle
        .add_book(BookDraft::new("Emma", "Jane Austen", 2, "Classic", 1815))
        .await
        .expect("add");
    let _ = handle.borrow(key.clone(), entrant("ann")).await.expect("lend");

    let evt = next_matching(&mut sub, |e| {
        matches!(e, LibraryEvent::DurableUpTo { op_seq } if *op_seq >= 1)
    })
    .await;
    assert!(matches!(evt, LibraryEvent::DurableUpTo { .. }));

    assert_eq!(handle.flush().await.expect("flush"), 2);
    {
        let seen = seen.lock().expect("lock");
        assert_eq!(seen.op_seqs, vec![1, 2]);
        let last = seen.snapshots.last().expect("snapshot");
        assert_eq!(last.books[0].available, 1);
        assert_eq!(last.books[0].request_counter, 1);
        assert_eq!(seen.librarians.last().expect("librarians")[0].id, "L1");
    }

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn failing_sink_surfaces_as_error_and_event_but_keeps_memory_state() {
    let handle = spawn_library(
        LibraryDesk::default(),
        Some(Box::new(FailingSink)),
        RuntimeConfig::default(),
    );
    let mut sub = handle.subscribe();

    handle.register("ada", "L1", "s3cret").await.expect("register");
    handle.login("ada", "L1", "s3cret").await.expect("login");
    let key = handle
        .add_book(BookDraft::new("Dune", "Herbert", 1, "", 1965))
        .await
        .expect("mutation itself succeeds");

    let evt = next_matching(&mut sub, |e| matches!(e, LibraryEvent::PersistFailed { .. })).await;
    assert!(matches!(evt, LibraryEvent::PersistFailed { message } if message.contains("disk full")));

    assert!(matches!(handle.flush().await, Err(RuntimeError::Persist(_))));
    assert!(handle.book(key).await.expect("book").is_some());
    let _ = handle.shutdown().await;
}

#[tokio::test]
async fn queue_pressure_keeps_outcomes_and_reports_an_event() {
    let seen = Arc::new(Mutex::new(Recorded::default()));
    let sink = RecordingSink {
        seen: Arc::clone(&seen),
        delay: Duration::from_millis(250),
    };
    let cfg = RuntimeConfig {
        persist_on_mutation: true,
        persist_queue_bound: 1,
        batch_max_latency_ms: 0,
    };
    let handle = spawn_library(LibraryDesk::default(), Some(Box::new(sink)), cfg);
    let mut sub = handle.subscribe();

    handle.register("ada", "L1", "s3cret").await.expect("register");
    handle.login("ada", "L1", "s3cret").await.expect("login");
    let key = handle
        .add_book(BookDraft::new("Dune", "Frank Herbert", 1, "SciFi", 1965))
        .await
        .expect("add");

    for i in 0..16usize {
        let outcome = handle
            .borrow(key.clone(), entrant(&format!("reader{i}")))
            .await
            .expect("borrow replies with its outcome under queue pressure");
        let expected = match i {
            0 => BorrowOutcome::Lent { remaining: 0 },
            n => BorrowOutcome::Queued { position: n },
        };
        assert_eq!(outcome, expected, "borrow {i}");
    }

    let evt = next_matching(&mut sub, |e| matches!(e, LibraryEvent::PersistFailed { .. })).await;
    assert!(matches!(evt, LibraryEvent::PersistFailed { message } if message.contains("persist queue error")));

    let seq = handle.flush().await.expect("flush catches up");
    assert_eq!(seq, 17);
    let mut op_seqs = seen.lock().expect("lock").op_seqs.clone();
    op_seqs.sort_unstable();
    assert_eq!(op_seqs, (1..=17).collect::<Vec<u64>>());
    assert_eq!(handle.waitlist(key.clone()).await.expect("waitlist").len(), 15);
    assert_eq!(handle.request_count(key).await.expect("count"), 16);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn sqlite_backed_runtime_survives_restart() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("booklend.db");

    {
        let store = SqliteStore::open(&db_path).expect("open");
        let (desk, _) = open_desk(&store).expect("load empty");
        let handle = spawn_library(desk, Some(Box::new(store)), RuntimeConfig::default());
        handle.register("ada", "L1", "s3cret").await.expect("register");
        handle.login("ada", "L1", "s3cret").await.expect("login");
        let key = handle
            .add_book(BookDraft::new("Beloved", "Toni Morrison", 1, "Fiction", 1987))
            .await
            .expect("add");
        let _ = handle.borrow(key.clone(), entrant("ann")).await.expect("lend");
        let _ = handle.join_waitlist(key, entrant("bob")).await.expect("join");
        handle.shutdown().await.expect("shutdown");
    }

    let store = SqliteStore::open(&db_path).expect("reopen");
    assert_eq!(store.latest_op_seq().expect("seq"), 3);
    let (desk, report) = open_desk(&store).expect("reload");
    assert!(report.skipped.is_empty());
    let books = desk.engine().books();
    let book = books[0];
    assert_eq!((book.copies, book.available), (1, 0));
    assert_eq!(desk.engine().waitlist(&book.key()), vec![entrant("bob")]);
    assert!(desk.registry().is_registered("L1"));
}
