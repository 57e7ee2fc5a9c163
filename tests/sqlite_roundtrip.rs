use tempfile::TempDir;

use booklend::{
    access::desk::LibraryDesk,
    book::{BookDraft, BookPatch, Entrant},
    op::Op,
    persist::{SnapshotSink, SnapshotSource, open_desk, sqlite::SqliteStore},
    types::BookKey,
};

fn entrant(name: &str) -> Entrant {
    Entrant::new(name, format!("{name}@example.org"), "555").expect("entrant")
}

fn working_desk() -> (LibraryDesk, BookKey) {
    let mut desk = LibraryDesk::default();
    desk.register("ada", "L1", "s3cret").expect("register");
    desk.login("ada", "L1", "s3cret").expect("login");
    let key = desk
        .add_book(BookDraft::new("Kindred", "Octavia E. Butler", 1, "SciFi", 1979))
        .expect("add");
    let _ = desk.borrow(&key, entrant("ann")).expect("lend");
    let _ = desk.borrow(&key, entrant("bob")).expect("queue");
    let _ = desk.join_waitlist(&key, entrant("cy")).expect("join");
    desk.update_details(
        &key,
        BookPatch {
            genre: Some("Speculative".into()),
            year: None,
        },
    )
    .expect("patch");
    (desk, key)
}

#[test]
fn snapshot_and_journal_round_trip_through_a_reopen() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("booklend.db");
    let (mut desk, key) = working_desk();

    let mut store = SqliteStore::open(&db_path).expect("open");
    store.write_snapshot(&desk.export_snapshot()).expect("snapshot");
    store.write_librarians(&desk.librarian_rows()).expect("librarians");
    store.append_ops(&desk.drain_pending_ops()).expect("journal");
    store.flush().expect("flush");
    drop(store);

    let store = SqliteStore::open(&db_path).expect("reopen");
    assert_eq!(store.latest_op_seq().expect("seq"), 5);

    let (mut reloaded, report) = open_desk(&store).expect("load");
    assert!(report.skipped.is_empty());
    assert_eq!(reloaded.export_snapshot(), desk.export_snapshot());
    assert_eq!(reloaded.engine().request_count(&key), 2);
    assert_eq!(
        reloaded.engine().waitlist(&key),
        vec![entrant("bob"), entrant("cy")]
    );
    assert_eq!(reloaded.latest_op_seq(), 5);

    reloaded.login("ada", "L1", "s3cret").expect("login after reload");
    let _ = reloaded.return_book(&key).expect("return");
    assert_eq!(reloaded.drain_pending_ops()[0].seq, 6);
}

#[test]
fn journal_entries_decode_in_order() {
    let (mut desk, key) = working_desk();
    let mut store = SqliteStore::open_in_memory().expect("memory");
    store.append_ops(&desk.drain_pending_ops()).expect("journal");

    let events = store.load_events_after(2).expect("events");
    assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3, 4, 5]);
    assert!(matches!(&events[0].op, Op::Borrow { queued: true, .. }));
    assert_eq!(
        events[1].op,
        Op::JoinWaitlist {
            key: key.clone(),
            entrant: entrant("cy")
        }
    );
    assert!(events.iter().all(|e| e.librarian_id == "L1"));
}

#[test]
fn rewriting_the_snapshot_replaces_old_rows() {
    let (mut desk, key) = working_desk();
    let mut store = SqliteStore::open_in_memory().expect("memory");
    store.write_snapshot(&desk.export_snapshot()).expect("first");

    let _ = desk.return_book(&key).expect("return to bob");
    let _ = desk.return_book(&key);
    store.write_snapshot(&desk.export_snapshot()).expect("second");

    let loaded = store.load_snapshot().expect("load");
    assert_eq!(loaded.snapshot.books.len(), 1);
    assert_eq!(loaded.snapshot.books[0].waitlist, vec![entrant("cy")]);
    assert_eq!(loaded.snapshot, desk.export_snapshot());
}

#[test]
fn out_of_range_rows_are_skipped() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("bad.db");
    {
        let (desk, _) = working_desk();
        let mut store = SqliteStore::open(&db_path).expect("open");
        store.write_snapshot(&desk.export_snapshot()).expect("snapshot");
    }
    {
        let conn = rusqlite::Connection::open(&db_path).expect("raw");
        conn.execute(
            "INSERT INTO books(position, title, author, genre, year, copies, available, request_counter)
             VALUES (1, 'Negative', 'Copies', '', 2000, -3, 0, 0)",
            [],
        )
        .expect("insert bad row");
    }

    let store = SqliteStore::open(&db_path).expect("reopen");
    let (desk, report) = open_desk(&store).expect("load");
    assert_eq!(report.imported, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].line, 2);
    assert!(report.skipped[0].reason.contains("copies"));
    assert_eq!(desk.engine().books().len(), 1);
}
