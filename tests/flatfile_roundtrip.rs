use std::fs;

use tempfile::TempDir;

use booklend::{
    access::{desk::LibraryDesk, password::hash_password},
    book::{BookDraft, Entrant},
    persist::{
        SnapshotSink, SnapshotSource,
        flatfile::{BOOKS_FILE, FlatFileStore, LIBRARIANS_FILE},
        open_desk,
    },
    types::BookKey,
};

fn entrant(name: &str) -> Entrant {
    Entrant::new(name, format!("{name}@example.org"), "555").expect("entrant")
}

fn populated_desk() -> (LibraryDesk, BookKey) {
    let mut desk = LibraryDesk::default();
    desk.register("ada", "L1", "s3cret").expect("register");
    desk.login("ada", "L1", "s3cret").expect("login");
    let dune = desk
        .add_book(BookDraft::new("Dune", "Frank Herbert", 1, "SciFi", 1965))
        .expect("dune");
    desk.add_book(BookDraft::new("Persuasion, Vol. 1", "Jane Austen", 2, "Classic", 1817))
        .expect("persuasion");
    let _ = desk.borrow(&dune, entrant("ann")).expect("lend");
    let _ = desk.borrow(&dune, entrant("bob")).expect("queue bob");
    let _ = desk.borrow(&dune, entrant("cy")).expect("queue cy");
    (desk, dune)
}

#[test]
fn snapshot_and_librarians_survive_a_reload() {
    let tmp = TempDir::new().expect("tmp");
    let (desk, dune) = populated_desk();

    let mut store = FlatFileStore::open(tmp.path().join("data")).expect("open");
    store.write_snapshot(&desk.export_snapshot()).expect("books");
    store.write_librarians(&desk.librarian_rows()).expect("librarians");

    let (mut reloaded, report) = open_desk(&store).expect("reload");
    assert!(report.skipped.is_empty());
    assert_eq!(report.imported, 2);
    assert_eq!(reloaded.export_snapshot(), desk.export_snapshot());
    assert_eq!(reloaded.engine().request_count(&dune), 3);
    assert_eq!(
        reloaded.engine().waitlist(&dune),
        vec![entrant("bob"), entrant("cy")]
    );

    reloaded.login("ada", "L1", "s3cret").expect("stored hash verifies");
    let receipt = reloaded.return_book(&dune).expect("return");
    assert_eq!(receipt.notification.expect("notify").entrant, entrant("bob"));
}

#[test]
fn rows_are_written_in_the_documented_field_order() {
    let tmp = TempDir::new().expect("tmp");
    let (desk, _) = populated_desk();
    let mut store = FlatFileStore::open(tmp.path()).expect("open");
    store.write_snapshot(&desk.export_snapshot()).expect("books");

    let text = fs::read_to_string(tmp.path().join(BOOKS_FILE)).expect("read");
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("title,author,is_loaned,copies,genre,year,available,request_counter,waitlist")
    );
    assert_eq!(
        lines.next(),
        Some("Dune,Frank Herbert,yes,1,SciFi,1965,0,3,\"bob,bob@example.org,555;cy,cy@example.org,555\"")
    );
    assert_eq!(
        lines.next(),
        Some("\"Persuasion, Vol. 1\",Jane Austen,no,2,Classic,1817,2,0,")
    );
}

#[test]
fn malformed_rows_are_skipped_with_their_line_numbers() {
    let tmp = TempDir::new().expect("tmp");
    let content = "\
title,author,is_loaned,copies,genre,year,available,request_counter,waitlist
Dune,Frank Herbert,no,2,SciFi,1965,2,4,
Broken,Row,no,two,SciFi,1965,2,0,
Over,Lent,no,1,SciFi,1965,3,0,
,Nobody,no,1,SciFi,1965,1,0,
Emma,Jane Austen,no,1,Classic,1815,1,7
Short,Row,no
";
    fs::write(tmp.path().join(BOOKS_FILE), content).expect("write");

    let store = FlatFileStore::open(tmp.path()).expect("open");
    let (desk, report) = open_desk(&store).expect("load");

    assert_eq!(report.imported, 2);
    let lines: Vec<u64> = report.skipped.iter().map(|s| s.line).collect();
    assert_eq!(lines, vec![3, 4, 5, 7]);
    assert!(report.skipped[0].reason.contains("copies"));

    let emma = BookKey::new("Emma", "Jane Austen").expect("key");
    assert_eq!(desk.engine().request_count(&emma), 7);
    assert!(desk.engine().waitlist(&emma).is_empty());
}

#[test]
fn missing_files_mean_an_empty_library() {
    let tmp = TempDir::new().expect("tmp");
    let store = FlatFileStore::open(tmp.path().join("fresh")).expect("open");
    assert!(store.load_snapshot().expect("books").snapshot.books.is_empty());
    assert!(store.load_librarians().expect("librarians").rows.is_empty());
    assert!(!tmp.path().join("fresh").join(LIBRARIANS_FILE).exists());
}

#[test]
fn quoted_line_breaks_do_not_shift_reported_lines() {
    let tmp = TempDir::new().expect("tmp");
    let content = "\
title,author,is_loaned,copies,genre,year,available,request_counter,waitlist
\"Two
Lines\",Anon,no,1,Poetry,1990,1,0,
Broken,Row,no,two,SciFi,1965,2,0,
Dune,Frank Herbert,no,2,SciFi,1965,2,4,
";
    fs::write(tmp.path().join(BOOKS_FILE), content).expect("write");

    let store = FlatFileStore::open(tmp.path()).expect("open");
    let (desk, report) = open_desk(&store).expect("load");

    assert_eq!(report.imported, 2);
    let lines: Vec<u64> = report.skipped.iter().map(|s| s.line).collect();
    assert_eq!(lines, vec![4]);
    let poem = BookKey::new("Two\nLines", "Anon").expect("key");
    assert!(desk.engine().book(&poem).is_some());
}

#[test]
fn bad_waitlist_entries_skip_the_row() {
    let tmp = TempDir::new().expect("tmp");
    let content = "\
title,author,is_loaned,copies,genre,year,available,request_counter,waitlist
Dune,Frank Herbert,yes,1,SciFi,1965,0,2,\"Ann,ann@example.org\"
Emma,Jane Austen,yes,1,Classic,1815,0,1,\",x,y\"
Beloved,Toni Morrison,yes,1,Fiction,1987,0,3,\"Bob,,222;Cy,cy@example.org,333\"
";
    fs::write(tmp.path().join(BOOKS_FILE), content).expect("write");

    let store = FlatFileStore::open(tmp.path()).expect("open");
    let (desk, report) = open_desk(&store).expect("load");

    assert_eq!(report.imported, 1);
    let lines: Vec<u64> = report.skipped.iter().map(|s| s.line).collect();
    assert_eq!(lines, vec![2, 3]);
    let beloved = BookKey::new("Beloved", "Toni Morrison").expect("key");
    let waitlist = desk.engine().waitlist(&beloved);
    assert_eq!(waitlist.len(), 2);
    assert_eq!(waitlist[0].email, "");
    assert_eq!(waitlist[1].phone, "333");
}

#[test]
fn librarian_skips_report_file_lines() {
    let tmp = TempDir::new().expect("tmp");
    let good = hash_password("s3cret").expect("hash");
    let content = format!(
        "username,id,password_hash\n\
         broken,L0,not-a-hash\n\
         ada,L1,\"{good}\"\n\
         short,L2\n\
         again,L1,\"{good}\"\n"
    );
    fs::write(tmp.path().join(LIBRARIANS_FILE), content).expect("write");

    let store = FlatFileStore::open(tmp.path()).expect("open");
    let (mut desk, report) = open_desk(&store).expect("load");

    let lines: Vec<u64> = report.skipped.iter().map(|s| s.line).collect();
    assert_eq!(lines, vec![2, 4, 5]);
    assert!(report.skipped[0].reason.contains("password hash"));
    assert!(report.skipped[1].reason.contains("fields"));
    assert!(report.skipped[2].reason.contains("duplicate"));
    assert_eq!(desk.registry().len(), 1);
    desk.login("ada", "L1", "s3cret").expect("login");
}
