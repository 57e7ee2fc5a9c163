use booklend::{
    access::{
        AccessError,
        desk::{DeskError, LibraryDesk},
        password::hash_password,
        registry::{LibrarianRegistry, LibrarianRow},
    },
    book::{BookDraft, BookPatch, Entrant},
    core::StoreError,
    op::Op,
    types::BookKey,
};

fn entrant() -> Entrant {
    Entrant::new("Ann", "ann@example.org", "555").expect("entrant")
}

fn logged_in_desk() -> LibraryDesk {
    let mut desk = LibraryDesk::default();
    desk.register("ada", "L1", "s3cret").expect("register");
    desk.login("ada", "L1", "s3cret").expect("login");
    desk
}

#[test]
fn every_credential_failure_looks_the_same() {
    let mut registry = LibrarianRegistry::new();
    registry.register("ada", "L1", "s3cret").expect("register");

    for (user, id, pass) in [
        ("ada", "L1", "wrong"),
        ("grace", "L1", "s3cret"),
        ("ada", "L2", "s3cret"),
        ("", "", ""),
    ] {
        assert_eq!(
            registry.authenticate(user, id, pass),
            Err(AccessError::InvalidCredentials),
            "{user}/{id}/{pass}"
        );
    }

    let session = registry.authenticate(" ada ", "L1", "s3cret").expect("login");
    assert_eq!(session.librarian_id, "L1");
    assert_eq!(session.username, "ada");
}

#[test]
fn registration_rejects_duplicates_and_blanks() {
    let mut registry = LibrarianRegistry::new();
    registry.register("ada", "L1", "pw").expect("first");
    assert_eq!(
        registry.register("grace", " L1 ", "pw").map(|_| ()),
        Err(AccessError::DuplicateId("L1".into()))
    );
    assert!(matches!(registry.register(" ", "L2", "pw"), Err(AccessError::Validation(_))));
    assert!(matches!(registry.register("grace", "L2", ""), Err(AccessError::Validation(_))));
    assert_eq!(registry.len(), 1);
}

#[test]
fn stored_hashes_are_salted_and_reloadable() {
    let mut registry = LibrarianRegistry::new();
    registry.register("ada", "L1", "pw").expect("ada");
    registry.register("bob", "L2", "pw").expect("bob");
    let rows = registry.export_rows();
    assert_ne!(rows[0].password_hash, rows[1].password_hash);
    assert!(!rows[0].password_hash.contains("pw"));
    for row in &rows {
        assert!(row.password_hash.starts_with("$argon2id$"), "{}", row.password_hash);
    }

    let (reloaded, skipped) = LibrarianRegistry::from_rows(rows);
    assert!(skipped.is_empty());
    assert!(reloaded.authenticate("bob", "L2", "pw").is_ok());
}

#[test]
fn legacy_unsalted_rows_still_authenticate() {
    let legacy = LibrarianRow {
        username: "old".into(),
        id: "L9".into(),
        password_hash: "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8".into(),
    };
    let bad = LibrarianRow {
        username: "broken".into(),
        id: "L10".into(),
        password_hash: "not-a-hash".into(),
    };
    let dup = LibrarianRow {
        username: "again".into(),
        id: "L9".into(),
        password_hash: hash_password("x").expect("hash"),
    };

    let (registry, skipped) = LibrarianRegistry::from_rows(vec![legacy, bad, dup]);
    assert_eq!(registry.len(), 1);
    assert_eq!(skipped.iter().map(|s| s.line).collect::<Vec<_>>(), vec![2, 3]);
    assert!(registry.authenticate("old", "L9", "password").is_ok());
}

#[test]
fn mutations_need_a_session_but_queries_do_not() {
    let mut desk = LibraryDesk::default();
    let key = BookKey::new("Dune", "Herbert").expect("key");
    let denied = DeskError::Access(AccessError::NotAuthenticated);

    assert_eq!(desk.add_book(BookDraft::new("Dune", "Herbert", 1, "", 1965)), Err(denied.clone()));
    assert_eq!(desk.borrow(&key, entrant()), Err(denied.clone()));
    assert_eq!(desk.return_book(&key), Err(denied.clone()));
    assert_eq!(desk.remove_book(&key), Err(denied.clone()));
    assert_eq!(desk.restock(&key, 3), Err(denied.clone()));
    assert_eq!(desk.join_waitlist(&key, entrant()), Err(denied.clone()));
    assert_eq!(desk.update_details(&key, BookPatch::default()), Err(denied));

    assert!(desk.engine().books().is_empty());
    assert!(desk.drain_pending_ops().is_empty());
}

#[test]
fn failed_login_keeps_the_current_session_and_logout_clears_it() {
    let mut desk = logged_in_desk();
    desk.register("grace", "L2", "hopper").expect("second");
    assert!(desk.login("grace", "L2", "nope").is_err());
    assert_eq!(desk.current().map(|s| s.username.as_str()), Some("ada"));

    let key = desk
        .add_book(BookDraft::new("Dune", "Herbert", 1, "", 1965))
        .expect("add");
    assert_eq!(desk.logout().map(|s| s.librarian_id), Some("L1".to_string()));
    assert!(desk.logout().is_none());
    assert_eq!(
        desk.borrow(&key, entrant()),
        Err(DeskError::Access(AccessError::NotAuthenticated))
    );
}

#[test]
fn desk_journals_each_mutation_with_its_librarian() {
    let mut desk = logged_in_desk();
    let key = desk
        .add_book(BookDraft::new("Dune", "Herbert", 1, "", 1965))
        .expect("add");
    let _ = desk.borrow(&key, entrant()).expect("lend");
    let _ = desk.borrow(&key, entrant()).expect("queue");
    let receipt = desk.return_book(&key).expect("return");
    assert!(receipt.notification.is_some());
    assert!(matches!(
        desk.remove_book(&key),
        Err(DeskError::Store(StoreError::HasOutstandingLoans { .. }))
    ));

    let ops = desk.drain_pending_ops();
    assert_eq!(ops.iter().map(|o| o.seq).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    assert!(ops.iter().all(|o| o.librarian_id == "L1"));
    assert_eq!(
        ops.iter().map(|o| o.op.kind()).collect::<Vec<_>>(),
        vec!["add_book", "borrow_book", "borrow_book", "return_book"]
    );
    assert!(matches!(&ops[2].op, Op::Borrow { queued: true, .. }));
    assert!(matches!(&ops[3].op, Op::Return { notified: Some(_), .. }));
    assert_eq!(desk.latest_op_seq(), 4);
    assert!(desk.drain_pending_ops().is_empty());
}

#[test]
fn journal_numbering_resumes_after_a_restart() {
    let desk = LibraryDesk::default().resume_after(41);
    assert_eq!(desk.latest_op_seq(), 41);
}
