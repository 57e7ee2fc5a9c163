//! Book-lending catalog with librarian access control and pluggable storage.
//!
//! The [`engine::lending::LendingEngine`] owns the catalog and per-book
//! statistics. [`access::desk::LibraryDesk`] gates its mutations behind a
//! librarian session and journals them. [`runtime::handle::spawn_library`]
//! runs a desk as a single-writer task with background persistence.
//!
//! # Examples
//!
//! Synchronous usage with a desk:
//! ```
//! use booklend::{
//!     access::desk::LibraryDesk,
//!     book::{BookDraft, Entrant},
//!     engine::lending::BorrowOutcome,
//! };
//!
//! let mut desk = LibraryDesk::default();
//! desk.register("ada", "L1", "s3cret").expect("register");
//! desk.login("ada", "L1", "s3cret").expect("login");
//!
//! let key = desk
//!     .add_book(BookDraft::new("Dune", "Frank Herbert", 1, "SciFi", 1965))
//!     .expect("add");
//! let reader = Entrant::new("Ann", "ann@example.org", "555-0100").expect("entrant");
//! assert_eq!(desk.borrow(&key, reader).expect("borrow"), BorrowOutcome::Lent { remaining: 0 });
//! assert!(desk.engine().book(&key).expect("book").is_loaned());
//! ```
//!
//! Runtime usage with a SQLite store:
//! ```no_run
//! use booklend::{
//!     persist::{open_desk, sqlite::SqliteStore},
//!     runtime::handle::{spawn_library, RuntimeConfig},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = SqliteStore::open("booklend.db").expect("open sqlite");
//! let (desk, _report) = open_desk(&store).expect("load");
//! let handle = spawn_library(desk, Some(Box::new(store)), RuntimeConfig::default());
//! handle.login("ada", "L1", "s3cret").await.expect("login");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Librarian registry, password hashing and the session-gated desk.
pub mod access;
/// Book records, drafts, patches and waitlist entrants.
pub mod book;
/// TOML configuration with env overrides.
pub mod config;
/// Line-oriented librarian console.
pub mod console;
/// Catalog and statistics stores.
pub mod core;
/// Lending state machine, search and snapshots.
pub mod engine;
/// Application-level error type.
pub mod error;
/// tracing-subscriber setup.
pub mod logger;
/// Audit journal entries.
pub mod op;
/// Storage adapters.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared primitive types.
pub mod types;
