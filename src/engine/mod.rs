//! Lending state machine, catalog search, and snapshot import/export.

/// Borrow/return/waitlist engine.
pub mod lending;
/// Catalog queries and popularity ranking.
pub mod search;
/// Persistable snapshot rows and import reporting.
pub mod snapshot;
