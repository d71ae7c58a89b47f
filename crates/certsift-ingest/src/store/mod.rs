//! SQLite persistence for extracted certificate records.
//!
//! The store is a single `domains` table, written exclusively by the
//! [`StoreWriter`] thread and read concurrently by the query service. WAL
//! journal mode provides the concurrent-read / single-writer semantics the
//! rest of the system assumes.

pub mod schema;
mod writer;

use std::path::Path;

use rusqlite::Connection;

use crate::Result;

pub use writer::{StoreWriter, WriterConfig};

/// Open (or create) the store at `path` and bring its schema up to date.
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    schema::init_schema(&conn)?;

    Ok(conn)
}
