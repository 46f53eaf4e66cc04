// ── Recall Store ───────────────────────────────────────────────────────────
// SQLite persistence via rusqlite, one connection behind a Mutex.
//
// Module layout:
//   schema         — idempotent migrations (tables, FTS5, indexes)
//   vector         — embedding BLOB codec, unit-norm similarity, norm guard
//   memories       — memory CRUD, candidate queries, the write pipeline
//   preferences    — preference rows + supersession discipline
//   entities       — entity CRUD, case-folded lookup, join-set updates
//   relations      — edge upsert (max-merge weight) + neighbor queries
//   contradictions — conflict rows, pending list, manual resolution
//
// Read paths lock the connection briefly; the write pipeline holds it for
// the whole transaction.

use crate::atoms::error::EngineResult;
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

pub(crate) mod contradictions;
pub(crate) mod entities;
pub(crate) mod memories;
pub(crate) mod preferences;
pub(crate) mod relations;
mod schema;
pub(crate) mod vector;

pub use memories::InsertReport;
pub use vector::{cosine_similarity, embedding_to_blob, l2_norm, normalize_embedding};

/// Thread-safe database wrapper.
pub struct MemoryStore {
    /// The SQLite connection, protected by a Mutex.
    /// `pub` for integration tests that need raw access.
    pub conn: Mutex<Connection>,
}

impl MemoryStore {
    /// Open (or create) the database and initialize tables.
    pub fn open(path: &Path) -> EngineResult<Self> {
        info!("[store] Opening memory store at {:?}", path);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        schema::run_migrations(&conn)?;
        Ok(MemoryStore { conn: Mutex::new(conn) })
    }

    /// In-memory store with the full schema. Used by tests.
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(MemoryStore { conn: Mutex::new(conn) })
    }
}
