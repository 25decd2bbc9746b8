//! cnav-storage: SQLite persistence for the symbol graph.
//!
//! Uses rusqlite with bundled SQLite, WAL mode, and an embedded schema.
//! The registries are stored explicitly so that round-tripping produces an
//! identical graph up to id renumbering; unit facts are stored normalized
//! and replayed through the merger on restore.

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

use cnav_core::CnavError;

mod graph_persistence;

pub use graph_persistence::RestoredIndex;

const SCHEMA: &str = include_str!("schema.sql");

/// SQLite-backed storage for the cnav graph, registries, and source table.
///
/// Wraps `rusqlite::Connection` in a `Mutex` to satisfy `Send + Sync`.
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub(crate) fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("storage mutex poisoned")
    }

    /// Open (or create) a cnav database at the given path.
    pub fn open(path: &Path) -> Result<Self, CnavError> {
        let conn = Connection::open(path).map_err(|e| CnavError::Storage(e.to_string()))?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        conn.pragma_update(None, "temp_store", "MEMORY")
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| CnavError::Storage(e.to_string()))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| CnavError::Storage(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, CnavError> {
        let conn =
            Connection::open_in_memory().map_err(|e| CnavError::Storage(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| CnavError::Storage(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// SHA-256 hex digest of file contents, used to spot sources that
    /// changed while the index was down.
    pub fn content_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        format!("{:x}", hasher.finalize())
    }
}
