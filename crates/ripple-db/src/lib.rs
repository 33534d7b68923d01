pub mod migrations;
pub mod queries;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Message store backed by a single SQLite connection.
///
/// The connection sits behind a mutex; every operation is one short critical
/// section. Inserts and history reads come from the hub's dispatch loop while
/// retention deletes come from the sweeper task, so SQLite's own transaction
/// discipline is what keeps them safe against each other.
pub struct Database {
    conn: Mutex<Option<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Message store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {}", e))?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("message store is closed"))?;
        f(conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {}", e))?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("message store is closed"))?;
        f(conn)
    }

    /// Release the underlying connection. Called once at shutdown; any
    /// operation after this fails with a "closed" error.
    pub fn close(&self) -> Result<()> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("store lock poisoned: {}", e))?;
        if let Some(conn) = guard.take() {
            conn.close()
                .map_err(|(_, e)| anyhow::anyhow!("closing message store: {}", e))?;
            info!("Message store closed");
        }
        Ok(())
    }
}
