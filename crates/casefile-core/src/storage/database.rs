//! Database connection management
//!
//! Wraps a single rusqlite `Connection` in a mutex and runs every call on
//! tokio's blocking pool, so async callers never block a worker thread on
//! SQLite I/O.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::storage::error::{StoreError, StoreResult};
use crate::storage::schema::{init_schema, needs_init};

/// Shared handle to the SQLite connection
///
/// Cloning is cheap; all clones use the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create the database at `path`
    ///
    /// Creates the parent directory, enables WAL mode and initializes the
    /// schema. Any failure is reported as [`StoreError::Initialization`].
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let init_err = |e: rusqlite::Error| StoreError::Initialization {
            path: path.to_path_buf(),
            details: e.to_string(),
        };

        let conn = Connection::open(path).map_err(init_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(init_err)?;
        register_functions(&conn).map_err(init_err)?;

        if needs_init(&conn) {
            init_schema(&conn).map_err(init_err)?;
        }

        info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let init_err = |e: rusqlite::Error| StoreError::Initialization {
            path: PathBuf::from(":memory:"),
            details: e.to_string(),
        };

        let conn = Connection::open_in_memory().map_err(init_err)?;
        register_functions(&conn).map_err(init_err)?;
        init_schema(&conn).map_err(init_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Path of the database file (`None` for in-memory databases)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool
    ///
    /// The mutex is held for the duration of the closure, so a closure that
    /// opens a transaction owns the connection until it commits.
    pub async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Size of the database file on disk, if any
    pub fn file_size(&self) -> Option<u64> {
        let path = self.path.as_ref()?;
        let size = std::fs::metadata(path).ok().map(|m| m.len());
        debug!("Database file size: {:?}", size);
        size
    }
}

/// Replace SQLite's ASCII-only `lower()` with full Unicode case folding
///
/// Search patterns are lower-cased in Rust, so both sides must fold alike.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|text| text.to_lowercase())),
    )
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}
