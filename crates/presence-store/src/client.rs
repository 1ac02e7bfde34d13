//! SQLite connection management and the shared store handle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use presence_core::{CoreError, DeviceId};

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Incompatible schema: table {table} is missing {missing:?}")]
    IncompatibleSchema { table: String, missing: Vec<String> },

    #[error("Device not found: {0}")]
    UnknownDevice(DeviceId),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Thread-safe handle to the session database.
///
/// All access to the connection goes through one mutex, which is also the
/// exclusive section around `apply`. Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SessionStore {
    /// Open (or create) the database file at `path`.
    ///
    /// Parent directories are created as needed. The schema is not touched;
    /// call [`SessionStore::ensure_schema`] before the first `apply`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path)?;
        let store = Self::from_connection(conn, path)?;
        tracing::info!(path = %store.path.display(), "Opened session store");
        Ok(store)
    }

    /// In-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, PathBuf::from(":memory:"))
    }

    fn from_connection(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take exclusive access to the connection. The guard releases on drop,
    /// including on early returns through `?`.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}
