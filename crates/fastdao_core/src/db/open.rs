//! SQLite-backed connection source.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections on demand.
//! - Configure connection pragmas required by core behavior.
//! - Keep a small set of idle connections for reuse.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and a busy timeout.
//! - Connections returned to the idle set are in auto-commit mode.
//! - In-memory sources share one database across all their connections.

use super::{ConnectionSource, DbError, DbResult};
use log::{debug, error, info, warn};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_IDLE_CONNECTIONS: usize = 8;

enum Target {
    File(PathBuf),
    Memory {
        uri: String,
        // Shared-cache in-memory databases live as long as one connection
        // stays open.
        _anchor: Mutex<Connection>,
    },
}

/// Connection source over a SQLite database.
pub struct SqliteSource {
    target: Target,
    idle: Mutex<Vec<Connection>>,
}

impl SqliteSource {
    /// Creates a source over a database file, creating the file on first use.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = open_connection("file", || Connection::open(&path))?;
        Ok(Self {
            target: Target::File(path),
            idle: Mutex::new(vec![conn]),
        })
    }

    /// Creates a source over a private in-memory database.
    ///
    /// Every connection acquired from this source sees the same data.
    ///
    /// Connections share one cache, so locking is per table: while a
    /// transaction holds uncommitted writes to a table, reads of that table
    /// from other connections fail at once with `SQLITE_LOCKED` ("database
    /// table is locked"). The busy timeout does not apply to that error.
    /// Use a file-backed source when readers must run beside open scopes.
    pub fn in_memory() -> DbResult<Self> {
        let uri = format!("file:fastdao-{}?mode=memory&cache=shared", Uuid::new_v4());
        let anchor = open_connection("memory", || open_uri(&uri))?;
        Ok(Self {
            target: Target::Memory {
                uri,
                _anchor: Mutex::new(anchor),
            },
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Number of idle connections currently held for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn open_new(&self) -> DbResult<Connection> {
        match &self.target {
            Target::File(path) => open_connection("file", || Connection::open(path)),
            Target::Memory { uri, .. } => open_connection("memory", || open_uri(uri)),
        }
    }
}

impl ConnectionSource for SqliteSource {
    fn acquire(&self) -> DbResult<Connection> {
        let reused = self
            .idle
            .lock()
            .map_err(|_| DbError::SourceUnavailable("idle connection set is poisoned".to_string()))?
            .pop();

        match reused {
            Some(conn) => Ok(conn),
            None => self.open_new(),
        }
    }

    fn release(&self, conn: Connection) {
        if !conn.is_autocommit() {
            warn!("event=conn_release module=db status=rollback reason=open_transaction");
            if let Err(err) = conn.execute_batch("ROLLBACK;") {
                error!(
                    "event=conn_release module=db status=error error_code=rollback_failed error={}",
                    err
                );
                return;
            }
        }

        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < MAX_IDLE_CONNECTIONS {
                idle.push(conn);
                return;
            }
        }
        debug!("event=conn_release module=db status=closed reason=idle_full");
    }
}

fn open_uri(uri: &str) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        uri,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

fn open_connection(
    mode: &str,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();

    let conn = match open() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&conn) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}
