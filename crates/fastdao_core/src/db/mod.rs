//! Connection sources and scoped connection acquisition.
//!
//! # Responsibility
//! - Define the contract every connection provider must satisfy.
//! - Hand out connections through a guard that always releases them.
//!
//! # Invariants
//! - A connection acquired through `ConnectionGuard` is released on every
//!   exit path, including early returns and propagated errors.
//! - Connections handed back by `release` are in auto-commit mode.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::mem::ManuallyDrop;
use std::ops::Deref;

mod open;

pub use open::SqliteSource;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The source could not provide a connection.
    SourceUnavailable(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::SourceUnavailable(message) => {
                write!(f, "connection source unavailable: {message}")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::SourceUnavailable(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Supplies live connections, one per request.
///
/// Implementations must return connections in auto-commit mode and accept
/// them back through `release` once the caller is done.
pub trait ConnectionSource: Send + Sync {
    fn acquire(&self) -> DbResult<rusqlite::Connection>;

    /// Takes back a connection obtained from `acquire`.
    ///
    /// The default implementation simply closes it.
    fn release(&self, conn: rusqlite::Connection) {
        drop(conn);
    }
}

/// Borrowed connection that returns to its source on drop.
pub struct ConnectionGuard<'s> {
    source: &'s dyn ConnectionSource,
    conn: ManuallyDrop<rusqlite::Connection>,
}

impl<'s> ConnectionGuard<'s> {
    pub fn acquire(source: &'s dyn ConnectionSource) -> DbResult<Self> {
        let conn = source.acquire()?;
        Ok(Self {
            source,
            conn: ManuallyDrop::new(conn),
        })
    }
}

impl Deref for ConnectionGuard<'_> {
    type Target = rusqlite::Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: `conn` is never touched again after this take.
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.source.release(conn);
    }
}
