//! Scoped units of work over the relational store.
//!
//! A `Session` owns one connection with an open transaction. It commits only
//! when told to; any other exit (error, early drop, panic unwinding) rolls
//! back, and dropping the session always releases the connection.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use rusqlite::Connection;

use super::{open_database, DatabaseError};
use crate::config::DbConfig;

// ═══════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════

pub struct Session {
    conn: Connection,
    finished: bool,
}

impl Session {
    /// Start a deferred transaction on `conn`.
    pub fn begin(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    /// Commit pending work and release the connection.
    pub fn commit(mut self) -> Result<(), DatabaseError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    /// Discard pending work and release the connection.
    pub fn rollback(mut self) -> Result<(), DatabaseError> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Deref for Session {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "Rollback of abandoned session failed");
            } else {
                tracing::debug!("Abandoned session rolled back");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Connection providers
// ═══════════════════════════════════════════════════════════

/// Source of connections for query functions.
///
/// Implementations hand out fresh connections; scoping (commit, rollback,
/// release) is handled by `Session`.
pub trait ConnectionProvider: Send + Sync {
    fn connect(&self) -> Result<Connection, DatabaseError>;

    /// Acquire a connection wrapped in an open session.
    fn session(&self) -> Result<Session, DatabaseError> {
        Session::begin(self.connect()?)
    }
}

/// Connections to a SQLite file, migrated on open.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    path: PathBuf,
}

impl SqliteProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConnectionProvider for SqliteProvider {
    fn connect(&self) -> Result<Connection, DatabaseError> {
        open_database(&self.path)
    }
}

static SHARED_PROVIDER: OnceLock<Arc<SqliteProvider>> = OnceLock::new();

/// Process-wide provider, initialised once from `EXTRACT_DB_PATH` on first use.
pub fn shared_provider() -> Arc<SqliteProvider> {
    SHARED_PROVIDER
        .get_or_init(|| {
            let config = crate::config::AppConfig::from_env();
            Arc::new(SqliteProvider::new(config.db.path))
        })
        .clone()
}

/// Provider for an explicit database location, sharing nothing.
pub fn provider_for(config: &DbConfig) -> Arc<SqliteProvider> {
    Arc::new(SqliteProvider::new(config.path.clone()))
}

/// Run `f` inside a session: commit on `Ok`, roll back on `Err`.
pub fn with_session<P, T, E, F>(provider: &P, f: F) -> Result<T, E>
where
    P: ConnectionProvider + ?Sized,
    E: From<DatabaseError>,
    F: FnOnce(&Session) -> Result<T, E>,
{
    let session = provider.session()?;
    match f(&session) {
        Ok(value) => {
            session.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = session.rollback() {
                tracing::warn!(error = %rollback_err, "Rollback after failed unit of work failed");
            }
            Err(e)
        }
    }
}
