//! Execution port - the minimal command set used against SQLite

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use rusqlite::OptionalExtension;
use crate::Result;
use super::sql::SqlStatement;

static CONNECTION_IDS: AtomicU64 = AtomicU64::new(0);

/// One dedicated SQLite connection.
///
/// Owned by exactly one transaction, cursor or kernel operation for its
/// whole life, then handed back with [`Connection::release`].
pub struct Connection {
    conn: rusqlite::Connection,
    id: u64,
    path: PathBuf,
}

impl Connection {
    /// Open a database file (creates if doesn't exist).
    ///
    /// `busy_timeout` replaces rusqlite's default busy handler; with a zero
    /// timeout a locked database fails straight away with SQLITE_BUSY.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let id = CONNECTION_IDS.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!("connection #{} opened on {}", id, path.display());
        Ok(Self {
            conn,
            id,
            path: path.to_path_buf(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run one statement with no parameters, returning the rows affected
    pub fn exec(&self, sql: &str) -> Result<usize> {
        tracing::debug!("[#{}] {}", self.id, sql);
        Ok(self.conn.execute(sql, [])?)
    }

    /// Run one statement with bound parameters
    pub fn exec_with(&self, sql: &str, params: impl rusqlite::Params) -> Result<usize> {
        tracing::debug!("[#{}] {}", self.id, sql);
        Ok(self.conn.execute(sql, params)?)
    }

    /// Run the parameterized rendering of a generated statement
    pub fn execute(&self, stmt: &SqlStatement) -> Result<usize> {
        tracing::debug!("[#{}] {}", self.id, stmt.literal());
        let params = rusqlite::params_from_iter(stmt.params().iter());
        Ok(self.conn.execute(stmt.sql(), params)?)
    }

    /// Run a query expected to yield a single integer, such as a count
    pub fn query_i64(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<i64>> {
        tracing::debug!("[#{}] {}", self.id, sql);
        Ok(self.conn.query_row(sql, params, |row| row.get(0)).optional()?)
    }

    /// Run a query expected to yield a single text column
    pub fn query_text(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<String>> {
        tracing::debug!("[#{}] {}", self.id, sql);
        Ok(self
            .conn
            .query_row(sql, params, |row| row.get::<_, Option<String>>(0))
            .optional()?
            .flatten())
    }

    /// Row id assigned by the most recent successful INSERT
    pub fn last_insert_identity(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Rows changed by the most recent statement
    pub fn changes(&self) -> u64 {
        self.conn.changes()
    }

    /// The underlying rusqlite handle, for preparing cursors
    pub(crate) fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }

    /// Close the connection. Failures are reported, not raised.
    pub fn release(self) {
        let id = self.id;
        match self.conn.close() {
            Ok(()) => tracing::debug!("connection #{} closed", id),
            Err((_conn, e)) => tracing::warn!("error closing connection #{}: {}", id, e),
        }
    }
}

/// SQLite library version number, e.g. 3046000
pub fn lib_version_number() -> i32 {
    rusqlite::version_number()
}
