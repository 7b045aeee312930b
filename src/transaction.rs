//! Transactions - one connection, one `BEGIN IMMEDIATE`, audited changes
//!
//! ```text
//! Created --begin--> Active --commit--> Committed
//!                      |
//!                      +----rollback--> RolledBack
//! ```
//!
//! Every table, row and view operation requires `Active`. SQLite allows a
//! single writer, so `begin` fails with a retryable engine error while
//! another transaction holds the write lock.

use crate::record::{type_name, Record, View};
use crate::registry;
use crate::storage::schema::{KIND_TABLE, KIND_VIEW};
use crate::storage::{sql, Connection};
use crate::store::Shared;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Created,
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxState::Created => "created",
            TxState::Active => "active",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled back",
        };
        write!(f, "{}", s)
    }
}

pub struct Transaction {
    shared: Arc<Shared>,
    id: u64,
    state: TxState,
    conn: Option<Connection>,
}

impl Transaction {
    pub(crate) fn new(shared: Arc<Shared>, id: u64) -> Self {
        Self {
            shared,
            id,
            state: TxState::Created,
            conn: None,
        }
    }

    /// Process-local id, also written to every audit row of this transaction
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    fn active(&self) -> Result<&Connection> {
        match (&self.conn, self.state) {
            (Some(conn), TxState::Active) => Ok(conn),
            _ => Err(Error::State(format!("transaction {} is {}", self.id, self.state))),
        }
    }

    /// Take a connection and the write lock.
    ///
    /// On failure the connection is released and the transaction stays
    /// `Created`, so the caller may try again.
    pub fn begin(&mut self) -> Result<()> {
        if self.state != TxState::Created {
            return Err(Error::State(format!(
                "cannot begin transaction {}: it is {}",
                self.id, self.state
            )));
        }

        let conn = Connection::open(&self.shared.path, self.shared.settings.busy_timeout)?;
        if let Err(e) = conn.exec("BEGIN IMMEDIATE TRANSACTION") {
            conn.release();
            return Err(e);
        }

        self.conn = Some(conn);
        self.state = TxState::Active;
        tracing::debug!("transaction {} began", self.id);
        Ok(())
    }

    /// Commit and release the connection.
    ///
    /// A failed COMMIT leaves the transaction `Active`; the caller may
    /// retry the commit or roll back.
    pub fn commit(&mut self) -> Result<()> {
        self.active()?.exec("COMMIT")?;
        if let Some(conn) = self.conn.take() {
            conn.release();
        }
        self.state = TxState::Committed;
        tracing::info!("transaction {} committed", self.id);
        Ok(())
    }

    /// Roll back and release the connection. The connection is released
    /// even when ROLLBACK itself fails.
    pub fn rollback(&mut self) -> Result<()> {
        self.active()?;
        let result = match self.conn.take() {
            Some(conn) => {
                let result = conn.exec("ROLLBACK");
                conn.release();
                result
            }
            None => Ok(0),
        };
        self.state = TxState::RolledBack;
        tracing::info!("transaction {} rolled back", self.id);
        result.map(|_| ())
    }

    /// Create the table and index of `R` if missing, and register the type
    pub fn create_table<R: Record>(&mut self) -> Result<()> {
        let conn = self.active()?;
        let create = sql::create_table::<R>()?;
        let index = sql::create_index::<R>()?;

        conn.exec(&create)?;
        if let Some(index) = index {
            conn.exec(&index)?;
        }
        registry::register(conn, KIND_TABLE, R::table_name(), type_name::<R>())?;
        Ok(())
    }

    /// Drop the (empty) table of `R` and its index.
    ///
    /// Fails with [`Error::NotEmpty`] and issues nothing if any row remains.
    pub fn drop_table<R: Record>(&mut self) -> Result<()> {
        let conn = self.active()?;
        let table = R::table_name();
        let drop = sql::drop_table(table)?;
        let drop_index = sql::drop_index(table)?;

        if registry::table_exists(conn, table)? {
            let rows = conn.query_i64(&sql::count(table)?, [])?.unwrap_or(0);
            if rows > 0 {
                return Err(Error::NotEmpty(table.to_string()));
            }
        }

        self.shared.audit.record_drop(conn, self.id, table, &drop)?;
        conn.exec(&drop)?;
        conn.exec(&drop_index)?;
        registry::deregister(conn, table)?;
        tracing::info!("dropped table {}", table);
        Ok(())
    }

    pub fn create_view<V: View>(&mut self) -> Result<()> {
        let conn = self.active()?;
        let create = sql::create_view::<V>()?;
        conn.exec(&create)?;
        registry::register(conn, KIND_VIEW, V::view_name(), type_name::<V>())?;
        Ok(())
    }

    pub fn drop_view<V: View>(&mut self) -> Result<()> {
        let conn = self.active()?;
        let name = V::view_name();
        let drop = sql::drop_view(name)?;
        self.shared.audit.record_drop(conn, self.id, name, &drop)?;
        conn.exec(&drop)?;
        registry::deregister(conn, name)?;
        Ok(())
    }

    /// Insert a record and set its identity to the engine-assigned row id
    pub fn insert<R: Record>(&mut self, record: &mut R) -> Result<i64> {
        let conn = self.active()?;
        let stmt = sql::insert(record, self.shared.settings.quote_policy)?;
        conn.execute(&stmt)?;
        let identity = conn.last_insert_identity();
        record.set_identity(identity);
        Ok(identity)
    }

    fn row_exists<R: Record>(conn: &Connection, identity: i64) -> Result<bool> {
        let count = conn.query_i64(&sql::count_identity(R::table_name())?, [identity])?;
        Ok(count.unwrap_or(0) > 0)
    }

    /// Overwrite the row of `new` with its values, auditing `old` as the undo.
    ///
    /// `old` is the caller's snapshot of the row before the change. It is
    /// not compared against the stored row.
    pub fn update<R: Record>(&mut self, old: &R, new: &R) -> Result<()> {
        let conn = self.active()?;
        let table = R::table_name();
        let identity = match new.identity() {
            Some(id) if id > 0 => id,
            other => {
                return Err(Error::Update(format!("{} record has no valid row id: {:?}", table, other)));
            }
        };
        if let Some(old_id) = old.identity() {
            if old_id != identity {
                return Err(Error::Update(format!(
                    "snapshot of {}#{} does not match {}#{}",
                    table, old_id, table, identity
                )));
            }
        }
        let stmt = sql::update(new, identity, self.shared.settings.quote_policy)?;
        if !Self::row_exists::<R>(conn, identity)? {
            return Err(Error::Update(format!("no row {}#{}", table, identity)));
        }

        self.shared
            .audit
            .record_update(conn, self.id, identity, old, stmt.literal())?;
        conn.execute(&stmt)?;
        Ok(())
    }

    /// Delete the row of `old`, auditing an INSERT that restores it
    pub fn delete<R: Record>(&mut self, old: &R) -> Result<()> {
        let conn = self.active()?;
        let table = R::table_name();
        let identity = match old.identity() {
            Some(id) if id > 0 => id,
            other => {
                return Err(Error::Delete(format!("{} record has no valid row id: {:?}", table, other)));
            }
        };
        let stmt = sql::delete::<R>(identity, self.shared.settings.quote_policy)?;
        if !Self::row_exists::<R>(conn, identity)? {
            return Err(Error::Delete(format!("no row {}#{}", table, identity)));
        }

        self.shared
            .audit
            .record_delete(conn, self.id, identity, old, stmt.literal())?;
        conn.execute(&stmt)?;
        Ok(())
    }

    /// Allocate the next external key; persisted with this transaction
    pub fn next_key(&mut self) -> Result<String> {
        let conn = self.active()?;
        self.shared.sequence.next_key(conn)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            tracing::warn!("transaction {} dropped while active, rolling back", self.id);
            if let Err(e) = self.rollback() {
                tracing::warn!("rollback of transaction {} failed: {}", self.id, e);
            }
        }
    }
}
