//! Audit trail - append-only undo/redo statement pairs
//!
//! Each destructive change is preceded, in the same transaction, by a row
//! in `_audit` holding the literal text of the change and the literal text
//! that reverses it. Replaying `undo_sql` restores the prior row.

use crate::record::Record;
use crate::storage::{sql, Connection};
use crate::types::QuotePolicy;
use crate::{Error, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

const AUDIT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const INSERT_AUDIT: &str =
    "INSERT INTO _audit (oid, table_name, undo_sql, new_sql, txn) VALUES (?1, ?2, ?3, ?4, ?5)";

/// One row of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    /// Row id the change applied to, 0 for drops
    pub identity: i64,
    pub table: String,
    /// Statement reversing the change, absent for drops
    pub undo_sql: Option<String>,
    pub new_sql: String,
    /// Local id of the transaction that made the change
    pub txn: u64,
}

/// Writes audit rows; one per store
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditLog {
    policy: QuotePolicy,
}

fn expect_prefix(statement: &str, keyword: &str) -> Result<()> {
    let head = statement.trim_start();
    let matches = head
        .get(..keyword.len())
        .is_some_and(|h| h.eq_ignore_ascii_case(keyword));
    if !matches {
        return Err(Error::Argument(format!("audit text must be a {} statement: {}", keyword, statement)));
    }
    Ok(())
}

impl AuditLog {
    pub fn new(policy: QuotePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> QuotePolicy {
        self.policy
    }

    fn append(
        &self,
        conn: &Connection,
        txn: u64,
        identity: i64,
        table: &str,
        undo_sql: Option<&str>,
        new_sql: &str,
    ) -> Result<i64> {
        let txn_id = txn as i64;
        conn.exec_with(
            INSERT_AUDIT,
            rusqlite::params![identity, table, undo_sql, new_sql, txn_id],
        )?;
        let id = conn.last_insert_identity();
        tracing::debug!("audit #{} on {} (txn {})", id, table, txn);
        Ok(id)
    }

    /// Record a table, index or view drop. There is nothing to undo.
    pub fn record_drop(&self, conn: &Connection, txn: u64, table: &str, drop_sql: &str) -> Result<i64> {
        expect_prefix(drop_sql, "DROP")?;
        self.append(conn, txn, 0, table, None, drop_sql)
    }

    /// Record an update of row `identity`, with an UPDATE restoring `old` as undo
    pub fn record_update<R: Record>(
        &self,
        conn: &Connection,
        txn: u64,
        identity: i64,
        old: &R,
        update_sql: &str,
    ) -> Result<i64> {
        expect_prefix(update_sql, "UPDATE")?;
        let undo = sql::update(old, identity, self.policy)?;
        self.append(conn, txn, identity, R::table_name(), Some(undo.literal()), update_sql)
    }

    /// Record a delete of row `identity`, with an INSERT restoring `old` as undo
    pub fn record_delete<R: Record>(
        &self,
        conn: &Connection,
        txn: u64,
        identity: i64,
        old: &R,
        delete_sql: &str,
    ) -> Result<i64> {
        expect_prefix(delete_sql, "DELETE")?;
        let undo = sql::restore_insert(old, identity, self.policy)?;
        self.append(conn, txn, identity, R::table_name(), Some(undo.literal()), delete_sql)
    }
}

type RawEntry = (i64, String, i64, String, Option<String>, String, i64);

fn raw_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

/// Read the trail back in order, optionally for one table only
pub fn entries(conn: &Connection, table: Option<&str>) -> Result<Vec<AuditEntry>> {
    let base = "SELECT rowid, timestamp, oid, table_name, undo_sql, new_sql, txn FROM _audit";
    let sql = match table {
        Some(_) => format!("{} WHERE table_name = ?1 ORDER BY rowid", base),
        None => format!("{} ORDER BY rowid", base),
    };
    tracing::debug!("[#{}] {}", conn.id(), sql);

    let mut stmt = conn.raw().prepare(&sql)?;
    let rows = match table {
        Some(t) => stmt.query_map([t], raw_entry)?.collect::<std::result::Result<Vec<_>, _>>()?,
        None => stmt.query_map([], raw_entry)?.collect::<std::result::Result<Vec<_>, _>>()?,
    };

    rows.into_iter()
        .map(|(id, stamp, identity, table, undo_sql, new_sql, txn)| {
            let timestamp = NaiveDateTime::parse_from_str(&stamp, AUDIT_TIMESTAMP_FORMAT)
                .map_err(|e| Error::Schema(format!("audit #{} has bad timestamp {:?}: {}", id, stamp, e)))?;
            Ok(AuditEntry {
                id,
                timestamp,
                identity,
                table,
                undo_sql,
                new_sql,
                txn: txn as u64,
            })
        })
        .collect()
}
