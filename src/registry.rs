//! Type registry - which record or view type owns each table
//!
//! SQLite's own `sqlite_master` cannot carry the Rust type of a table, so
//! `_master` keeps `(type, name, class_name)` alongside it.

use crate::storage::Connection;
use crate::Result;
use serde::Serialize;

/// One registered table or view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    /// `table` or `view`
    pub kind: String,
    pub name: String,
    pub class_name: String,
}

/// Register `name` unless already present. Returns true if a row was added.
pub(crate) fn register(conn: &Connection, kind: &str, name: &str, class_name: &str) -> Result<bool> {
    let existing = conn.query_i64("SELECT COUNT(*) FROM _master WHERE name = ?1", [name])?;
    if existing.unwrap_or(0) > 0 {
        return Ok(false);
    }
    conn.exec_with(
        "INSERT INTO _master (type, name, class_name) VALUES (?1, ?2, ?3)",
        [kind, name, class_name],
    )?;
    tracing::debug!("registered {} {} as {}", kind, name, class_name);
    Ok(true)
}

pub(crate) fn deregister(conn: &Connection, name: &str) -> Result<usize> {
    conn.exec_with("DELETE FROM _master WHERE name = ?1", [name])
}

/// Registered type name of a table or view
pub(crate) fn class_of(conn: &Connection, name: &str) -> Result<Option<String>> {
    conn.query_text("SELECT class_name FROM _master WHERE name = ?1", [name])
}

/// All registrations, in registration order
pub(crate) fn entries(conn: &Connection) -> Result<Vec<RegistryEntry>> {
    let mut stmt = conn
        .raw()
        .prepare("SELECT type, name, class_name FROM _master ORDER BY rowid")?;
    let entries = stmt
        .query_map([], |row| {
            Ok(RegistryEntry {
                kind: row.get(0)?,
                name: row.get(1)?,
                class_name: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// True if the engine has a table of this name
pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count = conn.query_i64(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
    )?;
    Ok(count.unwrap_or(0) > 0)
}

/// Every table the engine knows, by name
pub(crate) fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .raw()
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}
