//! Catalog table definitions

/// SQL to create the type registry
pub const CREATE_MASTER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _master (
    type TEXT NOT NULL,
    name TEXT NOT NULL,
    class_name TEXT NOT NULL
)
"#;

/// SQL to create the audit trail
/// `oid` is the affected row id, 0 when not applicable
pub const CREATE_AUDIT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _audit (
    rowid INTEGER PRIMARY KEY,
    timestamp TEXT NOT NULL DEFAULT (datetime('now')),
    oid INTEGER NOT NULL DEFAULT 0,
    table_name TEXT NOT NULL,
    undo_sql TEXT,
    new_sql TEXT NOT NULL,
    txn INTEGER NOT NULL DEFAULT 0
)
"#;

/// SQL to create the key sequence
pub const CREATE_SEQUENCE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _sequence (
    rowid INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    nextid INTEGER NOT NULL,
    nextval TEXT NOT NULL
)
"#;

/// SQL to create the system property table
pub const CREATE_SYSTEM_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _system (
    property TEXT PRIMARY KEY,
    value TEXT
)
"#;

/// SQL to create the user table
pub const CREATE_USER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _user (
    rowid INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    firstname TEXT,
    lastname TEXT,
    email TEXT,
    password TEXT NOT NULL
)
"#;

/// SQL to create catalog indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx__master_name ON _master(name)",
    "CREATE INDEX IF NOT EXISTS idx__audit_table ON _audit(table_name)",
];

/// Every catalog table, in creation order
pub const CATALOG_TABLES: &[&str] = &["_master", "_audit", "_sequence", "_system", "_user"];

/// Registry entry kinds
pub const KIND_TABLE: &str = "table";
pub const KIND_VIEW: &str = "view";

/// True for tables owned by the store itself
pub fn is_catalog_table(name: &str) -> bool {
    CATALOG_TABLES.iter().any(|t| t.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names() {
        assert!(is_catalog_table("_audit"));
        assert!(is_catalog_table("_USER"));
        assert!(!is_catalog_table("Person"));
    }

    #[test]
    fn test_catalog_ddl_runs() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        for ddl in [
            CREATE_MASTER_TABLE,
            CREATE_AUDIT_TABLE,
            CREATE_SEQUENCE_TABLE,
            CREATE_SYSTEM_TABLE,
            CREATE_USER_TABLE,
        ] {
            conn.execute(ddl, []).unwrap();
        }
        for index in CREATE_INDEXES {
            conn.execute(index, []).unwrap();
        }
        // idempotent
        conn.execute(CREATE_AUDIT_TABLE, []).unwrap();

        conn.execute("INSERT INTO _audit (table_name, new_sql) VALUES ('t', 'DROP TABLE t')", [])
            .unwrap();
        let stamp: String = conn
            .query_row("SELECT timestamp FROM _audit WHERE rowid = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stamp.len(), 19);
    }
}
