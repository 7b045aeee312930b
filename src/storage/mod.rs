//! Storage Layer - SQLite access
//!
//! Catalog tables kept next to the application's own:
//! - _master(type, name, class_name)
//! - _audit(timestamp, oid, table_name, undo_sql, new_sql, txn)
//! - _sequence(name, nextid, nextval)
//! - _system(property, value)
//! - _user(username, firstname, lastname, email, password)

pub mod engine;
pub mod schema;
pub mod sql;

pub use engine::Connection;
pub use sql::SqlStatement;
