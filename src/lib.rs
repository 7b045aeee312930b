//! # Vellum - Transactional record store with an audit trail
//!
//! Typed records on top of SQLite, with every change accounted for.
//!
//! Vellum provides:
//! - Table and view lifecycle driven by per-type field accessor tables
//! - Explicit transactions matching SQLite's single-writer locking model
//! - An append-only audit trail whose undo statements restore prior rows
//! - A durable, monotonic radix-8 key sequence
//! - A small (and deliberately weak) credential kernel
//! - Forward-only cursors that hydrate rows back into records

pub mod types;
pub mod record;
pub mod key;
pub mod storage;
pub mod sequence;
pub mod audit;
pub mod kernel;
pub mod transaction;
pub mod cursor;
pub mod registry;
pub mod store;
pub mod config;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use types::{FieldKind, FieldType, FieldValue, QuotePolicy, YearMonth};
pub use record::{Model, Record, Schema, View};
pub use key::Key;
pub use audit::AuditEntry;
pub use kernel::{Credentials, Kernel, PublicModulus};
pub use transaction::{Transaction, TxState};
pub use cursor::Cursor;
pub use registry::RegistryEntry;
pub use store::{DataStore, StoreSettings};

/// Result type alias for Vellum operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Vellum operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Pass-through failure from SQLite. `code` is the primary result code.
    #[error("Engine error (code {code}): {message}")]
    Engine { code: i32, message: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Table {0} is not empty")]
    NotEmpty(String),

    #[error("Update error: {0}")]
    Update(String),

    #[error("Delete error: {0}")]
    Delete(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The engine result code, if this error came from SQLite
    pub fn engine_code(&self) -> Option<i32> {
        match self {
            Error::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for BUSY and LOCKED. The caller decides whether and when to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.engine_code(),
            Some(rusqlite::ffi::SQLITE_BUSY) | Some(rusqlite::ffi::SQLITE_LOCKED)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(failure, _) => failure.extended_code & 0xff,
            _ => rusqlite::ffi::SQLITE_ERROR,
        };
        Error::Engine {
            code,
            message: err.to_string(),
        }
    }
}
