//! Key sequence - durable, monotonic, radix-8 external keys
//!
//! The state lives in the `_key` row of `_sequence` and is mirrored in
//! memory. Every allocation re-reads the row under the caller's write lock,
//! issues the larger of the row and the in-memory id, and persists the
//! successor inside the caller's transaction. Stores sharing a file see each
//! other's committed keys, and a rollback never rewinds the in-memory id.
//!
//! A rolled-back allocation is not durable: once the process restarts, keys
//! issued only inside rolled-back transactions may be issued again.

use crate::storage::schema::CREATE_SEQUENCE_TABLE;
use crate::storage::Connection;
use crate::{Error, Result};
use parking_lot::Mutex;

/// Name of the sequence row
pub const SEQUENCE_NAME: &str = "_key";

#[derive(Debug, Clone, PartialEq, Eq)]
struct SequenceState {
    next_id: i64,
    next_key: String,
}

impl SequenceState {
    fn successor(&self) -> Self {
        let next_id = self.next_id + 1;
        Self {
            next_id,
            next_key: to_radix8(next_id),
        }
    }
}

/// Radix-8 text of a positive id
pub fn to_radix8(id: i64) -> String {
    format!("{:o}", id)
}

/// One per store, shared by every transaction
pub struct Sequence {
    state: Mutex<Option<SequenceState>>,
}

impl Sequence {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// Create the sequence table if needed and load the persisted state.
    ///
    /// Must run inside an active transaction on `conn`.
    pub fn init(&self, conn: &Connection) -> Result<()> {
        conn.exec(CREATE_SEQUENCE_TABLE)?;

        let mut state = self.state.lock();
        let next_id = conn.query_i64(
            "SELECT nextid FROM _sequence WHERE name = ?1",
            [SEQUENCE_NAME],
        )?;

        let loaded = match next_id {
            Some(id) if id < 1 => {
                return Err(Error::Config(format!("sequence {} holds invalid id {}", SEQUENCE_NAME, id)));
            }
            Some(id) => SequenceState {
                next_id: id,
                next_key: to_radix8(id),
            },
            None => {
                let first = SequenceState {
                    next_id: 1,
                    next_key: to_radix8(1),
                };
                conn.exec_with(
                    "INSERT INTO _sequence (name, nextid, nextval) VALUES (?1, ?2, ?3)",
                    rusqlite::params![SEQUENCE_NAME, first.next_id, first.next_key],
                )?;
                tracing::info!("key sequence started at {}", first.next_key);
                first
            }
        };

        tracing::debug!("key sequence at {} ({})", loaded.next_key, loaded.next_id);
        *state = Some(loaded);
        Ok(())
    }

    /// Allocate the next key.
    ///
    /// `conn` must hold an active write transaction. Memory moves on only
    /// after the successor was persisted.
    pub fn next_key(&self, conn: &Connection) -> Result<String> {
        let mut guard = self.state.lock();
        let in_memory = guard
            .as_ref()
            .ok_or_else(|| Error::State("key sequence not initialized".to_string()))?
            .next_id;

        let persisted = conn
            .query_i64("SELECT nextid FROM _sequence WHERE name = ?1", [SEQUENCE_NAME])?
            .ok_or_else(|| Error::Config(format!("sequence row {} is missing", SEQUENCE_NAME)))?;
        if persisted < 1 {
            return Err(Error::Config(format!(
                "sequence {} holds invalid id {}",
                SEQUENCE_NAME, persisted
            )));
        }

        let next_id = in_memory.max(persisted);
        let current = SequenceState {
            next_id,
            next_key: to_radix8(next_id),
        };
        let key = current.next_key.clone();
        let successor = current.successor();

        let updated = conn.exec_with(
            "UPDATE _sequence SET nextid = ?1, nextval = ?2 WHERE name = ?3",
            rusqlite::params![successor.next_id, successor.next_key, SEQUENCE_NAME],
        )?;
        if updated != 1 {
            return Err(Error::Config(format!("sequence row {} is missing", SEQUENCE_NAME)));
        }

        *guard = Some(successor);
        tracing::debug!("issued key {}", key);
        Ok(key)
    }

    /// The key the next allocation will return, if initialized
    pub fn peek(&self) -> Option<String> {
        self.state.lock().as_ref().map(|s| s.next_key.clone())
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}
