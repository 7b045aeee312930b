//! Record key - the table plus row id locating one record
//!
//! Format: `<table>#<rowid>`
//!
//! Examples:
//! - `Person#1`
//! - `Ledger#42`

use crate::record::{check_identifier, Record};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row ids are unique within a table, so a key also names the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    /// Table the record lives in
    pub table: String,
    /// Engine-assigned row id
    pub identity: i64,
}

impl Key {
    pub fn new(table: impl Into<String>, identity: i64) -> Self {
        Self {
            table: table.into(),
            identity,
        }
    }

    /// Key of a persisted record, if it has an identity
    pub fn of<R: Record>(record: &R) -> Option<Self> {
        record.identity().map(|id| Self::new(R::table_name(), id))
    }

    /// Parse a key string
    ///
    /// Expected format: `<table>#<rowid>`
    pub fn parse(key: &str) -> Result<Self> {
        let (table, id_str) = key
            .rsplit_once('#')
            .ok_or_else(|| Error::Argument(format!("key must look like table#id: {}", key)))?;

        check_identifier("table", table).map_err(|_| Error::Argument(format!("invalid table in key: {}", key)))?;

        let identity: i64 = id_str
            .parse()
            .map_err(|_| Error::Argument(format!("invalid row id: {}", id_str)))?;
        if identity < 1 {
            return Err(Error::Argument(format!("row id must be positive: {}", identity)));
        }

        Ok(Self::new(table, identity))
    }

    /// Convert to key string
    pub fn to_key_string(&self) -> String {
        format!("{}#{}", self.table, self.identity)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key_string())
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_key_string())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Key::parse(&s).map_err(serde::de::Error::custom)
    }
}
