//! Type mapper - field kinds, SQL column types and value renderings
//!
//! Every storable field has a [`FieldKind`]. A kind fixes three things:
//! - the declared column type used in `CREATE TABLE`
//! - the literal form written into audit text
//! - the bound value handed to SQLite when a statement actually runs

use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Character substituted for a single quote inside text literals
/// under [`QuotePolicy::Placeholder`].
pub const QUOTE_PLACEHOLDER: char = '`';

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// How single quotes inside text values are rendered in literal SQL.
///
/// `Placeholder` swaps each `'` for a backtick. It keeps audit text
/// compatible with existing trails but is not real escaping: a restored
/// value comes back with backticks where the quotes were. `Double` uses
/// standard SQL `''` escaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotePolicy {
    #[default]
    Placeholder,
    Double,
}

impl QuotePolicy {
    /// Quote a text value for literal SQL
    pub fn quote(&self, text: &str) -> String {
        let body = match self {
            QuotePolicy::Placeholder => text.replace('\'', &QUOTE_PLACEHOLDER.to_string()),
            QuotePolicy::Double => text.replace('\'', "''"),
        };
        format!("'{}'", body)
    }
}

/// The storable kinds of field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Integer,
    Real,
    Boolean,
    /// Calendar date, `YYYY-MM-DD`
    Date,
    /// Calendar month, `YYYY-MM`
    Month,
    /// Arbitrary precision decimal, for money
    Decimal,
    /// Date and time of day
    Timestamp,
}

impl FieldKind {
    /// Declared column type for `CREATE TABLE`
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldKind::Text => "TEXT",
            FieldKind::Integer => "INTEGER",
            FieldKind::Real => "REAL",
            FieldKind::Boolean => "BOOLEAN",
            FieldKind::Date => "NaiveDate",
            FieldKind::Month => "YearMonth",
            FieldKind::Decimal => "Decimal",
            FieldKind::Timestamp => "NaiveDateTime",
        }
    }

    /// Convert a raw column value into a field value of this kind.
    ///
    /// Accepts every storage class SQLite may hand back for a column
    /// declared with [`FieldKind::sql_type`].
    pub fn decode(&self, raw: SqlValue) -> Result<FieldValue> {
        if matches!(raw, SqlValue::Null) {
            return Ok(FieldValue::Null);
        }
        let mismatch = |raw: &SqlValue| {
            Error::Schema(format!("cannot read {:?} as {}", raw.data_type(), self.sql_type()))
        };

        let value = match (self, &raw) {
            (FieldKind::Text, SqlValue::Text(s)) => FieldValue::Text(s.clone()),
            (FieldKind::Text, SqlValue::Integer(i)) => FieldValue::Text(i.to_string()),
            (FieldKind::Text, SqlValue::Real(f)) => FieldValue::Text(f.to_string()),

            (FieldKind::Integer, SqlValue::Integer(i)) => FieldValue::Integer(*i),
            (FieldKind::Integer, SqlValue::Real(f)) if f.fract() == 0.0 => FieldValue::Integer(*f as i64),
            (FieldKind::Integer, SqlValue::Text(s)) => {
                FieldValue::Integer(s.trim().parse().map_err(|_| mismatch(&raw))?)
            }

            (FieldKind::Real, SqlValue::Real(f)) => FieldValue::Real(*f),
            (FieldKind::Real, SqlValue::Integer(i)) => FieldValue::Real(*i as f64),
            (FieldKind::Real, SqlValue::Text(s)) => {
                FieldValue::Real(s.trim().parse().map_err(|_| mismatch(&raw))?)
            }

            (FieldKind::Boolean, SqlValue::Text(s)) => {
                let s = s.trim();
                FieldValue::Boolean(s.eq_ignore_ascii_case("true") || s == "1")
            }
            (FieldKind::Boolean, SqlValue::Integer(i)) => FieldValue::Boolean(*i == 1),

            (FieldKind::Date, SqlValue::Text(s)) => FieldValue::Date(
                NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).map_err(|_| mismatch(&raw))?,
            ),
            (FieldKind::Month, SqlValue::Text(s)) => {
                FieldValue::Month(s.parse().map_err(|_: Error| mismatch(&raw))?)
            }

            (FieldKind::Decimal, SqlValue::Integer(i)) => FieldValue::Decimal(Decimal::from(*i)),
            (FieldKind::Decimal, SqlValue::Real(f)) => FieldValue::Decimal(
                Decimal::from_str(&f.to_string()).map_err(|_| mismatch(&raw))?,
            ),
            (FieldKind::Decimal, SqlValue::Text(s)) => FieldValue::Decimal(
                Decimal::from_str(s.trim()).map_err(|_| mismatch(&raw))?,
            ),

            (FieldKind::Timestamp, SqlValue::Text(s)) => FieldValue::Timestamp(
                NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT)
                    .map_err(|_| mismatch(&raw))?,
            ),

            _ => return Err(mismatch(&raw)),
        };
        Ok(value)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_type())
    }
}

/// A calendar month, stored as `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::Argument(format!("month out of range: {}", month)));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Accepts `YYYY-MM` and `YYYY-MM-DD` (the day is ignored)
impl FromStr for YearMonth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Argument(format!("invalid month: {}", s));
        let mut parts = s.trim().split('-');
        let year = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let month = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        YearMonth::new(year, month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A field value in transit between a record and SQLite
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Date(NaiveDate),
    Month(YearMonth),
    Decimal(Decimal),
    Timestamp(NaiveDateTime),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Render as a SQL literal, for audit text
    pub fn to_literal(&self, policy: QuotePolicy) -> String {
        match self {
            FieldValue::Null => "NULL".to_string(),
            FieldValue::Text(s) => policy.quote(s),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Real(f) if f.is_finite() => format!("{:?}", f),
            FieldValue::Real(_) => "NULL".to_string(),
            FieldValue::Boolean(b) => format!("'{}'", b),
            FieldValue::Date(d) => format!("'{}'", d.format(DATE_FORMAT)),
            FieldValue::Month(m) => format!("'{}'", m),
            FieldValue::Decimal(d) => d.to_string(),
            FieldValue::Timestamp(t) => format!("'{}'", t),
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            FieldValue::Null => SqlValue::Null,
            FieldValue::Text(s) => return Ok(ToSqlOutput::from(s.as_str())),
            FieldValue::Integer(i) => SqlValue::Integer(*i),
            FieldValue::Real(f) if f.is_finite() => SqlValue::Real(*f),
            FieldValue::Real(_) => SqlValue::Null,
            FieldValue::Boolean(b) => SqlValue::Text(b.to_string()),
            FieldValue::Date(d) => SqlValue::Text(d.format(DATE_FORMAT).to_string()),
            FieldValue::Month(m) => SqlValue::Text(m.to_string()),
            // Bound as text so NUMERIC affinity converts it exactly like the literal
            FieldValue::Decimal(d) => SqlValue::Text(d.to_string()),
            FieldValue::Timestamp(t) => SqlValue::Text(t.to_string()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

/// A Rust type that can back a record field.
///
/// `Option<T>` of any implementor is the nullable form of `T`.
pub trait FieldType: Sized {
    const KIND: FieldKind;
    const NULLABLE: bool = false;

    fn to_value(&self) -> FieldValue;
    fn from_value(value: FieldValue) -> Result<Self>;
}

fn unexpected(kind: FieldKind, value: &FieldValue) -> Error {
    Error::Schema(format!("expected {} value, got {:?}", kind, value))
}

macro_rules! field_type {
    ($ty:ty, $kind:ident, $variant:ident, |$v:ident| $to:expr, |$f:ident| $from:expr) => {
        impl FieldType for $ty {
            const KIND: FieldKind = FieldKind::$kind;

            fn to_value(&self) -> FieldValue {
                let $v = self;
                FieldValue::$variant($to)
            }

            fn from_value(value: FieldValue) -> Result<Self> {
                match value {
                    FieldValue::$variant($f) => Ok($from),
                    other => Err(unexpected(Self::KIND, &other)),
                }
            }
        }
    };
}

field_type!(String, Text, Text, |v| v.clone(), |s| s);
field_type!(i64, Integer, Integer, |v| *v, |i| i);
field_type!(f64, Real, Real, |v| *v, |f| f);
field_type!(f32, Real, Real, |v| f64::from(*v), |f| f as f32);
field_type!(bool, Boolean, Boolean, |v| *v, |b| b);
field_type!(NaiveDate, Date, Date, |v| *v, |d| d);
field_type!(YearMonth, Month, Month, |v| *v, |m| m);
field_type!(Decimal, Decimal, Decimal, |v| *v, |d| d);
field_type!(NaiveDateTime, Timestamp, Timestamp, |v| *v, |t| t);

impl FieldType for i32 {
    const KIND: FieldKind = FieldKind::Integer;

    fn to_value(&self) -> FieldValue {
        FieldValue::Integer(i64::from(*self))
    }

    fn from_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Integer(i) => i32::try_from(i)
                .map_err(|_| Error::Schema(format!("integer {} does not fit in i32", i))),
            other => Err(unexpected(Self::KIND, &other)),
        }
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const KIND: FieldKind = T::KIND;
    const NULLABLE: bool = true;

    fn to_value(&self) -> FieldValue {
        match self {
            Some(v) => v.to_value(),
            None => FieldValue::Null,
        }
    }

    fn from_value(value: FieldValue) -> Result<Self> {
        match value {
            FieldValue::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
