//! Row materializer - forward-only cursors over SELECT results
//!
//! A cursor only exists inside the closure handed to one of the
//! `DataStore` query methods. Its connection and prepared statement are
//! released when that closure returns, whatever it returns.

use crate::record::{Model, IDENTITY_COLUMN};
use crate::storage::Connection;
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;

/// Forward-only, single-pass view over the rows of one query
pub struct Cursor<'stmt, M> {
    rows: rusqlite::Rows<'stmt>,
    columns: Vec<String>,
    current: Option<Vec<SqlValue>>,
    _model: PhantomData<fn() -> M>,
}

impl<'stmt, M: Model> Cursor<'stmt, M> {
    fn new(rows: rusqlite::Rows<'stmt>, columns: Vec<String>) -> Self {
        Self {
            rows,
            columns,
            current: None,
            _model: PhantomData,
        }
    }

    /// Column names of the result set
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Advance to the next row and fetch it.
    ///
    /// Not a peek: each call consumes a row.
    pub fn has_next(&mut self) -> Result<bool> {
        match self.rows.next()? {
            Some(row) => {
                let values = (0..self.columns.len())
                    .map(|i| row.get::<_, SqlValue>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                self.current = Some(values);
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    /// Build a model from the row fetched by the last [`Cursor::has_next`]
    pub fn next(&mut self) -> Result<M> {
        let values = self
            .current
            .take()
            .ok_or_else(|| Error::State("next() called without a fetched row".to_string()))?;
        hydrate(&self.columns, values)
    }

    /// Drain the remaining rows
    pub fn collect_all(&mut self) -> Result<Vec<M>> {
        let mut out = Vec::new();
        while self.has_next()? {
            out.push(self.next()?);
        }
        Ok(out)
    }
}

/// Fill a default model from one row
pub(crate) fn hydrate<M: Model>(columns: &[String], values: Vec<SqlValue>) -> Result<M> {
    let schema = M::schema();
    let mut model = M::default();

    for (column, raw) in columns.iter().zip(values) {
        if column.eq_ignore_ascii_case(IDENTITY_COLUMN) {
            if let SqlValue::Integer(id) = raw {
                model.set_identity(id);
            }
            continue;
        }

        let field = schema
            .field(column)
            .ok_or_else(|| Error::Schema(format!("no field for column {}", column)))?;
        if matches!(raw, SqlValue::Null) {
            continue;
        }
        let value = field.kind().decode(raw).map_err(|e| match e {
            Error::Schema(msg) => Error::Schema(format!("column {}: {}", column, msg)),
            other => other,
        })?;
        field.set(&mut model, value)?;
    }
    Ok(model)
}

/// Open a connection, run `sql` and hand a cursor over its rows to `f`.
///
/// The statement is finalized and the connection released on every path.
pub(crate) fn scoped<M, T, P>(
    path: &Path,
    busy_timeout: Duration,
    sql: &str,
    params: P,
    f: impl FnOnce(&mut Cursor<'_, M>) -> Result<T>,
) -> Result<T>
where
    M: Model,
    P: rusqlite::Params,
{
    let conn = Connection::open(path, busy_timeout)?;
    let result = run(&conn, sql, params, f);
    conn.release();
    result
}

fn run<M, T, P>(
    conn: &Connection,
    sql: &str,
    params: P,
    f: impl FnOnce(&mut Cursor<'_, M>) -> Result<T>,
) -> Result<T>
where
    M: Model,
    P: rusqlite::Params,
{
    tracing::debug!("[#{}] {}", conn.id(), sql);
    let mut stmt = conn.raw().prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let result = {
        let rows = stmt.query(params)?;
        let mut cursor = Cursor::new(rows, columns);
        f(&mut cursor)
    };

    if let Err(e) = stmt.finalize() {
        tracing::warn!("error finalizing cursor statement: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Ledger, Person};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_hydrate_person() {
        let p: Person = hydrate(
            &cols(&["rowid", "firstname", "LastName", "age"]),
            vec![
                SqlValue::Integer(4),
                SqlValue::Text("Ada".into()),
                SqlValue::Text("Lovelace".into()),
                SqlValue::Integer(36),
            ],
        )
        .unwrap();
        assert_eq!(p.rowid, Some(4));
        assert_eq!(p.lastname, "Lovelace");
        assert_eq!(p.age, 36);
    }

    #[test]
    fn test_hydrate_nulls_and_kinds() {
        let l: Ledger = hydrate(
            &cols(&["memo", "note", "posted", "date", "amount"]),
            vec![
                SqlValue::Null,
                SqlValue::Null,
                SqlValue::Text("true".into()),
                SqlValue::Text("2017-01-01".into()),
                SqlValue::Real(12.5),
            ],
        )
        .unwrap();
        assert_eq!(l.memo, "");
        assert_eq!(l.note, None);
        assert!(l.posted);
        assert_eq!(l.date, NaiveDate::from_ymd_opt(2017, 1, 1));
        assert_eq!(l.amount, Some(Decimal::from_str("12.5").unwrap()));
    }

    #[test]
    fn test_hydrate_errors() {
        let unknown = hydrate::<Person>(&cols(&["nickname"]), vec![SqlValue::Text("x".into())]);
        assert!(matches!(unknown, Err(Error::Schema(_))));

        let bad = hydrate::<Person>(&cols(&["age"]), vec![SqlValue::Text("old".into())]);
        assert!(matches!(bad, Err(Error::Schema(msg)) if msg.contains("age")));
    }

    #[test]
    fn test_scoped_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.db");
        let conn = Connection::open(&path, Duration::ZERO).unwrap();
        conn.exec("CREATE TABLE Person (rowid INTEGER PRIMARY KEY, firstname TEXT, lastname TEXT, age INTEGER)")
            .unwrap();
        conn.exec("INSERT INTO Person (firstname, lastname, age) VALUES ('Ada', 'Lovelace', 36), ('Alan', 'Turing', 41)")
            .unwrap();
        conn.release();

        let people = scoped::<Person, _, _>(&path, Duration::ZERO, "SELECT * FROM Person ORDER BY age", [], |c| {
            assert!(matches!(c.next(), Err(Error::State(_))));
            assert!(c.has_next()?);
            let first = c.next()?;
            // a row is handed out once
            assert!(matches!(c.next(), Err(Error::State(_))));
            let mut rest = c.collect_all()?;
            rest.insert(0, first);
            Ok(rest)
        })
        .unwrap();
        assert_eq!(people.len(), 2);
        assert_eq!(people[0].firstname, "Ada");
        assert_eq!(people[1].rowid, Some(2));

        let err = scoped::<Person, (), _>(&path, Duration::ZERO, "SELECT * FROM Missing", [], |_| Ok(()));
        assert!(matches!(err, Err(Error::Engine { .. })));
    }
}
