//! SQL generator
//!
//! Statements that carry record values are built twice in lock step: a
//! parameterized form (`?1..?n`) that is executed, and a literal form
//! with the values interpolated, which only ever goes into audit text.

use crate::record::{check_identifier, Record, View, IDENTITY_COLUMN};
use crate::storage::schema::is_catalog_table;
use crate::types::{FieldValue, QuotePolicy};
use crate::{Error, Result};

/// One generated statement in both renderings
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    sql: String,
    params: Vec<FieldValue>,
    literal: String,
}

impl SqlStatement {
    /// Parameterized SQL, as executed
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Values bound to `?1..?n`, in order
    pub fn params(&self) -> &[FieldValue] {
        &self.params
    }

    /// Literal SQL with values interpolated, for the audit trail
    pub fn literal(&self) -> &str {
        &self.literal
    }
}

/// Builds both renderings side by side
struct StatementBuilder {
    sql: String,
    literal: String,
    params: Vec<FieldValue>,
    policy: QuotePolicy,
}

impl StatementBuilder {
    fn new(policy: QuotePolicy) -> Self {
        Self {
            sql: String::new(),
            literal: String::new(),
            params: Vec::new(),
            policy,
        }
    }

    fn text(&mut self, s: &str) -> &mut Self {
        self.sql.push_str(s);
        self.literal.push_str(s);
        self
    }

    fn value(&mut self, value: FieldValue) -> &mut Self {
        self.literal.push_str(&value.to_literal(self.policy));
        self.params.push(value);
        self.sql.push_str(&format!("?{}", self.params.len()));
        self
    }

    fn values(&mut self, values: Vec<FieldValue>) -> &mut Self {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.text(",");
            }
            self.value(value);
        }
        self
    }

    fn build(&mut self) -> SqlStatement {
        SqlStatement {
            sql: std::mem::take(&mut self.sql),
            params: std::mem::take(&mut self.params),
            literal: std::mem::take(&mut self.literal),
        }
    }
}

/// Name of the secondary index of a table
pub fn index_name(table: &str) -> String {
    format!("idx_{}", table)
}

/// A valid identifier that does not name a catalog table
fn check_user_object(what: &str, name: &str) -> Result<()> {
    check_identifier(what, name)?;
    if is_catalog_table(name) {
        return Err(Error::Schema(format!("{} {} is reserved by the store", what, name)));
    }
    Ok(())
}

fn checked_table<R: Record>() -> Result<&'static str> {
    let table = R::table_name();
    check_user_object("table", table)?;
    R::schema().validate()?;
    Ok(table)
}

fn require_identity(identity: i64, fail: fn(String) -> Error, table: &str) -> Result<()> {
    if identity < 1 {
        return Err(fail(format!("{} row id must be positive, got {}", table, identity)));
    }
    Ok(())
}

/// `CREATE TABLE IF NOT EXISTS` with columns in declared order
pub fn create_table<R: Record>() -> Result<String> {
    let table = checked_table::<R>()?;
    let columns: Vec<String> = R::schema()
        .fields()
        .iter()
        .map(|f| format!("{} {}", f.name(), f.kind().sql_type()))
        .collect();
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({} INTEGER PRIMARY KEY, {})",
        table,
        IDENTITY_COLUMN,
        columns.join(", ")
    ))
}

/// `CREATE INDEX IF NOT EXISTS` over the index spec, if the record has one
pub fn create_index<R: Record>() -> Result<Option<String>> {
    let table = checked_table::<R>()?;
    let Some(spec) = R::index() else {
        return Ok(None);
    };
    let columns = R::schema().resolve_index(spec)?;
    Ok(Some(format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}({})",
        index_name(table),
        table,
        columns.join(",")
    )))
}

/// INSERT of every declared field; the engine assigns the row id
pub fn insert<R: Record>(record: &R, policy: QuotePolicy) -> Result<SqlStatement> {
    let table = checked_table::<R>()?;
    let schema = R::schema();
    let mut b = StatementBuilder::new(policy);
    b.text(&format!("INSERT INTO {} ({}) VALUES (", table, schema.field_names().join(",")))
        .values(schema.values(record))
        .text(")");
    Ok(b.build())
}

/// INSERT that also restores the row id. Undo text for a delete.
pub fn restore_insert<R: Record>(record: &R, identity: i64, policy: QuotePolicy) -> Result<SqlStatement> {
    let table = checked_table::<R>()?;
    require_identity(identity, Error::Delete, table)?;
    let schema = R::schema();
    let mut b = StatementBuilder::new(policy);
    b.text(&format!(
        "INSERT INTO {} ({},{}) VALUES (",
        table,
        IDENTITY_COLUMN,
        schema.field_names().join(",")
    ))
    .value(FieldValue::Integer(identity))
    .text(",")
    .values(schema.values(record))
    .text(")");
    Ok(b.build())
}

/// UPDATE of every declared field of the row `identity` to the values of `record`
pub fn update<R: Record>(record: &R, identity: i64, policy: QuotePolicy) -> Result<SqlStatement> {
    let table = checked_table::<R>()?;
    require_identity(identity, Error::Update, table)?;
    let mut b = StatementBuilder::new(policy);
    b.text(&format!("UPDATE {} SET ", table));
    for (i, field) in R::schema().fields().iter().enumerate() {
        if i > 0 {
            b.text(",");
        }
        b.text(&format!("{}=", field.name())).value(field.get(record));
    }
    b.text(&format!(" WHERE {}=", IDENTITY_COLUMN))
        .value(FieldValue::Integer(identity));
    Ok(b.build())
}

/// DELETE of the row `identity`
pub fn delete<R: Record>(identity: i64, policy: QuotePolicy) -> Result<SqlStatement> {
    let table = checked_table::<R>()?;
    require_identity(identity, Error::Delete, table)?;
    let mut b = StatementBuilder::new(policy);
    b.text(&format!("DELETE FROM {} WHERE {}=", table, IDENTITY_COLUMN))
        .value(FieldValue::Integer(identity));
    Ok(b.build())
}

pub fn drop_table(table: &str) -> Result<String> {
    check_user_object("table", table)?;
    Ok(format!("DROP TABLE IF EXISTS {}", table))
}

pub fn drop_index(table: &str) -> Result<String> {
    check_user_object("table", table)?;
    Ok(format!("DROP INDEX IF EXISTS {}", index_name(table)))
}

pub fn create_view<V: View>() -> Result<String> {
    let name = V::view_name();
    check_user_object("view", name)?;
    V::schema().validate()?;
    let select = V::select_sql().trim();
    if !select.to_ascii_uppercase().starts_with("SELECT") {
        return Err(Error::Schema(format!("view {} must be backed by a SELECT", name)));
    }
    Ok(format!("CREATE VIEW IF NOT EXISTS {} AS {}", name, select))
}

pub fn drop_view(name: &str) -> Result<String> {
    check_user_object("view", name)?;
    Ok(format!("DROP VIEW IF EXISTS {}", name))
}

/// One page of a table, in index order when the record declares an index
pub fn select_all<R: Record>(limit: u32, offset: u32) -> Result<String> {
    let table = checked_table::<R>()?;
    let mut sql = format!("SELECT * FROM {}", table);
    if let Some(spec) = R::index() {
        let columns = R::schema().resolve_index(spec)?;
        sql.push_str(&format!(" ORDER BY {}", columns.join(",")));
    }
    sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
    Ok(sql)
}

/// `SELECT * FROM t WHERE <suffix>`; the suffix is caller-supplied SQL
pub fn select_where<R: Record>(suffix: &str) -> Result<String> {
    let table = checked_table::<R>()?;
    let suffix = suffix.trim();
    if suffix.is_empty() {
        return Err(Error::Argument("empty WHERE clause".to_string()));
    }
    Ok(format!("SELECT * FROM {} WHERE {}", table, suffix))
}

/// Rows of a view, through its stored SELECT
pub fn select_view<V: View>() -> Result<String> {
    let name = V::view_name();
    check_user_object("view", name)?;
    Ok(format!("SELECT * FROM {}", name))
}

/// Single row by identity, bound as `?1`
pub fn select_by_identity(table: &str) -> Result<String> {
    check_identifier("table", table)?;
    Ok(format!("SELECT * FROM {} WHERE {} = ?1", table, IDENTITY_COLUMN))
}

/// Row count of a table
pub fn count(table: &str) -> Result<String> {
    check_identifier("table", table)?;
    Ok(format!("SELECT COUNT(*) FROM {}", table))
}

/// Number of rows with the given identity, bound as `?1`
pub fn count_identity(table: &str) -> Result<String> {
    check_identifier("table", table)?;
    Ok(format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", table, IDENTITY_COLUMN))
}
