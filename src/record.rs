//! Record descriptors - what a storable or viewable type exposes
//!
//! Instead of reflecting over fields at runtime, each type builds a
//! [`Schema`] once: an ordered table of named, typed accessors. The order
//! of that table fixes both the column order of `CREATE TABLE` and the
//! positional order of values in generated statements.
//!
//! ```ignore
//! impl Model for Person {
//!     fn schema() -> &'static Schema<Self> {
//!         static SCHEMA: OnceLock<Schema<Person>> = OnceLock::new();
//!         SCHEMA.get_or_init(|| {
//!             Schema::<Person>::builder()
//!                 .field("firstname", |p| &p.firstname, |p| &mut p.firstname)
//!                 .field("age", |p| &p.age, |p| &mut p.age)
//!                 .build()
//!         })
//!     }
//!     // identity accessors ...
//! }
//! ```

use crate::types::{FieldKind, FieldType, FieldValue};
use crate::{Error, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Name of the identity column present in every table
pub const IDENTITY_COLUMN: &str = "rowid";

const RESERVED_COLUMNS: &[&str] = &["rowid", "oid", "_rowid_"];

/// True if `name` can be interpolated into SQL as a bare identifier
pub fn is_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
        .is_match(name)
}

/// Fail with a schema error unless `name` is a valid identifier
pub fn check_identifier(what: &str, name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(Error::Schema(format!("invalid {} name: {:?}", what, name)))
    }
}

/// Typed accessor for one field of `M`
pub struct FieldAccessor<M> {
    name: &'static str,
    kind: FieldKind,
    nullable: bool,
    get: Box<dyn Fn(&M) -> FieldValue + Send + Sync>,
    set: Box<dyn Fn(&mut M, FieldValue) -> Result<()> + Send + Sync>,
}

impl<M> FieldAccessor<M> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    /// Read the field from an instance
    pub fn get(&self, model: &M) -> FieldValue {
        (self.get)(model)
    }

    /// Assign the field on an instance.
    ///
    /// A NULL assigned to a non-nullable field leaves it untouched.
    pub fn set(&self, model: &mut M, value: FieldValue) -> Result<()> {
        if value.is_null() && !self.nullable {
            return Ok(());
        }
        (self.set)(model, value).map_err(|e| match e {
            Error::Schema(msg) => Error::Schema(format!("field {}: {}", self.name, msg)),
            other => other,
        })
    }
}

/// Ordered field accessor table for a model type
pub struct Schema<M> {
    fields: Vec<FieldAccessor<M>>,
}

impl<M: 'static> Schema<M> {
    pub fn builder() -> SchemaBuilder<M> {
        SchemaBuilder { fields: Vec::new() }
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldAccessor<M>] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    /// Look up a field by column name (ASCII case-insensitive, like SQLite)
    pub fn field(&self, name: &str) -> Option<&FieldAccessor<M>> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)))
    }

    /// Read every field of `model`, in order
    pub fn values(&self, model: &M) -> Vec<FieldValue> {
        self.fields.iter().map(|f| f.get(model)).collect()
    }

    /// Check that the table is usable for SQL generation
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(Error::Schema("a record needs at least one field".to_string()));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            check_identifier("field", field.name)?;
            let lower = field.name.to_ascii_lowercase();
            if RESERVED_COLUMNS.contains(&lower.as_str()) {
                return Err(Error::Schema(format!(
                    "field {} shadows the identity column",
                    field.name
                )));
            }
            if !seen.insert(lower) {
                return Err(Error::Schema(format!("field {} declared twice", field.name)));
            }
        }
        Ok(())
    }

    /// Resolve an index spec (`"lastname,firstname"`) against the declared fields.
    ///
    /// Returns the normalized column list.
    pub fn resolve_index(&self, spec: &str) -> Result<Vec<&'static str>> {
        let mut columns = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            let field = self
                .field(part)
                .ok_or_else(|| Error::Schema(format!("index names unknown field {:?}", part)))?;
            columns.push(field.name);
        }
        Ok(columns)
    }
}

/// Builder for [`Schema`]
pub struct SchemaBuilder<M> {
    fields: Vec<FieldAccessor<M>>,
}

impl<M: 'static> SchemaBuilder<M> {
    /// Declare the next field through a pair of lenses
    pub fn field<T>(mut self, name: &'static str, get: fn(&M) -> &T, get_mut: fn(&mut M) -> &mut T) -> Self
    where
        T: FieldType + 'static,
    {
        self.fields.push(FieldAccessor {
            name,
            kind: T::KIND,
            nullable: T::NULLABLE,
            get: Box::new(move |m| get(m).to_value()),
            set: Box::new(move |m, value| {
                *get_mut(m) = T::from_value(value)?;
                Ok(())
            }),
        });
        self
    }

    pub fn build(self) -> Schema<M> {
        Schema { fields: self.fields }
    }
}

/// Common contract of anything a cursor can materialize
pub trait Model: Default + Send + 'static {
    /// The field accessor table, built once per type
    fn schema() -> &'static Schema<Self>;

    /// Current row id, absent until the model is persisted
    fn identity(&self) -> Option<i64>;

    fn set_identity(&mut self, identity: i64);
}

/// A model stored in its own table
pub trait Record: Model {
    fn table_name() -> &'static str;

    /// Comma-joined field names used for the default order and an index
    fn index() -> Option<&'static str> {
        None
    }
}

/// A read-only model backed by a stored SELECT.
///
/// Columns of the SELECT must be aliased (`AS`) to the field names.
pub trait View: Model {
    fn view_name() -> &'static str;

    fn select_sql() -> &'static str;
}

/// Name under which a type is recorded in the type registry
pub fn type_name<M: Model>() -> &'static str {
    std::any::type_name::<M>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Person;

    #[derive(Default)]
    struct Broken {
        rowid: i64,
    }

    #[test]
    fn test_field_order_and_lookup() {
        let schema = Person::schema();
        assert_eq!(schema.field_names(), vec!["firstname", "lastname", "age"]);
        assert_eq!(schema.field("AGE").map(|f| f.name()), Some("age"));
        assert!(schema.field("missing").is_none());
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_accessors() {
        let schema = Person::schema();
        let mut p = Person::new("Ada", "Lovelace", 36);
        let age = schema.field("age").unwrap();
        assert_eq!(age.get(&p), FieldValue::Integer(36));
        age.set(&mut p, FieldValue::Integer(37)).unwrap();
        assert_eq!(p.age, 37);

        // NULL into a primitive is skipped
        age.set(&mut p, FieldValue::Null).unwrap();
        assert_eq!(p.age, 37);

        let err = age.set(&mut p, FieldValue::Text("x".into())).unwrap_err();
        assert!(matches!(err, Error::Schema(msg) if msg.contains("age")));
    }

    #[test]
    fn test_resolve_index() {
        let schema = Person::schema();
        assert_eq!(
            schema.resolve_index("lastname, firstname").unwrap(),
            vec!["lastname", "firstname"]
        );
        assert!(matches!(schema.resolve_index("nickname"), Err(Error::Schema(_))));
    }

    #[test]
    fn test_validate_rejects_bad_tables() {
        let shadow = Schema::<Broken>::builder()
            .field("rowid", |b| &b.rowid, |b| &mut b.rowid)
            .build();
        assert!(matches!(shadow.validate(), Err(Error::Schema(_))));

        let twice = Schema::<Broken>::builder()
            .field("n", |b| &b.rowid, |b| &mut b.rowid)
            .field("N", |b| &b.rowid, |b| &mut b.rowid)
            .build();
        assert!(matches!(twice.validate(), Err(Error::Schema(_))));

        let empty = Schema::<Broken>::builder().build();
        assert!(matches!(empty.validate(), Err(Error::Schema(_))));

        let bad_name = Schema::<Broken>::builder()
            .field("drop table", |b| &b.rowid, |b| &mut b.rowid)
            .build();
        assert!(matches!(bad_name.validate(), Err(Error::Schema(_))));
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("Person"));
        assert!(is_identifier("_audit"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a;b"));
        assert!(check_identifier("table", "x y").is_err());
    }
}
