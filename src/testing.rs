//! Shared fixtures for unit tests

use crate::record::{Model, Record, Schema, View};
use crate::store::{DataStore, StoreSettings};
use crate::types::YearMonth;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::sync::OnceLock;
use tempfile::TempDir;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Person {
    pub rowid: Option<i64>,
    pub firstname: String,
    pub lastname: String,
    pub age: i64,
}

impl Person {
    pub fn new(firstname: &str, lastname: &str, age: i64) -> Self {
        Self {
            rowid: None,
            firstname: firstname.to_string(),
            lastname: lastname.to_string(),
            age,
        }
    }
}

impl Model for Person {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: OnceLock<Schema<Person>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::<Person>::builder()
                .field("firstname", |p| &p.firstname, |p| &mut p.firstname)
                .field("lastname", |p| &p.lastname, |p| &mut p.lastname)
                .field("age", |p| &p.age, |p| &mut p.age)
                .build()
        })
    }

    fn identity(&self) -> Option<i64> {
        self.rowid
    }

    fn set_identity(&mut self, identity: i64) {
        self.rowid = Some(identity);
    }
}

impl Record for Person {
    fn table_name() -> &'static str {
        "Person"
    }

    fn index() -> Option<&'static str> {
        Some("lastname,firstname")
    }
}

/// Every supported field kind, nullable and not
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    pub rowid: Option<i64>,
    pub memo: String,
    pub note: Option<String>,
    pub lines: i32,
    pub rate: f64,
    pub posted: bool,
    pub date: Option<NaiveDate>,
    pub period: Option<YearMonth>,
    pub amount: Option<Decimal>,
    pub entered: Option<NaiveDateTime>,
}

impl Model for Ledger {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: OnceLock<Schema<Ledger>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::<Ledger>::builder()
                .field("memo", |l| &l.memo, |l| &mut l.memo)
                .field("note", |l| &l.note, |l| &mut l.note)
                .field("lines", |l| &l.lines, |l| &mut l.lines)
                .field("rate", |l| &l.rate, |l| &mut l.rate)
                .field("posted", |l| &l.posted, |l| &mut l.posted)
                .field("date", |l| &l.date, |l| &mut l.date)
                .field("period", |l| &l.period, |l| &mut l.period)
                .field("amount", |l| &l.amount, |l| &mut l.amount)
                .field("entered", |l| &l.entered, |l| &mut l.entered)
                .build()
        })
    }

    fn identity(&self) -> Option<i64> {
        self.rowid
    }

    fn set_identity(&mut self, identity: i64) {
        self.rowid = Some(identity);
    }
}

impl Record for Ledger {
    fn table_name() -> &'static str {
        "Ledger"
    }

    fn index() -> Option<&'static str> {
        Some("date")
    }
}

/// A record that tries to claim the audit table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditShadow {
    pub rowid: Option<i64>,
    pub new_sql: String,
}

impl Model for AuditShadow {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: OnceLock<Schema<AuditShadow>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::<AuditShadow>::builder()
                .field("new_sql", |a| &a.new_sql, |a| &mut a.new_sql)
                .build()
        })
    }

    fn identity(&self) -> Option<i64> {
        self.rowid
    }

    fn set_identity(&mut self, identity: i64) {
        self.rowid = Some(identity);
    }
}

impl Record for AuditShadow {
    fn table_name() -> &'static str {
        "_audit"
    }

    fn index() -> Option<&'static str> {
        None
    }
}

/// Adults only, read through a stored view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Adult {
    pub rowid: Option<i64>,
    pub name: String,
    pub age: i64,
}

impl Model for Adult {
    fn schema() -> &'static Schema<Self> {
        static SCHEMA: OnceLock<Schema<Adult>> = OnceLock::new();
        SCHEMA.get_or_init(|| {
            Schema::<Adult>::builder()
                .field("name", |a| &a.name, |a| &mut a.name)
                .field("age", |a| &a.age, |a| &mut a.age)
                .build()
        })
    }

    fn identity(&self) -> Option<i64> {
        self.rowid
    }

    fn set_identity(&mut self, identity: i64) {
        self.rowid = Some(identity);
    }
}

impl View for Adult {
    fn view_name() -> &'static str {
        "Adult_View"
    }

    fn select_sql() -> &'static str {
        "SELECT rowid AS rowid, firstname AS name, age AS age FROM Person WHERE age >= 18 ORDER BY age"
    }
}

/// A store in a fresh temporary directory. Keep the `TempDir` alive.
pub fn temp_store() -> (TempDir, DataStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = DataStore::open(dir.path().join("test.db"), StoreSettings::default()).unwrap();
    (dir, store)
}

/// A store with the `Person` table created
pub fn person_store() -> (TempDir, DataStore) {
    let (dir, store) = temp_store();
    let mut tx = store.create_transaction();
    tx.begin().unwrap();
    tx.create_table::<Person>().unwrap();
    tx.commit().unwrap();
    (dir, store)
}

/// Insert people in one committed transaction, returning them with identities set
pub fn insert_people(store: &DataStore, people: &[Person]) -> Vec<Person> {
    let mut tx = store.create_transaction();
    tx.begin().unwrap();
    let mut stored = Vec::new();
    for person in people {
        let mut person = person.clone();
        tx.insert(&mut person).unwrap();
        stored.push(person);
    }
    tx.commit().unwrap();
    stored
}
