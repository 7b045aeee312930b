//! DataStore - the handle applications hold
//!
//! Opening a store creates the catalog tables, loads the key sequence and
//! prepares the security kernel, all in one immediate transaction. After
//! that the store hands out transactions for writes and scoped cursors for
//! reads; every one of them gets its own connection.

use crate::audit::{self, AuditEntry, AuditLog};
use crate::cursor::{self, Cursor};
use crate::kernel::{self, Kernel};
use crate::key::Key;
use crate::record::{type_name, Record, View};
use crate::registry::{self, RegistryEntry};
use crate::sequence::Sequence;
use crate::storage::schema::{CREATE_AUDIT_TABLE, CREATE_INDEXES, CREATE_MASTER_TABLE};
use crate::storage::{engine, sql, Connection};
use crate::transaction::Transaction;
use crate::types::QuotePolicy;
use crate::{Error, Result};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Page size used when a query asks for a limit of 0
pub const DEFAULT_LIMIT: u32 = 100;

/// Runtime knobs of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// How long a connection waits on a locked database before failing
    /// with a retryable error
    pub busy_timeout: Duration,
    /// Page size substituted for a limit of 0
    pub default_limit: u32,
    /// Rendering of quotes in audit text
    pub quote_policy: QuotePolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::ZERO,
            default_limit: DEFAULT_LIMIT,
            quote_policy: QuotePolicy::default(),
        }
    }
}

/// State shared by the store and every transaction it creates
pub(crate) struct Shared {
    pub(crate) path: PathBuf,
    pub(crate) settings: StoreSettings,
    pub(crate) sequence: Sequence,
    pub(crate) audit: AuditLog,
}

pub struct DataStore {
    shared: Arc<Shared>,
    kernel: Kernel,
    next_txn: AtomicU64,
}

impl DataStore {
    /// Open (or create) the database file at `path`
    pub fn open(path: impl AsRef<Path>, settings: StoreSettings) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let sequence = Sequence::new();

        let conn = Connection::open(&path, settings.busy_timeout)?;
        let init = conn.exec("BEGIN IMMEDIATE TRANSACTION").and_then(|_| {
            conn.exec(CREATE_MASTER_TABLE)?;
            conn.exec(CREATE_AUDIT_TABLE)?;
            for index in CREATE_INDEXES {
                conn.exec(index)?;
            }
            sequence.init(&conn)?;
            let modulus = kernel::init(&conn)?;
            conn.exec("COMMIT")?;
            Ok(modulus)
        });

        let modulus = match init {
            Ok(modulus) => modulus,
            Err(e) => {
                if !conn.raw().is_autocommit() {
                    if let Err(rb) = conn.exec("ROLLBACK") {
                        tracing::warn!("rollback after failed init: {}", rb);
                    }
                }
                conn.release();
                return Err(e);
            }
        };
        conn.release();

        let seed = rand::thread_rng().gen_range(10..=99);
        tracing::info!("opened store {}", path.display());

        Ok(Self {
            kernel: Kernel::new(path.clone(), settings.busy_timeout, modulus),
            shared: Arc::new(Shared {
                path,
                settings,
                sequence,
                audit: AuditLog::new(settings.quote_policy),
            }),
            next_txn: AtomicU64::new(seed),
        })
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.shared.settings
    }

    pub fn database_file_name(&self) -> &Path {
        &self.shared.path
    }

    /// SQLite library version number
    pub fn lib_version(&self) -> i32 {
        engine::lib_version_number()
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// A new transaction in state `Created`
    pub fn create_transaction(&self) -> Transaction {
        let id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        Transaction::new(Arc::clone(&self.shared), id)
    }

    /// The key the next allocation in this process will return
    pub fn peek_key(&self) -> Option<String> {
        self.shared.sequence.peek()
    }

    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = Connection::open(&self.shared.path, self.shared.settings.busy_timeout)?;
        let result = f(&conn);
        conn.release();
        result
    }

    fn limit(&self, limit: u32) -> u32 {
        if limit == 0 {
            self.shared.settings.default_limit
        } else {
            limit
        }
    }

    /// Page through the table of `R` in index order.
    ///
    /// A `limit` of 0 means the configured default page size.
    pub fn select_all<R, T>(
        &self,
        limit: u32,
        offset: u32,
        f: impl FnOnce(&mut Cursor<'_, R>) -> Result<T>,
    ) -> Result<T>
    where
        R: Record,
    {
        let sql = sql::select_all::<R>(self.limit(limit), offset)?;
        cursor::scoped(&self.shared.path, self.shared.settings.busy_timeout, &sql, [], f)
    }

    /// Rows of `R` matching a caller-supplied WHERE clause
    pub fn select_where<R, T>(&self, suffix: &str, f: impl FnOnce(&mut Cursor<'_, R>) -> Result<T>) -> Result<T>
    where
        R: Record,
    {
        let sql = sql::select_where::<R>(suffix)?;
        cursor::scoped(&self.shared.path, self.shared.settings.busy_timeout, &sql, [], f)
    }

    /// Rows of the view `V`
    pub fn view<V, T>(&self, f: impl FnOnce(&mut Cursor<'_, V>) -> Result<T>) -> Result<T>
    where
        V: View,
    {
        let sql = sql::select_view::<V>()?;
        cursor::scoped(&self.shared.path, self.shared.settings.busy_timeout, &sql, [], f)
    }

    /// One page of `R`, collected
    pub fn collect_all<R: Record>(&self, limit: u32, offset: u32) -> Result<Vec<R>> {
        self.select_all(limit, offset, |c| c.collect_all())
    }

    /// Fetch one record by key.
    ///
    /// The key's table must be registered to `R`.
    pub fn get<R: Record>(&self, key: &Key) -> Result<Option<R>> {
        let expected = type_name::<R>();
        let registered = self.with_connection(|conn| registry::class_of(conn, &key.table))?;
        match registered {
            Some(class) if class == expected => {}
            Some(class) => {
                return Err(Error::Schema(format!(
                    "table {} holds {}, not {}",
                    key.table, class, expected
                )));
            }
            None => {
                return Err(Error::Schema(format!("table {} is not registered", key.table)));
            }
        }

        let sql = sql::select_by_identity(&key.table)?;
        cursor::scoped::<R, _, _>(
            &self.shared.path,
            self.shared.settings.busy_timeout,
            &sql,
            [key.identity],
            |c| if c.has_next()? { c.next().map(Some) } else { Ok(None) },
        )
    }

    /// Row count of a table
    pub fn rows(&self, table: &str) -> Result<i64> {
        let sql = sql::count(table)?;
        self.with_connection(|conn| Ok(conn.query_i64(&sql, [])?.unwrap_or(0)))
    }

    /// Every table in the database file, catalog tables included
    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.with_connection(registry::table_names)
    }

    /// Registered tables and views with their record types
    pub fn registry(&self) -> Result<Vec<RegistryEntry>> {
        self.with_connection(registry::entries)
    }

    /// The audit trail, oldest first, optionally for one table
    pub fn audit_log(&self, table: Option<&str>) -> Result<Vec<AuditEntry>> {
        self.with_connection(|conn| audit::entries(conn, table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{insert_people, person_store, temp_store, Ledger, Person};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_store_is_shareable() {
        assert_send_sync::<DataStore>();
    }

    #[test]
    fn test_open_creates_catalog() {
        let (_dir, store) = temp_store();
        let tables = store.list_tables().unwrap();
        for t in ["_audit", "_master", "_sequence", "_system", "_user"] {
            assert!(tables.contains(&t.to_string()), "missing {}", t);
        }
        assert!(store.lib_version() >= 3_000_000);
        assert_eq!(store.peek_key().as_deref(), Some("1"));
        assert!(store.database_file_name().ends_with("test.db"));
    }

    #[test]
    fn test_reopen_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.db");
        let first = DataStore::open(&path, StoreSettings::default()).unwrap();
        let modulus = first.kernel().public_modulus();
        let mut tx = first.create_transaction();
        tx.begin().unwrap();
        tx.next_key().unwrap();
        tx.next_key().unwrap();
        tx.commit().unwrap();
        drop(first);

        let second = DataStore::open(&path, StoreSettings::default()).unwrap();
        assert_eq!(second.kernel().public_modulus(), modulus);
        assert_eq!(second.peek_key().as_deref(), Some("3"));
    }

    #[test]
    fn test_stores_sharing_a_file_issue_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let a = DataStore::open(&path, StoreSettings::default()).unwrap();
        let b = DataStore::open(&path, StoreSettings::default()).unwrap();

        let mut issued = Vec::new();
        for store in [&a, &b, &a] {
            let mut tx = store.create_transaction();
            tx.begin().unwrap();
            issued.push(tx.next_key().unwrap());
            tx.commit().unwrap();
        }
        assert_eq!(issued, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_scenario_person() {
        let (_dir, store) = person_store();
        let people = insert_people(
            &store,
            &[Person::new("Ada", "Lovelace", 36), Person::new("Alan", "Turing", 41)],
        );
        assert_eq!(people[0].rowid, Some(1));
        assert_eq!(people[1].rowid, Some(2));

        let columns = store
            .select_all::<Person, _>(1, 0, |c| Ok(c.columns().to_vec()))
            .unwrap();
        assert_eq!(columns, vec!["rowid", "firstname", "lastname", "age"]);
    }

    #[test]
    fn test_select_all_pages_in_index_order() {
        let (_dir, store) = person_store();
        insert_people(
            &store,
            &[
                Person::new("Alan", "Turing", 41),
                Person::new("Ada", "Lovelace", 36),
                Person::new("Grace", "Hopper", 85),
            ],
        );

        let all: Vec<Person> = store.collect_all(0, 0).unwrap();
        let names: Vec<&str> = all.iter().map(|p| p.lastname.as_str()).collect();
        assert_eq!(names, vec!["Hopper", "Lovelace", "Turing"]);

        let page: Vec<Person> = store.collect_all(1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].lastname, "Lovelace");
    }

    #[test]
    fn test_select_where() {
        let (_dir, store) = person_store();
        insert_people(
            &store,
            &[Person::new("Ada", "Lovelace", 36), Person::new("Alan", "Turing", 41)],
        );
        let older = store
            .select_where::<Person, _>("age > 40", |c| c.collect_all())
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].firstname, "Alan");
    }

    #[test]
    fn test_get_checks_registry() {
        let (_dir, store) = person_store();
        insert_people(&store, &[Person::new("Ada", "Lovelace", 36)]);

        let ada: Option<Person> = store.get(&Key::new("Person", 1)).unwrap();
        assert_eq!(ada.map(|p| p.firstname), Some("Ada".to_string()));
        assert!(store.get::<Person>(&Key::new("Person", 7)).unwrap().is_none());

        assert!(matches!(
            store.get::<Ledger>(&Key::new("Person", 1)),
            Err(Error::Schema(_))
        ));
        assert!(matches!(
            store.get::<Person>(&Key::new("Nowhere", 1)),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn test_cursor_is_released() {
        let (_dir, store) = person_store();
        insert_people(&store, &[Person::new("Ada", "Lovelace", 36)]);

        // an error from the closure still releases the connection
        let err = store.select_all::<Person, ()>(0, 0, |_| Err(Error::Argument("stop".into())));
        assert!(matches!(err, Err(Error::Argument(_))));

        assert_eq!(store.rows("Person").unwrap(), 1);
        let mut tx = store.create_transaction();
        tx.begin().unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_rows_and_default_limit() {
        let dir = tempfile::tempdir().unwrap();
        let settings = StoreSettings {
            default_limit: 2,
            ..StoreSettings::default()
        };
        let store = DataStore::open(dir.path().join("limit.db"), settings).unwrap();
        let mut tx = store.create_transaction();
        tx.begin().unwrap();
        tx.create_table::<Person>().unwrap();
        tx.commit().unwrap();
        insert_people(
            &store,
            &[
                Person::new("A", "A", 1),
                Person::new("B", "B", 2),
                Person::new("C", "C", 3),
            ],
        );

        assert_eq!(store.rows("Person").unwrap(), 3);
        assert_eq!(store.collect_all::<Person>(0, 0).unwrap().len(), 2);
        assert_eq!(store.collect_all::<Person>(10, 0).unwrap().len(), 3);
    }

    #[test]
    fn test_transaction_ids_increase() {
        let (_dir, store) = temp_store();
        let a = store.create_transaction().id();
        let b = store.create_transaction().id();
        assert!((10..=99).contains(&a));
        assert_eq!(b, a + 1);
    }
}
