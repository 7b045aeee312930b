use crate::{emit_json, OutputFormat};
use std::path::{Path, PathBuf};
use tabled::Tabled;
use vellum::config::{self, VellumConfig};
use vellum::kernel::{DEFAULT_ROOT_PASSWORD, ROOT_USER};
use vellum::ui::{self, Icons};
use vellum::{Credentials, DataStore, StoreSettings};

/// Resolved configuration for one invocation
pub struct Context {
    pub config: VellumConfig,
    pub database: PathBuf,
    pub settings: StoreSettings,
}

impl Context {
    /// Command line beats the config file, which beats the defaults
    pub fn resolve(config_path: &Path, database: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = config::load_config(Some(config_path))?.unwrap_or_default();
        let database = database
            .or_else(|| config.database.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| config::default_database_path_in(Path::new(".")));
        let settings = config.settings()?;
        Ok(Self {
            config,
            database,
            settings,
        })
    }

    pub fn open_store(&self) -> anyhow::Result<DataStore> {
        config::ensure_db_dir(&self.database)?;
        Ok(DataStore::open(&self.database, self.settings)?)
    }
}

pub fn run_init(ctx: &Context, config_path: &Path, force: bool) -> anyhow::Result<()> {
    ui::header("Initializing vellum store");

    let config = VellumConfig {
        database: Some(ctx.database.to_string_lossy().to_string()),
        ..ctx.config.clone()
    };
    config::write_config(config_path, &config, force)?;
    ui::info("Config", &config_path.display().to_string());

    if let Some(root) = config_path.parent() {
        let root = if root.as_os_str().is_empty() { Path::new(".") } else { root };
        config::ensure_gitignore(root)?;
    }

    let store = ctx.open_store()?;
    ui::info("Database", &store.database_file_name().display().to_string());
    ui::info("Public key", &store.kernel().public_modulus().to_hex());
    ui::success("Store ready");

    let root = Credentials::encrypt(
        store.kernel().public_modulus(),
        ROOT_USER,
        None,
        DEFAULT_ROOT_PASSWORD,
    )?;
    if store.kernel().validate_root(Some(&root))? {
        ui::warn(&format!(
            "{} still has the default PIN {}; change it with `vellum passwd`",
            ROOT_USER, DEFAULT_ROOT_PASSWORD
        ));
    }
    Ok(())
}

#[derive(Tabled)]
struct TableInfo {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Record type")]
    class_name: String,
    #[tabled(rename = "Rows")]
    rows: String,
}

pub fn run_tables(ctx: &Context, format: OutputFormat) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let registry = store.registry()?;

    let mut infos = Vec::new();
    for entry in &registry {
        let rows = if entry.kind == "table" {
            store.rows(&entry.name)?.to_string()
        } else {
            "-".to_string()
        };
        infos.push(TableInfo {
            name: entry.name.clone(),
            kind: entry.kind.clone(),
            class_name: entry.class_name.clone(),
            rows,
        });
    }

    if !format.is_human() {
        return emit_json(
            "tables",
            serde_json::json!({
                "registered": registry,
                "all": store.list_tables()?,
            }),
        );
    }

    if infos.is_empty() {
        println!("{}", ui::muted("No record tables yet."));
    } else {
        println!("{}", ui::render_rows(&infos));
    }
    Ok(())
}

#[derive(Tabled)]
struct AuditRow {
    #[tabled(rename = "#")]
    id: i64,
    #[tabled(rename = "When")]
    when: String,
    #[tabled(rename = "Table")]
    table: String,
    #[tabled(rename = "Row")]
    row: String,
    #[tabled(rename = "Txn")]
    txn: u64,
    #[tabled(rename = "Change")]
    change: String,
}

pub fn run_audit(ctx: &Context, table: Option<&str>, format: OutputFormat) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let entries = store.audit_log(table)?;

    if !format.is_human() {
        return emit_json("audit", serde_json::to_value(&entries)?);
    }

    if entries.is_empty() {
        println!("{}", ui::muted("Audit trail is empty."));
        return Ok(());
    }

    let rows: Vec<AuditRow> = entries
        .iter()
        .map(|e| AuditRow {
            id: e.id,
            when: e.timestamp.to_string(),
            table: e.table.clone(),
            row: if e.identity > 0 { e.identity.to_string() } else { "-".to_string() },
            txn: e.txn,
            change: e.new_sql.clone(),
        })
        .collect();
    println!("{}", ui::render_rows(&rows));

    ui::section(&format!("{} Undo", Icons::UNDO));
    for e in &entries {
        if let Some(undo) = &e.undo_sql {
            println!("  {} {}", ui::dim(&format!("#{}", e.id)), ui::undo(undo));
        }
    }
    Ok(())
}

pub fn run_add_user(
    ctx: &Context,
    root_pin: u32,
    username: &str,
    pin: u32,
    email: Option<String>,
) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let kernel = store.kernel();
    let modulus = kernel.public_modulus();

    let root = Credentials::encrypt(modulus, ROOT_USER, None, root_pin)?;
    let user = Credentials::encrypt(modulus, username, email, pin)?;
    kernel.add_user(&root, &user)?;

    ui::success(&format!("{} Added user {}", Icons::PERSON, ui::accent(username)));
    Ok(())
}

pub fn run_passwd(
    ctx: &Context,
    username: &str,
    new_pin: u32,
    old_pin: Option<u32>,
    root_pin: Option<u32>,
) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let kernel = store.kernel();
    let modulus = kernel.public_modulus();
    let new = Credentials::encrypt(modulus, username, None, new_pin)?;

    match (old_pin, root_pin) {
        (Some(old_pin), _) => {
            let old = Credentials::encrypt(modulus, username, None, old_pin)?;
            kernel.change_password(&old, &new)?;
        }
        (None, Some(root_pin)) => {
            let root = Credentials::encrypt(modulus, ROOT_USER, None, root_pin)?;
            kernel.change_password_for_user(&root, &new)?;
        }
        (None, None) => anyhow::bail!("either --old-pin or --root-pin is required"),
    }

    ui::success(&format!("Password changed for {}", ui::accent(username)));
    Ok(())
}

pub fn run_next_key(ctx: &Context, count: usize) -> anyhow::Result<()> {
    if count == 0 {
        anyhow::bail!("--count must be at least 1");
    }
    let store = ctx.open_store()?;

    let mut tx = store.create_transaction();
    tx.begin()?;
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        match tx.next_key() {
            Ok(key) => keys.push(key),
            Err(e) => {
                tx.rollback()?;
                return Err(e.into());
            }
        }
    }
    tx.commit()?;

    for key in keys {
        println!("{} {}", Icons::KEY, ui::accent(&key));
    }
    Ok(())
}

pub fn run_stats(ctx: &Context, format: OutputFormat) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let tables = store.list_tables()?;
    let registry = store.registry()?;
    let audit = store.audit_log(None)?;
    let version = store.lib_version();
    let sqlite = format!("{}.{}.{}", version / 1_000_000, version / 1000 % 1000, version % 1000);
    let next_key = store.peek_key().unwrap_or_default();

    if !format.is_human() {
        return emit_json(
            "stats",
            serde_json::json!({
                "database": store.database_file_name().display().to_string(),
                "sqlite_version": sqlite,
                "tables": tables.len(),
                "registered": registry.len(),
                "audit_entries": audit.len(),
                "next_key": next_key,
                "busy_timeout_ms": store.settings().busy_timeout.as_millis() as u64,
                "default_limit": store.settings().default_limit,
            }),
        );
    }

    println!(
        "{} Vellum Statistics ({})",
        Icons::STATS,
        store.database_file_name().display()
    );
    println!(
        "{}",
        ui::stats_table(&[
            ("SQLite", sqlite),
            ("Tables", tables.len().to_string()),
            ("Registered types", registry.len().to_string()),
            ("Audit entries", audit.len().to_string()),
            ("Next key", next_key),
        ])
    );
    ui::summary_row(
        &format!("{} busy timeout", Icons::DATABASE),
        &format!("{:?}", store.settings().busy_timeout),
    );
    if let Some(last) = audit.last() {
        ui::summary_row(
            &format!("{} last change", Icons::SCROLL),
            &format!("{} on {}", last.timestamp, last.table),
        );
    }
    Ok(())
}
