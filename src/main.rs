//! Vellum CLI - administration of a vellum record store

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "vellum")]
#[command(version)]
#[command(about = "Transactional record store with an audit trail")]
#[command(long_about = r#"
Vellum keeps typed records in SQLite and accounts for every change:
  • Audit trail with undo statements for each update, delete and drop
  • Durable radix-8 key sequence
  • Users with encrypted PINs

Example usage:
  vellum init
  vellum tables
  vellum audit --table Person --format json
  vellum add-user --root-pin 1234 --username ada --pin 1815
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true, default_value = "vellum.toml")]
    config: PathBuf,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and the database
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// List tables with their record types and row counts
    Tables {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show the audit trail
    Audit {
        /// Only entries for this table
        #[arg(short, long)]
        table: Option<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Add a user (requires root)
    AddUser {
        /// Root PIN
        #[arg(long)]
        root_pin: u32,

        #[arg(short, long)]
        username: String,

        /// PIN of the new user (at least 1000)
        #[arg(short, long)]
        pin: u32,

        #[arg(short, long)]
        email: Option<String>,
    },

    /// Change a password, one's own with --old-pin or anyone's with --root-pin
    Passwd {
        #[arg(short, long)]
        username: String,

        #[arg(long)]
        new_pin: u32,

        #[arg(long, conflicts_with = "root_pin", required_unless_present = "root_pin")]
        old_pin: Option<u32>,

        #[arg(long)]
        root_pin: Option<u32>,
    },

    /// Allocate keys from the sequence
    NextKey {
        /// How many keys to allocate
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },

    /// Show statistics about the store
    Stats {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_human(&self) -> bool {
        *self == OutputFormat::Text
    }
}

/// Print a JSON document for machine consumers
pub fn emit_json(command: &str, data: serde_json::Value) -> anyhow::Result<()> {
    let out = serde_json::json!({
        "command": command,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli) {
        vellum::ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = commands::Context::resolve(&cli.config, cli.database)?;

    match cli.command {
        Commands::Init { force } => commands::run_init(&ctx, &cli.config, force),
        Commands::Tables { format } => commands::run_tables(&ctx, format),
        Commands::Audit { table, format } => commands::run_audit(&ctx, table.as_deref(), format),
        Commands::AddUser {
            root_pin,
            username,
            pin,
            email,
        } => commands::run_add_user(&ctx, root_pin, &username, pin, email),
        Commands::Passwd {
            username,
            new_pin,
            old_pin,
            root_pin,
        } => commands::run_passwd(&ctx, &username, new_pin, old_pin, root_pin),
        Commands::NextKey { count } => commands::run_next_key(&ctx, count),
        Commands::Stats { format } => commands::run_stats(&ctx, format),
    }
}
