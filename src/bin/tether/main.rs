//! tether CLI tool
//!
//! Command-line access to a SQLite-backed document store, with every relationship edit kept
//! consistent on both sides.
//!
//! ## Commands
//!
//! - `create <table>`: Insert a record with empty relationships
//! - `show <table> <id>`: Print a record
//! - `archive <table> <id>`: Cascade-archive a record
//! - `plan <table> <id>`: Print what `archive` would write
//! - `put`, `remove`, `push`, `splice`: Relationship edits

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use std::{path::PathBuf, time::Duration};
use tether_core::{
    config::{TetherConfig, DEFAULT_CONFIG_FILE},
    context::Tether,
    db::DbConnection,
    node::Target,
    TetherError,
};

#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about = "Relationship-consistent edits over a document store", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a new record
    Create {
        table: String,

        /// Record id, a uuid when omitted
        #[arg(long)]
        id: Option<String>,

        /// Attributes as a JSON object
        #[arg(short, long)]
        attributes: Option<String>,
    },

    /// Print a record
    Show { table: String, id: String },

    /// Archive a record and everything it owns
    Archive { table: String, id: String },

    /// Print the records and pointers archiving would touch, without writing
    Plan { table: String, id: String },

    /// Point a singular relationship at a record
    Put {
        table: String,
        id: String,
        field: String,
        /// An id, or JSON (id array, record object, connection)
        target: String,
    },

    /// Clear a hasOne relationship
    Remove {
        table: String,
        id: String,
        field: String,
    },

    /// Add records to a hasMany relationship
    Push {
        table: String,
        id: String,
        field: String,
        /// An id, or JSON (id array, record object, connection)
        target: String,
    },

    /// Remove records from a hasMany relationship
    Splice {
        table: String,
        id: String,
        field: String,
        /// An id, or JSON (id array, record object, connection)
        target: String,
    },
}

fn parse_target(raw: &str) -> Result<Target, TetherError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => Target::from_json(&value),
        Err(_) => Ok(Target::from(raw)),
    }
}

fn parse_attributes(raw: Option<String>) -> Result<Map<String, Value>, TetherError> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => Ok(map),
            other => Err(TetherError::InvalidInput(format!(
                "attributes must be a JSON object, found {other}"
            ))),
        },
    }
}

fn print<T: Serialize>(value: &T) -> Result<(), TetherError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(tether: &Tether<DbConnection>, command: Commands) -> Result<(), TetherError> {
    match command {
        Commands::Create {
            table,
            id,
            attributes,
        } => {
            let node = tether.create(&table, id, parse_attributes(attributes)?).await?;
            print(&node)
        }
        Commands::Show { table, id } => print(&tether.node(&table, &id).await?),
        Commands::Archive { table, id } => print(&tether.archive(&table, &id).await?),
        Commands::Plan { table, id } => print(&tether.plan_archive(&table, &id).await?),
        Commands::Put {
            table,
            id,
            field,
            target,
        } => print(&tether.put(&table, &id, &field, parse_target(&target)?).await?),
        Commands::Remove { table, id, field } => {
            print(&tether.remove(&table, &id, &field).await?)
        }
        Commands::Push {
            table,
            id,
            field,
            target,
        } => print(&tether.push(&table, &id, &field, parse_target(&target)?).await?),
        Commands::Splice {
            table,
            id,
            field,
            target,
        } => print(
            &tether
                .splice(&table, &id, &field, parse_target(&target)?)
                .await?,
        ),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = TetherConfig::from_path(&cli.config)?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log.filter))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let registry = config.registry()?;
    let db_path = config.store_path(&cli.config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let store =
            DbConnection::open(&db_path, Duration::from_millis(config.store.timeout_ms)).await?;
        let tether = Tether::new(registry, store);
        let result = run(&tether, cli.command).await;
        tether.close().await;
        result.map_err(|e| {
            tracing::error!("{} ({})", e, e.status_code());
            e
        })
    })?;

    Ok(())
}
