//! Casefile CLI
//!
//! Command-line interface for the Casefile store - customers, orders,
//! attachments and connection endpoints.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use casefile_core::{ChangeBus, ChangeEvent, Config, LocalDatabase};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "casefile")]
#[command(about = "Casefile - local customer, order and attachment store")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show database location and record counts
    Status,
    /// Manage customers
    Customer {
        #[command(subcommand)]
        command: CustomerCommands,
    },
    /// Manage orders
    Order {
        #[command(subcommand)]
        command: OrderCommands,
    },
    /// Inspect file attachments
    File {
        #[command(subcommand)]
        command: FileCommands,
    },
    /// Inspect connection endpoints
    Connection {
        #[command(subcommand)]
        command: ConnectionCommands,
    },
    /// Export every record to a JSON file
    Export {
        /// Destination file (replaced if it exists)
        path: PathBuf,
    },
    /// Replace all records with the contents of a JSON export
    Import {
        /// Source file
        path: PathBuf,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum CustomerCommands {
    /// List customers
    #[command(alias = "ls")]
    List {
        /// Show one page of results (1-based)
        #[arg(short, long)]
        page: Option<u32>,
    },
    /// Search customers
    Search {
        /// Search query
        query: String,
        /// Show one page of results (1-based)
        #[arg(short, long)]
        page: Option<u32>,
    },
    /// Show customer details (including orders)
    Show {
        /// Customer ID (full UUID or prefix)
        id: String,
    },
    /// Delete a customer and everything attached to it
    #[command(alias = "rm")]
    Delete {
        /// Customer ID (full UUID or prefix)
        id: String,
    },
}

#[derive(Subcommand)]
enum OrderCommands {
    /// List orders
    #[command(alias = "ls")]
    List {
        /// Show one page of results (1-based)
        #[arg(short, long)]
        page: Option<u32>,
    },
    /// Search orders
    Search {
        /// Search query
        query: String,
        /// Show one page of results (1-based)
        #[arg(short, long)]
        page: Option<u32>,
    },
    /// Show order details (including files)
    Show {
        /// Order ID (full UUID or prefix)
        id: String,
    },
    /// Delete an order and its files
    #[command(alias = "rm")]
    Delete {
        /// Order ID (full UUID or prefix)
        id: String,
    },
}

#[derive(Subcommand)]
enum FileCommands {
    /// Show file metadata
    Show {
        /// File ID (full UUID)
        id: String,
    },
    /// Show the stored content size
    Size {
        /// File ID (full UUID)
        id: String,
    },
}

#[derive(Subcommand)]
enum ConnectionCommands {
    /// List connection endpoints
    #[command(alias = "ls")]
    List {
        /// Only endpoints whose URL or keys match
        #[arg(short, long)]
        search: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, database_file, log_file)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the database
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(&output),
            Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, &output),
        };
    }

    let config = Config::load().context("Failed to load configuration")?;
    let logging = init_logging(&config);

    let bus = ChangeBus::new();
    if logging {
        bus.subscribe(|event: &ChangeEvent| {
            debug!("{:?} {:?}", event.entity, event.action);
        });
    }

    let db = LocalDatabase::open(&config, bus)
        .with_context(|| format!("Failed to open database {}", config.database_path().display()))?;

    match cli.command {
        Commands::Status => commands::status::show(&db, &config, &output).await,
        Commands::Customer { command } => handle_customer_command(command, &db, &output).await,
        Commands::Order { command } => handle_order_command(command, &db, &output).await,
        Commands::File { command } => match command {
            FileCommands::Show { id } => commands::file::show(&db, id, &output).await,
            FileCommands::Size { id } => commands::file::size(&db, id, &output).await,
        },
        Commands::Connection { command } => match command {
            ConnectionCommands::List { search } => {
                commands::connection::list(&db, search, &output).await
            }
        },
        Commands::Export { path } => commands::transfer::export(&db, &path, &output).await,
        Commands::Import { path, yes } => {
            commands::transfer::import(&db, &path, yes, &output).await
        }
        Commands::Config { .. } => Ok(()), // Handled above
    }
}

async fn handle_customer_command(
    command: CustomerCommands,
    db: &LocalDatabase,
    output: &Output,
) -> Result<()> {
    match command {
        CustomerCommands::List { page } => commands::customer::list(db, page, output).await,
        CustomerCommands::Search { query, page } => {
            commands::customer::search(db, query, page, output).await
        }
        CustomerCommands::Show { id } => commands::customer::show(db, id, output).await,
        CustomerCommands::Delete { id } => commands::customer::delete(db, id, output).await,
    }
}

async fn handle_order_command(command: OrderCommands, db: &LocalDatabase, output: &Output) -> Result<()> {
    match command {
        OrderCommands::List { page } => commands::order::list(db, page, output).await,
        OrderCommands::Search { query, page } => {
            commands::order::search(db, query, page, output).await
        }
        OrderCommands::Show { id } => commands::order::show(db, id, output).await,
        OrderCommands::Delete { id } => commands::order::delete(db, id, output).await,
    }
}

/// Initialize file logging
///
/// Only initializes if CASEFILE_LOG environment variable is set.
/// Logs to file (config.log_file or default {data_dir}/debug.log).
fn init_logging(config: &Config) -> bool {
    let Ok(log_level) = std::env::var("CASEFILE_LOG") else {
        return false;
    };

    let log_path = config.log_path();
    let log_file = match File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
            return false;
        }
    };

    let env_filter = EnvFilter::new(format!(
        "casefile_core={},casefile={}",
        log_level, log_level
    ));

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("Logging initialized to {:?}", log_path);
    true
}
