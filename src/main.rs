//! # Stepboard CLI (`stepboard`)
//!
//! Reads daily step counts off phone screenshots and keeps one record per
//! person per day.
//!
//! ## Usage
//!
//! ```bash
//! stepboard --config ./config/stepboard.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `stepboard init` | Create the SQLite database and run schema migrations |
//! | `stepboard ingest <image> --name <person>` | Read a screenshot and reconcile it |
//! | `stepboard extract <text>...` | Run step extraction on literal OCR text |
//! | `stepboard leaderboard` | Total steps per person |
//! | `stepboard people` | Everyone with a record |
//! | `stepboard history <person>` | A person's daily records, newest first |
//! | `stepboard backup` | Copy the database to the backup path |
//! | `stepboard serve` | Start the HTTP server |
//!
//! ## Logging
//!
//! Logs go to stderr. `STEPBOARD_LOG` takes an env-filter directive
//! (`STEPBOARD_LOG=stepboard=debug`); otherwise `--verbose` selects `debug`
//! and the default is `info`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use stepboard::config::{self, Config};
use stepboard::models::UploadSource;
use stepboard::store::Page;
use stepboard::{backup, ingest, migrate, report, server};

/// Stepboard: screenshot step counter and daily leaderboard.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/stepboard.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "stepboard",
    about = "Stepboard: read step counts from screenshots and keep a daily leaderboard",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/stepboard.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by STEPBOARD_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema (idempotent).
    Init,

    /// Read a screenshot and reconcile it into today's record.
    Ingest {
        /// Screenshot to read.
        image: PathBuf,

        /// Whose steps these are.
        #[arg(long)]
        name: String,

        /// `smartband` or `health`.
        #[arg(long, default_value = "health")]
        source: UploadSource,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Extract a step count from literal OCR fragments.
    Extract {
        #[arg(long, default_value = "health")]
        source: UploadSource,

        /// OCR fragments, joined with spaces.
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Print total steps per person.
    Leaderboard,

    /// List everyone with a record.
    People,

    /// Print a person's daily records, newest first.
    History {
        person: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },

    /// Copy the database to `[backup].path`.
    Backup,

    /// Start the HTTP server.
    Serve,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("STEPBOARD_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let load = || -> anyhow::Result<Config> { config::load_config(&cli.config) };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&load()?).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            image,
            name,
            source,
            json,
        } => {
            ingest::run_ingest(&load()?, &image, &name, source, json).await?;
        }
        // Extraction needs no config or database
        Commands::Extract { source, text } => {
            ingest::run_extract(source, &text);
        }
        Commands::Leaderboard => {
            report::run_leaderboard(&load()?).await?;
        }
        Commands::People => {
            report::run_people(&load()?).await?;
        }
        Commands::History {
            person,
            page,
            per_page,
        } => {
            let page = Page::new(page, per_page)?;
            report::run_history(&load()?, &person, page).await?;
        }
        Commands::Backup => {
            backup::run_backup(&load()?).await?;
        }
        Commands::Serve => {
            server::run_server(&load()?).await?;
        }
    }

    Ok(())
}
