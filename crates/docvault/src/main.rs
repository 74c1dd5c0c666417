//! # DocVault CLI (`dv`)
//!
//! ```bash
//! dv --config ./config/docvault.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dv init` | Create the SQLite database and run schema migrations |
//! | `dv serve` | Run migrations, start the processing workers and the HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docvault::{config, db, migrate, server};

/// DocVault — content-addressed document ingestion and hybrid retrieval
/// with citation-grade provenance.
#[derive(Parser)]
#[command(
    name = "dv",
    about = "DocVault — content-addressed document ingestion and hybrid retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running
    /// it again is safe.
    Init,

    /// Start the ingestion workers and the HTTP API.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docvault=info,dv=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
