#[cfg(feature = "sqlite")]
mod blocking;
mod handlers;
mod server;


use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use locking_core::config::{LockConfig, ParentLockPolicy};
use locking_core::infrastructure::LockStore;
use locking_core::types::{EntityId, HolderId, LockFilter, LockType};

use crate::server::{ServeOptions, ServerError};

#[derive(Parser)]
#[command(
    name = "locking",
    about = "Locking — lease-based read/write entity locks over a shared store",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP lock service
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3100")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Storage backend: "memory" or "sqlite:<path>"
        #[arg(long, default_value = "memory", env = "LOCKING_STORAGE")]
        storage: String,

        /// JSON file mapping child entity id to parent entity id
        #[arg(long, env = "LOCKING_HIERARCHY")]
        hierarchy: Option<PathBuf>,

        /// Bearer token required on every route but /health
        #[arg(long, env = "LOCKING_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Default lease length in seconds
        #[arg(long, default_value_t = 30, env = "LOCKING_EXPIRATION_SECONDS")]
        expiration_seconds: u64,

        /// Default time an acquisition keeps retrying, in seconds
        #[arg(long, default_value_t = 10, env = "LOCKING_RETRY_TIMEOUT_SECONDS")]
        retry_timeout_seconds: u64,

        /// What to do with ancestor locks when a later ancestor cannot be locked:
        /// "all_or_nothing" or "keep_acquired"
        #[arg(long, default_value = "all_or_nothing", env = "LOCKING_PARENT_POLICY")]
        parent_policy: ParentLockPolicy,
    },

    /// List locks in a SQLite store
    Locks {
        /// Path to the SQLite database
        #[arg(long, env = "LOCKING_DB")]
        db: String,

        #[arg(long)]
        entity_id: Option<u64>,

        #[arg(long)]
        holder_id: Option<String>,

        /// READ or WRITE
        #[arg(long)]
        lock_type: Option<LockType>,

        /// Show expired rows instead of active locks
        #[arg(long)]
        expired: bool,
    },

    /// Delete expired lock rows from a SQLite store
    Gc {
        /// Path to the SQLite database
        #[arg(long, env = "LOCKING_DB")]
        db: String,
    },

    /// Print version information
    Version,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("invalid configuration: {0}")]
    Config(#[from] locking_core::config::ConfigError),
    #[error(transparent)]
    Store(#[from] locking_core::infrastructure::StoreError),
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match execute(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Serve {
            port,
            host,
            storage,
            hierarchy,
            api_key,
            expiration_seconds,
            retry_timeout_seconds,
            parent_policy,
        } => {
            let config = LockConfig {
                expiration_seconds,
                retry_timeout_seconds,
                parent_lock_policy: parent_policy,
            };
            config.validate()?;
            server::run(ServeOptions {
                host,
                port,
                storage,
                hierarchy,
                api_key,
                config,
            })
            .await?;
        }
        Commands::Locks {
            db,
            entity_id,
            holder_id,
            lock_type,
            expired,
        } => {
            let store = server::create_store(&format!("sqlite:{}", db))?;
            let base = if expired {
                LockFilter::expired()
            } else {
                LockFilter::active()
            };
            let filter = LockFilter {
                entity_id: entity_id.map(EntityId),
                holder_id: holder_id.map(HolderId),
                lock_type,
                ..base
            };
            let locks = store.query(&filter, now_ms())?;
            println!("{}", serde_json::to_string_pretty(&locks)?);
        }
        Commands::Gc { db } => {
            let store = server::create_store(&format!("sqlite:{}", db))?;
            let purged = store.purge_expired(now_ms())?;
            tracing::info!(purged, "Expired locks purged");
            println!("{}", purged);
        }
        Commands::Version => {
            println!("locking {}", env!("CARGO_PKG_VERSION"));
            println!("Lease-based read/write entity locking");
        }
    }
    Ok(())
}

fn now_ms() -> u64 {
    use locking_core::clock::{Clock, SystemClock};
    SystemClock.now_ms()
}
