//! # cvsload
//!
//! Archives a CVS repository, local or remote, as a content-addressed
//! commit graph in a SQLite store.
//!
//! ## Usage
//!
//! ```bash
//! cvsload --config ./config/cvsload.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cvsload init` | Create the SQLite store and its schema |
//! | `cvsload load` | Load the configured origin into the store |
//! | `cvsload graph` | Print the reconstructed commit graph |
//! | `cvsload inspect <FILE,v>` | Parse one RCS file and print its revisions |
//! | `cvsload stats` | Object counts and the latest visit per origin |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use cvs_loader::cancel::CancelToken;
use cvs_loader::config;
use cvs_loader::inspect;
use cvs_loader::loader::{self, LoadOptions};
use cvs_loader::logging;
use cvs_loader::migrate;
use cvs_loader::progress::{LoadProgressReporter, ProgressMode};
use cvs_loader::report::LoadStatus;
use cvs_loader::sqlite_store::SqliteStore;
use cvs_loader::{db, stats};
use cvs_loader_core::store::memory::InMemoryStore;

/// cvsload: archive CVS repositories as a commit graph.
///
/// All commands except `inspect` read a TOML configuration file. See
/// `config/cvsload.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cvsload",
    about = "Archive CVS repositories (local or remote) as a content-addressed commit graph",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cvsload.toml")]
    config: PathBuf,

    /// Progress on stderr: `off`, `human` or `json`. Defaults to `human`
    /// when stderr is a terminal.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store and its tables. Safe to run more than once.
    Init,

    /// Load the configured origin.
    ///
    /// Commits already archived by an earlier load are recognized and
    /// skipped.
    Load {
        /// Ignore the stored marker and revisit every commit.
        #[arg(long)]
        full: bool,

        /// Walk, parse and reconstruct without writing to the store.
        #[arg(long)]
        dry_run: bool,

        /// Print the load report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the commit graph reconstructed from the origin.
    Graph {
        #[arg(long)]
        json: bool,
    },

    /// Parse one RCS `,v` file and print its revisions.
    Inspect {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Show store statistics.
    Stats,
}

/// Cancel the token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping after the current step...");
            handle.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let progress: Arc<dyn LoadProgressReporter> = Arc::from(
        cli.progress
            .unwrap_or_else(ProgressMode::default_for_tty)
            .reporter(),
    );

    // Commands that don't require config
    if let Commands::Inspect { file, json } = &cli.command {
        logging::init(&config::LoggingConfig::default());
        return inspect::run_inspect(file, *json);
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Store initialized at {}.", cfg.store.path.display());
        }
        Commands::Load { full, dry_run, json } => {
            let cancel = cancel_on_ctrl_c();
            let options = LoadOptions { full, dry_run };
            let report = if dry_run {
                let store = InMemoryStore::new();
                loader::load(&cfg, &store, options, &cancel, progress).await
            } else {
                let pool = db::connect(&cfg).await?;
                migrate::migrate_pool(&pool).await?;
                let store = SqliteStore::new(pool);
                let report = loader::load(&cfg, &store, options, &cancel, progress).await;
                store.close().await;
                report
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.print_human();
            }
            if report.status == LoadStatus::Failed {
                anyhow::bail!(
                    "load of {} failed: {}",
                    report.origin,
                    report.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Commands::Graph { json } => {
            let cancel = cancel_on_ctrl_c();
            inspect::run_graph(&cfg, json, &cancel, progress).await?;
        }
        Commands::Inspect { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
