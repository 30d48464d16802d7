//! Command-line interface for inspecting and resetting a local readgate store.

mod cache;
mod usage;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use readgate::{Config, Gate};

#[derive(Parser, Debug)]
#[command(name = "readgate")]
#[command(version)]
#[command(about = "Inspect the readgate cache and database usage counters", long_about = None)]
pub(crate) struct Cli {
    /// Emit logs and command output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Store file to operate on (defaults to ~/.readgate/store.json)
    #[arg(long, global = true)]
    pub store: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Show cache size and hit/miss statistics
    Stats,
    /// Show today's read/write counters against the daily read limit
    Usage,
    /// Reset the usage counters (also clears the cache)
    Reset,
    /// Remove cached entries
    Clear {
        /// Only remove keys matching this regular expression
        #[arg(long)]
        pattern: Option<String>,
    },
    /// List cached keys
    Keys,
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub(crate) fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("readgate=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load().with_context(|| "Failed to load configuration")?;
    if let Some(path) = cli.store {
        config.store_path = Some(path);
    }

    let gate = Gate::open_default(config)
        .await
        .with_context(|| "Failed to open the readgate store")?;
    gate.cache().wait_loaded().await;

    let output = match cli.command {
        Commands::Stats => cache::cmd_stats(&gate, cli.json)?,
        Commands::Keys => cache::cmd_keys(&gate, cli.json)?,
        Commands::Clear { pattern } => cache::cmd_clear(&gate, pattern.as_deref())?,
        Commands::Usage => usage::cmd_usage(&gate, cli.json)?,
        Commands::Reset => usage::cmd_reset(&gate),
    };
    println!("{}", output);

    gate.shutdown().await;
    Ok(())
}
