//! Readgate debug CLI.

mod cli;

use anyhow::Result;
use clap::Parser;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; missing file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    cli::init_logging(cli.json);
    cli::run(cli).await
}
