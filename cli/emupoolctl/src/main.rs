//! emupoolctl - CLI for an emulator pool
//!
//! Talks to every host of the pool directly: the master's node surface is
//! node 0, the configured peers follow.

use anyhow::Result;
use clap::Parser;

mod commands;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
