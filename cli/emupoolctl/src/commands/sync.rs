//! Cluster sync command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use emupool_id::NodeIndex;
use futures_util::StreamExt;

use crate::error::CliError;
use crate::output::{print_info, print_success};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Image family to sync; every configured family when omitted.
    #[arg(long)]
    pattern: Option<String>,

    /// Node whose image set the others converge to.
    #[arg(long, default_value = "0")]
    reference: NodeIndex,
}

pub async fn run(ctx: CommandContext, args: SyncArgs) -> Result<()> {
    if ctx.pool.node(args.reference).is_none() {
        return Err(CliError::UnknownNode(args.reference.value()).into());
    }

    let patterns = match args.pattern {
        Some(pattern) => vec![pattern],
        None => ctx.catalog.patterns().to_vec(),
    };

    let mut failures = 0;
    for pattern in &patterns {
        print_info(&format!("Syncing {pattern} to node {}", args.reference));
        let mut statuses = ctx.pool.sync(ctx.registry(), pattern, args.reference);
        while let Some(status) = statuses.next().await {
            if status.succeeded() {
                println!("{status}");
            } else {
                failures += 1;
                println!("{status} {}", "(failed)".red());
            }
        }
    }

    if failures > 0 {
        return Err(CliError::SyncIncomplete { failures }.into());
    }
    print_success("Sync finished");
    Ok(())
}
