//! CLI commands.

mod images;
mod instances;
mod nodes;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use emupool_control_plane::{LeastLoaded, Node, PoolManager, RemoteNode};
use emupool_reconcile::{ImageCatalog, DEFAULT_BUILD_TYPES};
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// emupool CLI - operate a pool of emulator hosts.
#[derive(Debug, Parser)]
#[command(name = "emupoolctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Node surface of the master host (node 0).
    #[arg(long, global = true, env = "EMUPOOL_MASTER", default_value = "http://127.0.0.1:5000")]
    master: String,

    /// Peer node URLs, comma separated (nodes 1..N).
    #[arg(long, global = true, env = "EMUPOOL_POOL_NODES", value_delimiter = ',')]
    nodes: Vec<String>,

    /// Registry to pull from and list remote images of.
    #[arg(long, global = true, env = "EMUPOOL_DOCKER_REGISTRY")]
    registry: Option<String>,

    /// Image families, comma separated.
    #[arg(
        long,
        global = true,
        env = "EMUPOOL_IMAGE_PATTERNS",
        value_delimiter = ',',
        default_value = "cloud_android,cloud_cluster"
    )]
    patterns: Vec<String>,

    /// Per-request timeout in seconds.
    #[arg(long, global = true, default_value = "30")]
    timeout: u64,

    /// Log pool activity to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the nodes of the pool.
    Nodes,

    /// List images.
    Ls(images::LsArgs),

    /// List running instances.
    Ps,

    /// Start an instance.
    Start(instances::StartArgs),

    /// Stop an instance.
    Stop(instances::StopArgs),

    /// Pull an image on every node.
    Pull(images::PullArgs),

    /// Delete an image from every node.
    Drop(images::DropArgs),

    /// Sync every node's images to a reference node.
    Sync(sync::SyncArgs),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let filter = if self.verbose { "debug" } else { "error" };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
            .with_writer(std::io::stderr)
            .try_init();

        let ctx = CommandContext::new(&self);

        match self.command {
            Commands::Nodes => nodes::list(ctx).await,
            Commands::Ls(args) => images::ls(ctx, args).await,
            Commands::Ps => instances::ps(ctx).await,
            Commands::Start(args) => instances::start(ctx, args).await,
            Commands::Stop(args) => instances::stop(ctx, args).await,
            Commands::Pull(args) => images::pull(ctx, args).await,
            Commands::Drop(args) => images::drop(ctx, args).await,
            Commands::Sync(args) => sync::run(ctx, args).await,
            Commands::Version => {
                println!("emupoolctl {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub pool: PoolManager,
    pub format: OutputFormat,
    pub registry: Option<String>,
    pub catalog: ImageCatalog,
}

impl CommandContext {
    fn new(cli: &Cli) -> Self {
        let timeout = Duration::from_secs(cli.timeout);
        // Pulls outlive ordinary requests.
        let pull_timeout = timeout.max(Duration::from_secs(3600));
        let node = |url: &str| -> Arc<dyn Node> {
            Arc::new(RemoteNode::new(url, timeout, pull_timeout))
        };

        let peers = cli
            .nodes
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(|url| node(url))
            .collect();
        let pool = PoolManager::new(
            node(&cli.master),
            peers,
            Box::new(LeastLoaded::default()),
            None,
        );

        Self {
            pool,
            format: OutputFormat::parse(&cli.format),
            registry: cli.registry.clone().filter(|r| !r.is_empty()),
            catalog: ImageCatalog::new(cli.patterns.clone(), DEFAULT_BUILD_TYPES),
        }
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }
}
