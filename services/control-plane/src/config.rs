//! Configuration for the control plane.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use emupool_node_agent::config::split_list;
use emupool_reconcile::{ImageCatalog, DEFAULT_BUILD_TYPES, DEFAULT_PATTERNS};

use crate::balancing::DEFAULT_MAX_INSTANCES_PER_NODE;
use crate::refresh::DailySchedule;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the master's own node surface listens on.
    pub listen_addr: SocketAddr,

    /// Peer node URLs; node 1 is the first entry.
    pub pool_nodes: Vec<String>,

    /// Registry images are pulled from. `None` lists local images only.
    pub docker_registry: Option<String>,

    pub max_instances_per_node: usize,

    /// Primary image family; its instance links go through `hostname`.
    pub titan_image_pattern: String,

    pub cluster_image_pattern: String,

    pub image_build_types: Vec<String>,

    pub scheduler_job_hour: u32,
    pub scheduler_job_minute: u32,

    /// Public host name of the master, if instance links should use it.
    pub hostname: Option<String>,

    pub request_timeout: Duration,
    pub pull_timeout: Duration,

    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("EMUPOOL_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:5000".to_string())
            .parse()
            .context("EMUPOOL_LISTEN_ADDR is not a socket address")?;

        let pool_nodes = std::env::var("EMUPOOL_POOL_NODES")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        let docker_registry = non_empty("EMUPOOL_DOCKER_REGISTRY");

        let titan_image_pattern = std::env::var("EMUPOOL_TITAN_IMAGE_PATTERN")
            .unwrap_or_else(|_| DEFAULT_PATTERNS[0].to_string());
        let cluster_image_pattern = std::env::var("EMUPOOL_CLUSTER_IMAGE_PATTERN")
            .unwrap_or_else(|_| DEFAULT_PATTERNS[1].to_string());

        let image_build_types = std::env::var("EMUPOOL_IMAGE_BUILD_TYPES")
            .map(|raw| split_list(&raw))
            .unwrap_or_else(|_| DEFAULT_BUILD_TYPES.iter().map(|s| s.to_string()).collect());

        let scheduler_job_hour = parsed("EMUPOOL_SCHEDULER_JOB_HOUR", 3)?;
        let scheduler_job_minute = parsed("EMUPOOL_SCHEDULER_JOB_MINUTE", 30)?;
        if DailySchedule::new(scheduler_job_hour, scheduler_job_minute).is_none() {
            return Err(anyhow!(
                "invalid refresh time {scheduler_job_hour}:{scheduler_job_minute:02}"
            ));
        }

        let log_level =
            std::env::var("EMUPOOL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            pool_nodes,
            docker_registry,
            max_instances_per_node: parsed(
                "EMUPOOL_MAX_INSTANCES_PER_NODE",
                DEFAULT_MAX_INSTANCES_PER_NODE,
            )?,
            titan_image_pattern,
            cluster_image_pattern,
            image_build_types,
            scheduler_job_hour,
            scheduler_job_minute,
            hostname: non_empty("EMUPOOL_HOSTNAME"),
            request_timeout: Duration::from_secs(parsed("EMUPOOL_REQUEST_TIMEOUT_SECS", 30)?),
            pull_timeout: Duration::from_secs(parsed("EMUPOOL_PULL_TIMEOUT_SECS", 3600)?),
            log_level,
        })
    }

    /// Image families in refresh order, primary first.
    pub fn catalog(&self) -> ImageCatalog {
        ImageCatalog::new(
            [
                self.titan_image_pattern.clone(),
                self.cluster_image_pattern.clone(),
            ],
            self.image_build_types.clone(),
        )
    }

    pub fn schedule(&self) -> Option<DailySchedule> {
        DailySchedule::new(self.scheduler_job_hour, self.scheduler_job_minute)
    }
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
