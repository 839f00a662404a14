//! Configuration for the node agent.

use std::net::SocketAddr;

use anyhow::{Context, Result};

/// Node agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the control surface listens on.
    pub listen_addr: SocketAddr,

    /// Public host name used in instance links and shell commands.
    pub hostname: String,

    /// Images the development runtime pretends the registry holds.
    pub registry_images: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("EMUPOOL_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:5000".to_string())
            .parse()
            .context("EMUPOOL_LISTEN_ADDR is not a socket address")?;

        let hostname = std::env::var("EMUPOOL_HOSTNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "localhost".to_string());

        let registry_images = std::env::var("EMUPOOL_REGISTRY_IMAGES")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        let log_level =
            std::env::var("EMUPOOL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            hostname,
            registry_images,
            log_level,
        })
    }
}

/// Splits a comma-separated list, dropping empty items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
