//! Nodes of a pool.
//!
//! A node is one emulator host. The pool talks to every host through the
//! [`Node`] trait:
//!
//! - [`LocalNode`]: the master host, calling its host manager in-process
//! - [`RemoteNode`]: a peer host, reached over its HTTP control surface
//!
//! Node methods never fail. A host that cannot answer yields an empty
//! result, which callers must read as "unknown", not as "zero".

mod local;
mod remote;

use std::fmt;

use async_trait::async_trait;
use emupool_id::LocalInstanceId;
use emupool_node_agent::ProgressStream;
use emupool_proto::{DeviceSpec, ImageMap, InstanceMap};
use serde::Serialize;

pub use local::LocalNode;
pub use remote::{PullTracker, RemoteNode};

/// Reachability of a node, as seen by its last request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    pub fn is_online(&self) -> bool {
        matches!(self, Availability::Online)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Online => f.write_str("ONLINE"),
            Availability::Offline => f.write_str("OFFLINE"),
        }
    }
}

/// One emulator host.
#[async_trait]
pub trait Node: Send + Sync {
    /// Where the node is reached; informational.
    fn endpoint(&self) -> &str;

    fn availability(&self) -> Availability;

    /// Image name to digest, or `Remote` for registry-only images.
    async fn list_images(&self, registry: Option<&str>, pattern: &str) -> ImageMap;

    /// Running instances keyed by the node's local id.
    async fn list_containers(&self) -> InstanceMap;

    /// Starts an instance; `None` when the node did not start one.
    async fn start_image(
        &self,
        image_name: &str,
        devices: &[DeviceSpec],
        prefix: &str,
    ) -> Option<LocalInstanceId>;

    async fn stop_container(&self, id: LocalInstanceId);

    /// Returns true when the image is gone from the node.
    async fn delete_image(&self, image: &str) -> bool;

    /// Pulls an image. The sequence is finite and its last value is
    /// `Complete` or `Failure`.
    async fn pull(&self, image: &str, registry: Option<&str>, pattern: &str) -> ProgressStream;
}
