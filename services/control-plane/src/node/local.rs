use std::sync::Arc;

use async_trait::async_trait;
use emupool_id::LocalInstanceId;
use emupool_node_agent::{HostManager, ProgressStream};
use emupool_proto::{DeviceSpec, ImageMap, InstanceMap};
use tracing::warn;

use super::{Availability, Node};

/// Endpoint reported for the in-process master host.
pub const LOCAL_ENDPOINT: &str = "local-self-node";

/// The master host, co-located with the pool manager.
///
/// Always online: runtime failures surface as empty results.
pub struct LocalNode {
    host: Arc<HostManager>,
}

impl LocalNode {
    pub fn new(host: Arc<HostManager>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Node for LocalNode {
    fn endpoint(&self) -> &str {
        LOCAL_ENDPOINT
    }

    fn availability(&self) -> Availability {
        Availability::Online
    }

    async fn list_images(&self, registry: Option<&str>, pattern: &str) -> ImageMap {
        self.host
            .list_images(registry, pattern)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to list local images");
                ImageMap::new()
            })
    }

    async fn list_containers(&self) -> InstanceMap {
        self.host.list_instances().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to list local instances");
            InstanceMap::new()
        })
    }

    async fn start_image(
        &self,
        image_name: &str,
        devices: &[DeviceSpec],
        prefix: &str,
    ) -> Option<LocalInstanceId> {
        match self.host.launch(image_name, devices, prefix).await {
            Ok(id) => id,
            Err(e) => {
                warn!(image = %image_name, error = %e, "Failed to start local instance");
                None
            }
        }
    }

    async fn stop_container(&self, id: LocalInstanceId) {
        if let Err(e) = self.host.stop(id).await {
            warn!(instance = %id, error = %e, "Failed to stop local instance");
        }
    }

    async fn delete_image(&self, image: &str) -> bool {
        self.host.delete_image(image).await.unwrap_or_else(|e| {
            warn!(image = %image, error = %e, "Failed to delete local image");
            false
        })
    }

    async fn pull(&self, image: &str, registry: Option<&str>, pattern: &str) -> ProgressStream {
        self.host.pull(image, registry, pattern).await
    }
}
