//! Host manager: the single-host side of every node operation.
//!
//! The host manager:
//! - Allocates local instance ids inside an exclusive section
//! - Refuses launches of images that are not present locally
//! - Guarantees every pull sequence ends with exactly one terminal value

use std::collections::BTreeSet;
use std::sync::Arc;

use emupool_id::{LocalInstanceId, INSTANCE_INDEX_BASE};
use emupool_proto::{DeviceSpec, ImageMap, InstanceMap, Progress};
use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::runtime::{ContainerRuntime, LaunchSpec, ProgressStream, RuntimeError};

/// Host manager.
pub struct HostManager {
    /// Runtime for container operations.
    runtime: Arc<dyn ContainerRuntime>,

    /// Held while a local id is chosen and its instance started.
    launch_lock: Mutex<()>,
}

impl HostManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            launch_lock: Mutex::new(()),
        }
    }

    pub async fn list_images(
        &self,
        registry: Option<&str>,
        pattern: &str,
    ) -> Result<ImageMap, RuntimeError> {
        self.runtime.list_images(registry, pattern).await
    }

    pub async fn list_instances(&self) -> Result<InstanceMap, RuntimeError> {
        self.runtime.list_instances().await
    }

    /// Launches an instance of a local image.
    ///
    /// Returns `None` when the image name is empty, the image is not local,
    /// or every local id below the pool base is taken.
    pub async fn launch(
        &self,
        image_name: &str,
        devices: &[DeviceSpec],
        prefix: &str,
    ) -> Result<Option<LocalInstanceId>, RuntimeError> {
        if image_name.is_empty() {
            warn!("No image name provided");
            return Ok(None);
        }

        if !self.has_local_image(image_name).await? {
            warn!(image = %image_name, "Image not present locally");
            return Ok(None);
        }

        let _guard = self.launch_lock.lock().await;

        let instances = self.runtime.list_instances().await?;
        let Some(local_id) = next_free_id(instances.keys().copied()) else {
            warn!(image = %image_name, "No free instance id left on host");
            return Ok(None);
        };

        let spec = LaunchSpec {
            local_id,
            image_name: image_name.to_string(),
            devices: devices.to_vec(),
            prefix: prefix.to_string(),
        };
        info!(
            instance = %local_id,
            image = %image_name,
            prefix = %prefix,
            "Starting instance"
        );
        self.runtime.start_instance(&spec).await?;

        Ok(Some(local_id))
    }

    pub async fn stop(&self, id: LocalInstanceId) -> Result<(), RuntimeError> {
        info!(instance = %id, "Stopping instance");
        self.runtime.stop_instance(id).await
    }

    /// Deletes a local image. An image that is not present counts as
    /// deleted.
    pub async fn delete_image(&self, image: &str) -> Result<bool, RuntimeError> {
        if image.is_empty() || !self.has_local_image(image).await? {
            debug!(image = %image, "Image already absent");
            return Ok(true);
        }
        let deleted = self.runtime.delete_image(image).await?;
        if deleted {
            info!(image = %image, "Image deleted");
        } else {
            warn!(image = %image, "Image not deleted");
        }
        Ok(deleted)
    }

    /// Pulls an image. The sequence ends right after its first terminal
    /// value; a runtime error or a sequence that stops early yields
    /// `Failure`.
    pub async fn pull(&self, image: &str, registry: Option<&str>, pattern: &str) -> ProgressStream {
        match self.runtime.pull_image(image, registry, pattern).await {
            Ok(inner) => terminated(inner),
            Err(e) => {
                warn!(image = %image, error = %e, "Failed to start pull");
                stream::iter([Progress::FAILURE]).boxed()
            }
        }
    }

    async fn has_local_image(&self, image: &str) -> Result<bool, RuntimeError> {
        let images = self.runtime.list_images(None, image).await?;
        Ok(images.get(image).is_some_and(|location| location.is_local()))
    }
}

/// Smallest id not in use, if one exists below the pool base.
pub fn next_free_id<I>(used: I) -> Option<LocalInstanceId>
where
    I: IntoIterator<Item = LocalInstanceId>,
{
    let used: BTreeSet<u32> = used.into_iter().map(|id| id.value()).collect();
    (0..INSTANCE_INDEX_BASE)
        .find(|candidate| !used.contains(candidate))
        .map(LocalInstanceId::new)
}

fn terminated(inner: ProgressStream) -> ProgressStream {
    stream::unfold(Some(inner), |inner| async move {
        let mut inner = inner?;
        match inner.next().await {
            Some(progress) if progress.is_terminal() => Some((progress, None)),
            Some(progress) => Some((progress, Some(inner))),
            None => Some((Progress::FAILURE, None)),
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use std::time::Duration;

    fn ids(list: &[u32]) -> Vec<LocalInstanceId> {
        list.iter().copied().map(LocalInstanceId::new).collect()
    }

    #[test]
    fn test_next_free_id_fills_gaps() {
        assert_eq!(next_free_id(ids(&[])), Some(LocalInstanceId::new(0)));
        assert_eq!(next_free_id(ids(&[0, 1, 3])), Some(LocalInstanceId::new(2)));
        assert_eq!(next_free_id(ids(&[1, 2])), Some(LocalInstanceId::new(0)));
    }

    #[test]
    fn test_next_free_id_exhausted() {
        let all: Vec<u32> = (0..INSTANCE_INDEX_BASE).collect();
        assert_eq!(next_free_id(ids(&all)), None);
    }

    fn host(runtime: MockRuntime) -> HostManager {
        HostManager::new(Arc::new(runtime.with_step_delay(Duration::ZERO)))
    }

    #[tokio::test]
    async fn test_launch_allocates_sequential_ids() {
        let host = host(MockRuntime::new().with_local_image("img"));
        assert_eq!(host.launch("img", &[], "").await.unwrap(), Some(LocalInstanceId::new(0)));
        assert_eq!(host.launch("img", &[], "").await.unwrap(), Some(LocalInstanceId::new(1)));

        host.stop(LocalInstanceId::new(0)).await.unwrap();
        assert_eq!(host.launch("img", &[], "").await.unwrap(), Some(LocalInstanceId::new(0)));
    }

    #[tokio::test]
    async fn test_concurrent_launches_get_distinct_ids() {
        let host = Arc::new(host(MockRuntime::new().with_local_image("img")));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let host = Arc::clone(&host);
            handles.push(tokio::spawn(async move { host.launch("img", &[], "").await }));
        }
        let mut seen = BTreeSet::new();
        for handle in handles {
            let id = handle.await.unwrap().unwrap().unwrap();
            assert!(seen.insert(id));
        }
        assert_eq!(seen.len(), 8);
    }

    #[tokio::test]
    async fn test_launch_refuses_missing_image() {
        let host = host(MockRuntime::new().with_registry_image("img"));
        assert_eq!(host.launch("img", &[], "").await.unwrap(), None);
        assert_eq!(host.launch("", &[], "").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_absent_image_succeeds() {
        let host = host(MockRuntime::new());
        assert!(host.delete_image("img").await.unwrap());
    }

    #[tokio::test]
    async fn test_pull_appends_failure_when_stream_ends_early() {
        let host = host(MockRuntime::new().with_scripted_pull(
            "img",
            vec![Progress::downloading(10), Progress::downloading(20)],
        ));
        let steps: Vec<Progress> = host.pull("img", Some("registry"), "").await.collect().await;
        assert_eq!(
            steps,
            vec![Progress::downloading(10), Progress::downloading(20), Progress::FAILURE]
        );
    }

    #[tokio::test]
    async fn test_pull_stops_after_first_terminal() {
        let host = host(MockRuntime::new().with_scripted_pull(
            "img",
            vec![Progress::downloading(10), Progress::FAILURE, Progress::COMPLETE],
        ));
        let steps: Vec<Progress> = host.pull("img", Some("registry"), "").await.collect().await;
        assert_eq!(steps, vec![Progress::downloading(10), Progress::FAILURE]);
    }

    #[tokio::test]
    async fn test_pull_unknown_image_fails() {
        let host = host(MockRuntime::new());
        let steps: Vec<Progress> = host.pull("img", Some("registry"), "").await.collect().await;
        assert_eq!(steps, vec![Progress::FAILURE]);
    }
}
