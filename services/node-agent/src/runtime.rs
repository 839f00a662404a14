//! Container runtime interface and mock implementation.
//!
//! The runtime interface abstracts single-host container operations:
//! - Listing local and registry images
//! - Starting/stopping emulator instances
//! - Pulling and deleting images
//!
//! A mock implementation is provided for testing and development.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use emupool_id::LocalInstanceId;
use emupool_proto::{DeviceSpec, ImageLocation, ImageMap, InstanceInfo, InstanceMap, Progress};
use futures_util::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Lazy, finite sequence of progress values for one pull.
pub type ProgressStream = BoxStream<'static, Progress>;

pub const GRPC_PORT_BASE: u16 = 8443;
pub const SHELL_PORT_BASE: u16 = 9555;
pub const TELNET_PORT_BASE: u16 = 10555;

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(LocalInstanceId),

    #[error("instance already running: {0}")]
    InstanceExists(LocalInstanceId),

    #[error("runtime failure: {0}")]
    Internal(String),
}

/// Everything needed to start one instance.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub local_id: LocalInstanceId,
    pub image_name: String,
    pub devices: Vec<DeviceSpec>,
    /// Prefix for container and network names.
    pub prefix: String,
}

impl LaunchSpec {
    pub fn net_name(&self) -> String {
        format!("{}emulator_envoymesh_{}", self.prefix, self.local_id)
    }
}

/// Container runtime interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Local images matching `pattern`, plus registry images as `Remote`
    /// when a registry is given. A local entry wins over a remote one.
    async fn list_images(&self, registry: Option<&str>, pattern: &str)
        -> Result<ImageMap, RuntimeError>;

    /// Running instances keyed by local id.
    async fn list_instances(&self) -> Result<InstanceMap, RuntimeError>;

    /// Starts the containers of one instance.
    async fn start_instance(&self, spec: &LaunchSpec) -> Result<InstanceInfo, RuntimeError>;

    /// Stops and removes the containers of one instance.
    async fn stop_instance(&self, id: LocalInstanceId) -> Result<(), RuntimeError>;

    /// Removes a local image. Returns whether it is gone afterwards.
    async fn delete_image(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Starts pulling an image from the registry.
    async fn pull_image(
        &self,
        image: &str,
        registry: Option<&str>,
        pattern: &str,
    ) -> Result<ProgressStream, RuntimeError>;
}

#[derive(Debug, Default)]
struct MockState {
    /// Local image name -> digest.
    local: BTreeMap<String, String>,
    registry: BTreeSet<String>,
    instances: InstanceMap,
    scripted_pulls: HashMap<String, Vec<Progress>>,
    failing_deletes: BTreeSet<String>,
    /// Image name -> pulls left that end in `Failure`.
    failing_pulls: HashMap<String, usize>,
    pull_counts: HashMap<String, usize>,
}

/// Mock runtime for testing and development.
///
/// Registry images are served whenever a registry is passed, whatever its
/// address. Clones share their state.
#[derive(Clone)]
pub struct MockRuntime {
    hostname: String,
    state: Arc<RwLock<MockState>>,
    digest_counter: Arc<AtomicU64>,
    step_delay: Duration,
}

impl MockRuntime {
    /// Create an empty mock runtime.
    pub fn new() -> Self {
        Self {
            hostname: "localhost".to_string(),
            state: Arc::new(RwLock::new(MockState::default())),
            digest_counter: Arc::new(AtomicU64::new(1)),
            step_delay: Duration::from_millis(5),
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Delay between two progress values of a pull.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn with_local_image(self, name: impl Into<String>) -> Self {
        let digest = next_digest(&self.digest_counter);
        let name = name.into();
        self.seed(|state| {
            state.local.insert(name, digest);
        })
    }

    pub fn with_registry_image(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.seed(|state| {
            state.registry.insert(name);
        })
    }

    /// Replaces the default progress sequence of a pull. The image becomes
    /// local when the script reaches `Complete`.
    pub fn with_scripted_pull(self, name: impl Into<String>, steps: Vec<Progress>) -> Self {
        let name = name.into();
        self.seed(|state| {
            state.scripted_pulls.insert(name, steps);
        })
    }

    /// Makes the next `attempts` pulls of `name` end in `Failure`. Later
    /// pulls follow the usual sequence.
    pub fn with_failing_pulls(self, name: impl Into<String>, attempts: usize) -> Self {
        let name = name.into();
        self.seed(|state| {
            state.failing_pulls.insert(name, attempts);
        })
    }

    /// Makes deletion of `name` report failure.
    pub fn with_failing_delete(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.seed(|state| {
            state.failing_deletes.insert(name);
        })
    }

    fn seed(self, f: impl FnOnce(&mut MockState)) -> Self {
        if let Ok(mut state) = self.state.try_write() {
            f(&mut state);
        }
        self
    }

    /// Names of the local images.
    pub async fn local_images(&self) -> Vec<String> {
        self.state.read().await.local.keys().cloned().collect()
    }

    /// Pull requests seen for `image`, failed ones included.
    pub async fn pull_count(&self, image: &str) -> usize {
        self.state
            .read()
            .await
            .pull_counts
            .get(image)
            .copied()
            .unwrap_or(0)
    }

    pub async fn instance_count(&self) -> usize {
        self.state.read().await.instances.len()
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn next_digest(counter: &AtomicU64) -> String {
    let n = counter.fetch_add(1, Ordering::SeqCst);
    format!("sha256:{:012x}", n)
}

fn default_pull_steps() -> Vec<Progress> {
    vec![
        Progress::downloading(0),
        Progress::downloading(50),
        Progress::downloading(100),
        Progress::extracting(50),
        Progress::extracting(100),
        Progress::COMPLETE,
    ]
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_images(
        &self,
        registry: Option<&str>,
        pattern: &str,
    ) -> Result<ImageMap, RuntimeError> {
        let state = self.state.read().await;
        let mut images: ImageMap = state
            .local
            .iter()
            .filter(|(name, _)| name.contains(pattern))
            .map(|(name, digest)| (name.clone(), ImageLocation::local(digest.clone())))
            .collect();

        if registry.is_some() {
            for name in state.registry.iter().filter(|name| name.contains(pattern)) {
                images
                    .entry(name.clone())
                    .or_insert(ImageLocation::Remote);
            }
        }

        Ok(images)
    }

    async fn list_instances(&self) -> Result<InstanceMap, RuntimeError> {
        Ok(self.state.read().await.instances.clone())
    }

    async fn start_instance(&self, spec: &LaunchSpec) -> Result<InstanceInfo, RuntimeError> {
        let mut state = self.state.write().await;
        if !state.local.contains_key(&spec.image_name) {
            return Err(RuntimeError::ImageNotFound(spec.image_name.clone()));
        }
        if state.instances.contains_key(&spec.local_id) {
            return Err(RuntimeError::InstanceExists(spec.local_id));
        }

        let id = spec.local_id.value();
        let offset = u16::try_from(id)
            .map_err(|_| RuntimeError::Internal(format!("no port range for instance {id}")))?;
        let host = self.hostname.to_lowercase();

        info!(
            instance = id,
            image = %spec.image_name,
            devices = spec.devices.len(),
            "[MOCK] Starting instance"
        );

        let info = InstanceInfo {
            id,
            image_name: spec.image_name.clone(),
            healthy: true,
            net_name: spec.net_name(),
            link: format!("http://{host}/instance/{id}"),
            shell: format!("adb connect {host}:{}", SHELL_PORT_BASE + offset),
            telnet: format!("telnet {host} {}", TELNET_PORT_BASE + offset),
            hostname: host,
            port: GRPC_PORT_BASE + offset,
            devices: spec
                .devices
                .iter()
                .map(|dev| format!("{}@local/{}", dev.vid_pid, dev.path))
                .collect(),
            containers: vec![format!("{}emulator_titan_{}", spec.prefix, id)],
        };
        state.instances.insert(spec.local_id, info.clone());
        Ok(info)
    }

    async fn stop_instance(&self, id: LocalInstanceId) -> Result<(), RuntimeError> {
        info!(instance = %id, "[MOCK] Stopping instance");
        self.state
            .write()
            .await
            .instances
            .remove(&id)
            .map(|_| ())
            .ok_or(RuntimeError::InstanceNotFound(id))
    }

    async fn delete_image(&self, image: &str) -> Result<bool, RuntimeError> {
        let mut state = self.state.write().await;
        if state.failing_deletes.contains(image) {
            debug!(image, "[MOCK] Refusing to delete image");
            return Ok(false);
        }
        state.local.remove(image);
        Ok(true)
    }

    async fn pull_image(
        &self,
        image: &str,
        registry: Option<&str>,
        _pattern: &str,
    ) -> Result<ProgressStream, RuntimeError> {
        let steps = {
            let mut state = self.state.write().await;
            *state.pull_counts.entry(image.to_string()).or_default() += 1;
            let failing = state
                .failing_pulls
                .get_mut(image)
                .filter(|left| **left > 0)
                .map(|left| *left -= 1)
                .is_some();

            if failing {
                vec![Progress::downloading(10), Progress::FAILURE]
            } else if let Some(script) = state.scripted_pulls.get(image) {
                script.clone()
            } else if state.local.contains_key(image) {
                return Ok(stream::iter([Progress::COMPLETE]).boxed());
            } else if registry.is_some() && state.registry.contains(image) {
                default_pull_steps()
            } else {
                return Err(RuntimeError::ImageNotFound(image.to_string()));
            }
        };

        info!(image, steps = steps.len(), "[MOCK] Pulling image");

        let (tx, rx) = mpsc::channel(1);
        let state = Arc::clone(&self.state);
        let counter = Arc::clone(&self.digest_counter);
        let delay = self.step_delay;
        let image = image.to_string();

        tokio::spawn(async move {
            for step in steps {
                tokio::time::sleep(delay).await;
                if step == Progress::COMPLETE {
                    let digest = next_digest(&counter);
                    state.write().await.local.insert(image.clone(), digest);
                }
                if tx.send(step).await.is_err() {
                    break;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: u32, image: &str) -> LaunchSpec {
        LaunchSpec {
            local_id: LocalInstanceId::new(id),
            image_name: image.to_string(),
            devices: vec![],
            prefix: "t_".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_list_images_prefers_local() {
        let runtime = MockRuntime::new()
            .with_local_image("cloud_android_a")
            .with_registry_image("cloud_android_a")
            .with_registry_image("cloud_android_b")
            .with_registry_image("other");

        let images = runtime.list_images(Some("registry"), "cloud_android").await.unwrap();
        assert_eq!(images.len(), 2);
        assert!(images["cloud_android_a"].is_local());
        assert!(images["cloud_android_b"].is_remote());

        let images = runtime.list_images(None, "cloud_android").await.unwrap();
        assert_eq!(images.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_start_and_stop() {
        let runtime = MockRuntime::new().with_local_image("img");

        let info = runtime.start_instance(&spec(3, "img")).await.unwrap();
        assert_eq!(info.port, GRPC_PORT_BASE + 3);
        assert_eq!(info.net_name, "t_emulator_envoymesh_3");
        assert!(matches!(
            runtime.start_instance(&spec(3, "img")).await,
            Err(RuntimeError::InstanceExists(_))
        ));

        runtime.stop_instance(LocalInstanceId::new(3)).await.unwrap();
        assert_eq!(runtime.instance_count().await, 0);
        assert!(runtime.stop_instance(LocalInstanceId::new(3)).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_start_requires_image() {
        let runtime = MockRuntime::new();
        assert!(matches!(
            runtime.start_instance(&spec(0, "missing")).await,
            Err(RuntimeError::ImageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_pull_makes_image_local() {
        let runtime = MockRuntime::new()
            .with_step_delay(Duration::ZERO)
            .with_registry_image("img");

        let steps: Vec<Progress> = runtime
            .pull_image("img", Some("registry"), "")
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(steps.last(), Some(&Progress::COMPLETE));
        assert_eq!(runtime.local_images().await, vec!["img".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_failing_pulls_recover() {
        let runtime = MockRuntime::new()
            .with_step_delay(Duration::ZERO)
            .with_registry_image("img")
            .with_failing_pulls("img", 1);

        let first: Vec<Progress> = runtime
            .pull_image("img", Some("registry"), "")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(first.last(), Some(&Progress::FAILURE));
        assert!(runtime.local_images().await.is_empty());

        let second: Vec<Progress> = runtime
            .pull_image("img", Some("registry"), "")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(second.last(), Some(&Progress::COMPLETE));
        assert_eq!(runtime.pull_count("img").await, 2);
        assert_eq!(runtime.pull_count("other").await, 0);
    }

    #[tokio::test]
    async fn test_mock_pull_unknown_image() {
        let runtime = MockRuntime::new();
        assert!(runtime.pull_image("img", Some("registry"), "").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_failing_delete() {
        let runtime = MockRuntime::new()
            .with_local_image("img")
            .with_failing_delete("img");
        assert!(!runtime.delete_image("img").await.unwrap());
        assert_eq!(runtime.local_images().await.len(), 1);
    }
}
