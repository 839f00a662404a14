//! Pool manager: many nodes behind one address space.
//!
//! Node 0 is the master. Instances are addressed pool-wide by
//! [`PoolInstanceId`]; every operation is relayed to the nodes, the pool
//! keeps no state of its own.

mod aggregate;
mod merge;

use std::collections::BTreeMap;
use std::sync::Arc;

use emupool_id::{NodeIndex, PoolInstanceId};
use emupool_node_agent::ProgressStream;
use emupool_proto::{DeviceSpec, ImageMap, InstanceInfo};
use futures_util::future::join_all;
use futures_util::stream::BoxStream;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::balancing::{BalancingStrategy, LeastLoaded};
use crate::config::Config;
use crate::node::{Availability, Node, RemoteNode};
use crate::sync::{self, SyncStatus};

pub use aggregate::{aggregate, pull_all};
pub use merge::merge_image_views;

/// Running instances of the whole pool.
pub type PoolInstanceMap = BTreeMap<PoolInstanceId, InstanceInfo>;

/// Rewrites instance links to go through a public hostname.
#[derive(Debug, Clone)]
pub struct LinkRewrite {
    /// Public hostname of the master.
    pub hostname: String,
    /// Only instances whose image name contains this are rewritten.
    pub pattern: String,
}

impl LinkRewrite {
    fn apply(&self, id: PoolInstanceId, info: &mut InstanceInfo) {
        if info.image_name.contains(&self.pattern) {
            info.link = format!("http://{}/instance/{}", self.hostname, id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Slave,
}

/// One row of [`PoolManager::nodes_info`].
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub id: NodeIndex,
    pub url: String,
    pub role: NodeRole,
    pub state: Availability,
}

struct PoolInner {
    nodes: Vec<Arc<dyn Node>>,
    strategy: Box<dyn BalancingStrategy>,
    link_rewrite: Option<LinkRewrite>,
}

/// Pool manager. Cheap to clone; clones share the nodes.
#[derive(Clone)]
pub struct PoolManager {
    inner: Arc<PoolInner>,
}

impl PoolManager {
    /// Creates a pool with `master` at index 0 followed by `peers`.
    pub fn new(
        master: Arc<dyn Node>,
        peers: Vec<Arc<dyn Node>>,
        strategy: Box<dyn BalancingStrategy>,
        link_rewrite: Option<LinkRewrite>,
    ) -> Self {
        let mut nodes = Vec::with_capacity(peers.len() + 1);
        nodes.push(master);
        nodes.extend(peers);
        Self {
            inner: Arc::new(PoolInner {
                nodes,
                strategy,
                link_rewrite,
            }),
        }
    }

    /// Creates the pool described by `config` around `master`.
    pub fn from_config(config: &Config, master: Arc<dyn Node>) -> Self {
        let peers: Vec<Arc<dyn Node>> = config
            .pool_nodes
            .iter()
            .map(|url| {
                Arc::new(RemoteNode::new(
                    url.as_str(),
                    config.request_timeout,
                    config.pull_timeout,
                )) as Arc<dyn Node>
            })
            .collect();
        let link_rewrite = config.hostname.as_ref().map(|hostname| LinkRewrite {
            hostname: hostname.clone(),
            pattern: config.titan_image_pattern.clone(),
        });
        Self::new(
            master,
            peers,
            Box::new(LeastLoaded::new(config.max_instances_per_node)),
            link_rewrite,
        )
    }

    pub fn nodes(&self) -> &[Arc<dyn Node>] {
        &self.inner.nodes
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Arc<dyn Node>> {
        self.inner.nodes.get(index.as_usize())
    }

    fn indexed(&self) -> impl Iterator<Item = (NodeIndex, &Arc<dyn Node>)> {
        self.inner
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeIndex::new(i as u32), node))
    }

    /// Image view of every node, in node order.
    pub async fn node_image_views(&self, registry: Option<&str>, pattern: &str) -> Vec<ImageMap> {
        join_all(
            self.inner
                .nodes
                .iter()
                .map(|node| node.list_images(registry, pattern)),
        )
        .await
    }

    /// Pool-wide image view; see [`merge_image_views`].
    pub async fn list_images(&self, registry: Option<&str>, pattern: &str) -> ImageMap {
        merge_image_views(&self.node_image_views(registry, pattern).await)
    }

    pub async fn list_containers(&self) -> PoolInstanceMap {
        let per_node = join_all(self.inner.nodes.iter().map(|node| node.list_containers())).await;

        let mut instances = PoolInstanceMap::new();
        for ((node_index, _), containers) in self.indexed().zip(per_node) {
            for (local_id, mut info) in containers {
                let id = match PoolInstanceId::encode(node_index, local_id) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(
                            node = %node_index,
                            instance = %local_id,
                            error = %e,
                            "Skipping instance"
                        );
                        continue;
                    }
                };
                info.id = id.value();
                if let Some(rewrite) = &self.inner.link_rewrite {
                    rewrite.apply(id, &mut info);
                }
                instances.insert(id, info);
            }
        }
        instances
    }

    /// Starts an instance somewhere in the pool.
    ///
    /// Instances with devices always land on the master. Otherwise only
    /// nodes that have the image locally are candidates. `None` means no
    /// capacity.
    pub async fn start_image(
        &self,
        image_name: &str,
        devices: &[DeviceSpec],
        prefix: &str,
    ) -> Option<PoolInstanceId> {
        let target = if devices.is_empty() {
            self.place(image_name).await?
        } else {
            debug!(image = %image_name, devices = devices.len(), "Devices requested, using master");
            NodeIndex::MASTER
        };

        let node = self.node(target)?;
        let local_id = node.start_image(image_name, devices, prefix).await?;
        match PoolInstanceId::encode(target, local_id) {
            Ok(id) => {
                info!(node = %target, instance = %id, image = %image_name, "Instance started");
                Some(id)
            }
            Err(e) => {
                warn!(
                    node = %target,
                    instance = %local_id,
                    error = %e,
                    "Node returned unusable id"
                );
                None
            }
        }
    }

    async fn place(&self, image_name: &str) -> Option<NodeIndex> {
        let candidates: Vec<(NodeIndex, &Arc<dyn Node>)> = {
            let views =
                join_all(self.indexed().map(|(_, node)| node.list_images(None, image_name))).await;
            self.indexed()
                .zip(views)
                .filter(|(_, view)| view.get(image_name).is_some_and(|l| l.is_local()))
                .map(|(candidate, _)| candidate)
                .collect()
        };

        let counts = join_all(candidates.iter().map(|(_, node)| node.list_containers())).await;
        let load: BTreeMap<NodeIndex, usize> = candidates
            .iter()
            .zip(counts)
            .filter(|((_, node), _)| node.availability().is_online())
            .map(|((index, _), containers)| (*index, containers.len()))
            .collect();

        let selected = self.inner.strategy.select_node(&load);
        if selected.is_none() {
            info!(image = %image_name, candidates = load.len(), "No node can take the instance");
        }
        selected
    }

    pub async fn stop_container(&self, id: PoolInstanceId) {
        let (node_index, local_id) = id.decode();
        match self.node(node_index) {
            Some(node) => node.stop_container(local_id).await,
            None => warn!(instance = %id, node = %node_index, "Stop for unknown node"),
        }
    }

    /// Deletes an image on every node. True only if every node succeeded.
    pub async fn delete_image(&self, image: &str) -> bool {
        let results = join_all(self.inner.nodes.iter().map(|node| node.delete_image(image))).await;
        let deleted = results.iter().all(|ok| *ok);
        if !deleted {
            warn!(
                image = %image,
                failed = results.iter().filter(|ok| !**ok).count(),
                "Image not deleted on every node"
            );
        }
        deleted
    }

    /// Pulls an image on every node; see [`pull_all`].
    pub fn pull(&self, image: &str, registry: Option<&str>, pattern: &str) -> ProgressStream {
        pull_all(self.inner.nodes.clone(), image, registry, pattern)
    }

    /// Brings every node's image set matching `pattern` in line with the
    /// reference node.
    pub fn sync(
        &self,
        registry: Option<&str>,
        pattern: &str,
        reference: NodeIndex,
    ) -> BoxStream<'static, SyncStatus> {
        sync::sync(self.clone(), registry, pattern, reference)
    }

    /// Every node with its reachability, refreshed by a container listing.
    pub async fn nodes_info(&self) -> Vec<NodeInfo> {
        self.list_containers().await;
        self.indexed()
            .map(|(id, node)| NodeInfo {
                id,
                url: node.endpoint().to_string(),
                role: if id.is_master() {
                    NodeRole::Master
                } else {
                    NodeRole::Slave
                },
                state: node.availability(),
            })
            .collect()
    }
}
