//! Cluster sync: converge every peer's image set to the reference node's.

use std::fmt;

use emupool_id::NodeIndex;
use emupool_proto::{local_image_names, Progress};
use emupool_reconcile::SyncPlan;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, instrument, warn};

use crate::pool::PoolManager;

/// One line of sync progress.
///
/// The lines read `deleting X: done`, `pulling X: <state> <pct>%` and
/// `pulling X: done`. Failures do not stop a sync; they are carried in the
/// status for callers that want them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Deleted { image: String, deleted: bool },
    Pulling { image: String, progress: Progress },
    Pulled { image: String, progress: Progress },
}

impl SyncStatus {
    pub fn image(&self) -> &str {
        match self {
            SyncStatus::Deleted { image, .. }
            | SyncStatus::Pulling { image, .. }
            | SyncStatus::Pulled { image, .. } => image,
        }
    }

    /// False for a failed deletion or a pull that ended in `Failure`.
    pub fn succeeded(&self) -> bool {
        match self {
            SyncStatus::Deleted { deleted, .. } => *deleted,
            SyncStatus::Pulling { .. } => true,
            SyncStatus::Pulled { progress, .. } => *progress == Progress::COMPLETE,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Deleted { image, .. } => write!(f, "deleting {image}: done"),
            SyncStatus::Pulling { image, progress } => write!(f, "pulling {image}: {progress}"),
            SyncStatus::Pulled { image, .. } => write!(f, "pulling {image}: done"),
        }
    }
}

/// Starts a sync and returns its status lines.
///
/// Yields nothing when the reference node is missing or offline, since its
/// empty listing would otherwise delete everything.
pub fn sync(
    pool: PoolManager,
    registry: Option<&str>,
    pattern: &str,
    reference: NodeIndex,
) -> BoxStream<'static, SyncStatus> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(run(
        pool,
        registry.map(str::to_string),
        pattern.to_string(),
        reference,
        tx,
    ));
    ReceiverStream::new(rx).boxed()
}

#[instrument(skip(pool, registry, tx))]
async fn run(
    pool: PoolManager,
    registry: Option<String>,
    pattern: String,
    reference: NodeIndex,
    tx: mpsc::Sender<SyncStatus>,
) {
    let Some(reference_node) = pool.node(reference) else {
        warn!("Unknown reference node");
        return;
    };
    let reference_images = reference_node.list_images(None, &pattern).await;
    if !reference_node.availability().is_online() {
        warn!("Reference node offline, skipping sync");
        return;
    }
    let reference_names: Vec<String> = matching(&reference_images, &pattern);

    let mut peers = Vec::new();
    for (i, node) in pool.nodes().iter().enumerate() {
        if i == reference.as_usize() {
            continue;
        }
        let images = node.list_images(None, &pattern).await;
        if !node.availability().is_online() {
            warn!(node = i, endpoint = %node.endpoint(), "Peer offline, left out of sync");
            continue;
        }
        peers.push(matching(&images, &pattern));
    }

    let plan = SyncPlan::compute(&reference_names, &peers);
    if plan.is_empty() {
        info!("Pool already in sync");
        return;
    }
    info!(
        remove = plan.to_remove.len(),
        pull = plan.to_pull.len(),
        "Syncing pool"
    );

    for image in plan.to_remove {
        let deleted = pool.delete_image(&image).await;
        if !deleted {
            warn!(image = %image, "Sync could not delete image everywhere");
        }
        if tx.send(SyncStatus::Deleted { image, deleted }).await.is_err() {
            return;
        }
    }

    for image in plan.to_pull {
        let mut steps = pool.pull(&image, registry.as_deref(), &pattern);
        let mut last = Progress::FAILURE;
        while let Some(progress) = steps.next().await {
            last = progress;
            let status = SyncStatus::Pulling {
                image: image.clone(),
                progress,
            };
            if tx.send(status).await.is_err() {
                return;
            }
        }
        if last != Progress::COMPLETE {
            warn!(image = %image, state = %last.state(), "Sync pull did not complete");
        }
        let status = SyncStatus::Pulled {
            image,
            progress: last,
        };
        if tx.send(status).await.is_err() {
            return;
        }
    }
}

fn matching(images: &emupool_proto::ImageMap, pattern: &str) -> Vec<String> {
    local_image_names(images)
        .filter(|name| name.contains(pattern))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lines() {
        let deleted = SyncStatus::Deleted {
            image: "C".into(),
            deleted: true,
        };
        let pulling = SyncStatus::Pulling {
            image: "B".into(),
            progress: Progress::downloading(40),
        };
        let pulled = SyncStatus::Pulled {
            image: "B".into(),
            progress: Progress::COMPLETE,
        };
        assert_eq!(deleted.to_string(), "deleting C: done");
        assert_eq!(pulling.to_string(), "pulling B: Downloading 40%");
        assert_eq!(pulled.to_string(), "pulling B: done");
        assert!(pulled.succeeded());
    }

    #[test]
    fn test_failed_pull_is_not_success() {
        let pulled = SyncStatus::Pulled {
            image: "B".into(),
            progress: Progress::FAILURE,
        };
        assert_eq!(pulled.to_string(), "pulling B: done");
        assert!(!pulled.succeeded());
        assert_eq!(pulled.image(), "B");
    }
}
