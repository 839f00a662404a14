//! Pull fan-out across a pool.
//!
//! One worker per node drives that node's pull and reports every value to
//! a single driver, which folds the latest value of each node into one
//! pool value.

use std::sync::Arc;

use emupool_id::NodeIndex;
use emupool_node_agent::ProgressStream;
use emupool_proto::{Progress, ProgressState};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::node::Node;

/// Combines the latest value of every node into one.
///
/// The first state of [`ProgressState::REPORTING_PRIORITY`] reported by any
/// node wins; its percentage is the mean over the nodes reporting it.
pub fn aggregate(values: &[Progress]) -> Progress {
    for state in ProgressState::REPORTING_PRIORITY {
        let percents: Vec<u32> = values
            .iter()
            .filter(|value| value.state() == state)
            .map(|value| u32::from(value.percent()))
            .collect();
        if !percents.is_empty() {
            let mean = percents.iter().sum::<u32>() / percents.len() as u32;
            return Progress::new(state, mean);
        }
    }
    Progress::FAILURE
}

/// Pulls `image` on every node and yields the aggregated progress.
///
/// The last value is `Complete` or `Failure`, and it is only sent once
/// every worker has finished.
pub fn pull_all(
    nodes: Vec<Arc<dyn Node>>,
    image: &str,
    registry: Option<&str>,
    pattern: &str,
) -> ProgressStream {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(drive(
        nodes,
        image.to_string(),
        registry.map(str::to_string),
        pattern.to_string(),
        tx,
    ));
    ReceiverStream::new(rx).boxed()
}

async fn drive(
    nodes: Vec<Arc<dyn Node>>,
    image: String,
    registry: Option<String>,
    pattern: String,
    tx: mpsc::Sender<Progress>,
) {
    if nodes.is_empty() {
        let _ = tx.send(Progress::FAILURE).await;
        return;
    }

    let (updates_tx, mut updates) = mpsc::unbounded_channel::<(usize, Progress)>();
    let mut workers = JoinSet::new();
    for (index, node) in nodes.into_iter().enumerate() {
        let updates_tx = updates_tx.clone();
        let image = image.clone();
        let registry = registry.clone();
        let pattern = pattern.clone();
        workers.spawn(async move {
            let mut steps = node.pull(&image, registry.as_deref(), &pattern).await;
            let mut last = None;
            while let Some(progress) = steps.next().await {
                last = Some(progress);
                let _ = updates_tx.send((index, progress));
                if progress.is_terminal() {
                    break;
                }
            }
            if !last.is_some_and(|progress| progress.is_terminal()) {
                let node = NodeIndex::new(index as u32);
                warn!(node = %node, image = %image, "Node pull ended early");
                let _ = updates_tx.send((index, Progress::FAILURE));
            }
        });
    }
    drop(updates_tx);

    let mut slots = vec![Progress::downloading(0); workers.len()];
    let mut reported = aggregate(&slots);
    while let Some((index, progress)) = updates.recv().await {
        slots[index] = progress;
        let combined = aggregate(&slots);
        if combined.is_terminal() {
            reported = combined;
            break;
        }
        if combined != reported {
            debug!(image = %image, progress = %combined, "Pool pull progress");
            // A gone consumer does not stop the workers.
            let _ = tx.send(combined).await;
        }
        reported = combined;
    }

    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            warn!(image = %image, error = %e, "Pull worker failed");
            reported = Progress::FAILURE;
        }
    }

    if !reported.is_terminal() {
        reported = Progress::FAILURE;
    }
    info!(image = %image, state = %reported.state(), "Pool pull finished");
    let _ = tx.send(reported).await;
}
