//! Refresh job tests over in-process hosts.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use emupool_control_plane::{LeastLoaded, LocalNode, Node, PoolManager, RefreshError, RefreshJob};
use emupool_node_agent::{HostManager, MockRuntime};
use emupool_proto::Progress;
use emupool_reconcile::{ImageCatalog, DEFAULT_MAX_PULL_ATTEMPTS};

const OLD: &str = "cloud_android_12_rel_20230101_1";
const CURRENT: &str = "cloud_android_12_rel_20230102_1";
const NEW: &str = "cloud_android_12_rel_20230103_1";

fn host() -> MockRuntime {
    MockRuntime::new()
        .with_step_delay(Duration::from_millis(1))
        .with_local_image(OLD)
        .with_local_image(CURRENT)
}

fn job(runtimes: &[MockRuntime]) -> RefreshJob {
    let mut nodes: Vec<Arc<dyn Node>> = runtimes
        .iter()
        .map(|runtime| {
            Arc::new(LocalNode::new(Arc::new(HostManager::new(Arc::new(
                runtime.clone(),
            ))))) as Arc<dyn Node>
        })
        .collect();
    let master = nodes.remove(0);
    let pool = PoolManager::new(master, nodes, Box::new(LeastLoaded::default()), None);
    RefreshJob::new(
        pool,
        ImageCatalog::new(["cloud_android"], ["REL"]),
        Some("registry.local:5000".to_string()),
    )
}

async fn locals(runtime: &MockRuntime) -> BTreeSet<String> {
    runtime.local_images().await.into_iter().collect()
}

#[tokio::test]
async fn test_refresh_replaces_local_builds_with_youngest_remote() {
    let runtimes = [host().with_registry_image(NEW), host().with_registry_image(NEW)];

    let report = job(&runtimes).run().await.unwrap();

    assert_eq!(report.deleted, vec![OLD.to_string(), CURRENT.to_string()]);
    assert_eq!(report.pulled, vec![NEW.to_string()]);
    assert!(report.failed_deletions.is_empty());
    assert!(report.failed_pulls.is_empty());

    for runtime in &runtimes {
        assert_eq!(locals(runtime).await, [NEW.to_string()].into_iter().collect());
    }
}

#[tokio::test]
async fn test_refresh_with_youngest_already_local_only_prunes() {
    let runtimes = [host(), host()];

    let report = job(&runtimes).run().await.unwrap();

    assert_eq!(report.deleted, vec![OLD.to_string()]);
    assert!(report.pulled.is_empty());
    for runtime in &runtimes {
        assert_eq!(locals(runtime).await, [CURRENT.to_string()].into_iter().collect());
    }
}

#[tokio::test]
async fn test_refresh_reports_missing_image_after_failed_attempts() {
    let runtimes = [
        host().with_registry_image(NEW),
        host().with_scripted_pull(NEW, vec![Progress::downloading(20), Progress::FAILURE]),
    ];

    let err = job(&runtimes).with_max_attempts(2).run().await.unwrap_err();

    let RefreshError::Incomplete { missing, report } = err;
    assert_eq!(missing, vec![NEW.to_string()]);
    assert_eq!(report.failed_pulls, vec![NEW.to_string()]);
    assert_eq!(report.deleted, vec![OLD.to_string()]);

    // Nothing is superseded without a successful pull.
    assert!(locals(&runtimes[1]).await.contains(CURRENT));
    assert!(!locals(&runtimes[1]).await.contains(NEW));
}

#[tokio::test]
async fn test_refresh_retries_pull_until_it_succeeds() {
    let runtimes = [
        host().with_registry_image(NEW),
        host()
            .with_registry_image(NEW)
            .with_failing_pulls(NEW, DEFAULT_MAX_PULL_ATTEMPTS as usize - 1),
    ];

    let report = job(&runtimes).run().await.unwrap();

    assert_eq!(report.pulled, vec![NEW.to_string()]);
    assert!(report.failed_pulls.is_empty());
    assert_eq!(report.deleted, vec![OLD.to_string(), CURRENT.to_string()]);
    assert_eq!(
        runtimes[1].pull_count(NEW).await,
        DEFAULT_MAX_PULL_ATTEMPTS as usize
    );
    for runtime in &runtimes {
        assert_eq!(locals(runtime).await, [NEW.to_string()].into_iter().collect());
    }
}

#[tokio::test]
async fn test_refresh_gives_up_after_default_attempts() {
    let runtimes = [
        host().with_registry_image(NEW),
        host().with_scripted_pull(NEW, vec![Progress::downloading(20), Progress::FAILURE]),
    ];

    let err = job(&runtimes).run().await.unwrap_err();

    let RefreshError::Incomplete { missing, .. } = err;
    assert_eq!(missing, vec![NEW.to_string()]);
    assert_eq!(
        runtimes[1].pull_count(NEW).await,
        DEFAULT_MAX_PULL_ATTEMPTS as usize
    );
    assert!(locals(&runtimes[1]).await.contains(CURRENT));
}

#[tokio::test]
async fn test_refresh_syncs_peers_to_master_first() {
    let runtimes = [
        MockRuntime::new()
            .with_step_delay(Duration::from_millis(1))
            .with_local_image(CURRENT),
        host().with_registry_image(CURRENT),
    ];

    let report = job(&runtimes).run().await.unwrap();

    // The peer's extra build went with the sync, not the prune.
    assert!(report.deleted.is_empty());
    for runtime in &runtimes {
        assert_eq!(locals(runtime).await, [CURRENT.to_string()].into_iter().collect());
    }
}
