//! Remote node tests against a real node agent on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use emupool_control_plane::{Availability, LeastLoaded, LocalNode, Node, PoolManager, RemoteNode};
use emupool_id::LocalInstanceId;
use emupool_node_agent::{router, AgentState, HostManager, MockRuntime};
use emupool_proto::node_api::{PROGRESS_PATH, PULL_PATH};
use emupool_proto::{Progress, ProgressState, PullOutcome};
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const REGISTRY: Option<&str> = Some("registry.local:5000");

/// A node agent served in-process.
struct AgentFixture {
    url: String,
    runtime: MockRuntime,
    _server: JoinHandle<()>,
}

impl AgentFixture {
    async fn start(runtime: MockRuntime) -> Self {
        let host = Arc::new(HostManager::new(Arc::new(runtime.clone())));
        let (url, server) = serve(router(AgentState::new(host))).await;
        Self {
            url,
            runtime,
            _server: server,
        }
    }

    fn node(&self) -> RemoteNode {
        remote(&self.url)
    }
}

async fn serve(app: Router) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("listener has no address");
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });
    (format!("http://{addr}"), server)
}

fn remote(url: &str) -> RemoteNode {
    RemoteNode::new(url, Duration::from_secs(5), Duration::from_secs(30))
}

fn runtime() -> MockRuntime {
    MockRuntime::new()
        .with_step_delay(Duration::from_millis(10))
        .with_local_image("img_a")
        .with_registry_image("img_r")
}

#[tokio::test]
async fn test_remote_node_goes_online_after_first_request() {
    let agent = AgentFixture::start(runtime()).await;
    let node = agent.node();
    assert_eq!(node.availability(), Availability::Offline);

    let images = node.list_images(REGISTRY, "img").await;

    assert_eq!(node.availability(), Availability::Online);
    // Peers report local images only.
    assert_eq!(images.keys().collect::<Vec<_>>(), vec!["img_a"]);
}

#[tokio::test]
async fn test_remote_node_instance_lifecycle() {
    let agent = AgentFixture::start(runtime()).await;
    let node = agent.node();

    let id = node.start_image("img_a", &[], "ci_").await;
    assert_eq!(id, Some(LocalInstanceId::new(0)));

    let instances = node.list_containers().await;
    assert_eq!(instances[&LocalInstanceId::new(0)].net_name, "ci_emulator_envoymesh_0");

    node.stop_container(LocalInstanceId::new(0)).await;
    assert!(node.list_containers().await.is_empty());

    assert_eq!(node.start_image("img_r", &[], "").await, None);
}

#[tokio::test]
async fn test_remote_node_delete_image() {
    let agent = AgentFixture::start(runtime()).await;
    let node = agent.node();

    assert!(node.delete_image("img_a").await);
    assert!(agent.runtime.local_images().await.is_empty());
}

#[tokio::test]
async fn test_remote_pull_forwards_progress_and_completes() {
    let agent = AgentFixture::start(runtime()).await;
    let node = agent.node();

    let values: Vec<Progress> = node.pull("img_r", REGISTRY, "img").await.collect().await;

    assert_eq!(values.last(), Some(&Progress::COMPLETE));
    let (terminal, progress) = values.split_last().unwrap();
    assert!(terminal.is_terminal());
    assert!(progress.iter().all(|value| !value.is_terminal()));
    assert_eq!(agent.runtime.local_images().await, vec!["img_a", "img_r"]);
}

#[tokio::test]
async fn test_remote_pull_failure() {
    let agent = AgentFixture::start(runtime()).await;
    let values: Vec<Progress> = agent
        .node()
        .pull("img_unknown", REGISTRY, "img")
        .await
        .collect()
        .await;
    assert_eq!(values.last(), Some(&Progress::FAILURE));
}

#[tokio::test]
async fn test_remote_pull_of_registry_qualified_image() {
    let agent = AgentFixture::start(
        MockRuntime::new()
            .with_step_delay(Duration::from_millis(5))
            .with_registry_image("registry.local/img_r"),
    )
    .await;

    let values: Vec<Progress> = agent
        .node()
        .pull("registry.local/img_r", REGISTRY, "img")
        .await
        .collect()
        .await;

    assert_eq!(values.last(), Some(&Progress::COMPLETE));
    assert!(values.len() > 1, "progress values were not forwarded: {values:?}");
    assert_eq!(agent.runtime.local_images().await, vec!["registry.local/img_r"]);
}

#[tokio::test]
async fn test_remote_pull_fails_when_progress_channel_drops() {
    // The channel closes after one value; the control answer comes much later.
    let app = Router::new()
        .route(
            &format!("{PROGRESS_PATH}/{{image}}"),
            get(|| async { "{\"text\":\"Downloading:30\"}\n" }),
        )
        .route(
            PULL_PATH,
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(PullOutcome {
                    state: ProgressState::Complete,
                })
            }),
        );
    let (url, _server) = serve(app).await;

    let values: Vec<Progress> = tokio::time::timeout(
        Duration::from_secs(5),
        remote(&url).pull("img_r", REGISTRY, "img").await.collect(),
    )
    .await
    .expect("pull waited for the control answer");

    assert_eq!(values, vec![Progress::downloading(30), Progress::FAILURE]);
}

#[tokio::test]
async fn test_unreachable_node_is_offline_and_empty() {
    let node = RemoteNode::new(
        "http://127.0.0.1:1",
        Duration::from_millis(500),
        Duration::from_millis(500),
    );

    assert!(node.list_images(None, "").await.is_empty());
    assert!(node.list_containers().await.is_empty());
    assert_eq!(node.start_image("img_a", &[], "").await, None);
    assert!(!node.delete_image("img_a").await);
    assert_eq!(node.availability(), Availability::Offline);

    let values: Vec<Progress> = node.pull("img_a", None, "").await.collect().await;
    assert_eq!(values, vec![Progress::FAILURE]);
}

#[tokio::test]
async fn test_pool_pull_across_local_and_remote_nodes() {
    let agent = AgentFixture::start(runtime()).await;
    let master_runtime = MockRuntime::new()
        .with_step_delay(Duration::from_millis(5))
        .with_registry_image("img_r");
    let master = Arc::new(LocalNode::new(Arc::new(HostManager::new(Arc::new(
        master_runtime.clone(),
    )))));
    let pool = PoolManager::new(
        master,
        vec![Arc::new(agent.node()) as Arc<dyn Node>],
        Box::new(LeastLoaded::default()),
        None,
    );

    let values: Vec<Progress> = pool.pull("img_r", REGISTRY, "img").collect().await;

    assert_eq!(values.last(), Some(&Progress::COMPLETE));
    assert_eq!(master_runtime.local_images().await, vec!["img_r"]);
    assert!(agent.runtime.local_images().await.contains(&"img_r".to_string()));
}
