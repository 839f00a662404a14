//! HTTP control surface of a node.
//!
//! Served to the pool manager of the master host; see
//! [`emupool_proto::node_api`] for the routes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use emupool_id::LocalInstanceId;
use emupool_proto::node_api::{
    DeleteQuery, ImagesQuery, LaunchQuery, PullQuery, StopQuery, DELETE_PATH, IMAGES_PATH,
    INSTANCES_PATH, LAUNCH_PATH, PROGRESS_CONTENT_TYPE, PROGRESS_PATH, PULL_PATH, STOP_PATH,
};
use emupool_proto::{ImageMap, InstanceMap, Progress, ProgressEvent, PullOutcome};
use futures_util::stream::{unfold, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::host::HostManager;
use crate::hub::ProgressHub;
use crate::runtime::RuntimeError;

/// Shared state of the control surface.
#[derive(Clone)]
pub struct AgentState {
    host: Arc<HostManager>,
    hub: Arc<ProgressHub>,
}

impl AgentState {
    pub fn new(host: Arc<HostManager>) -> Self {
        Self {
            host,
            hub: Arc::new(ProgressHub::new()),
        }
    }
}

/// Error body returned by the control surface.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorBody {
    pub code: String,
    pub detail: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, detail)
    }

    pub fn not_found(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, detail)
    }

    pub fn internal(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, detail)
    }

    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.into(),
                detail: detail.into(),
            },
        }
    }
}

impl From<RuntimeError> for ApiError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::ImageNotFound(_) => ApiError::not_found("image_not_found", e.to_string()),
            RuntimeError::InstanceNotFound(_) => {
                ApiError::not_found("instance_not_found", e.to_string())
            }
            RuntimeError::InstanceExists(_) | RuntimeError::Internal(_) => {
                ApiError::internal("runtime_error", e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Create the control surface router.
pub fn router(state: AgentState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(IMAGES_PATH, get(images))
        .route(INSTANCES_PATH, get(instances))
        .route(LAUNCH_PATH, get(launch))
        .route(STOP_PATH, get(stop))
        .route(DELETE_PATH, get(delete))
        .route(PULL_PATH, get(pull))
        .route(&format!("{PROGRESS_PATH}/{{image}}"), get(progress))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "node-agent" }))
}

async fn images(
    State(state): State<AgentState>,
    Query(query): Query<ImagesQuery>,
) -> Result<Json<ImageMap>, ApiError> {
    let images = state.host.list_images(None, &query.pattern).await?;
    Ok(Json(images))
}

async fn instances(State(state): State<AgentState>) -> Result<Json<InstanceMap>, ApiError> {
    Ok(Json(state.host.list_instances().await?))
}

async fn launch(
    State(state): State<AgentState>,
    Query(query): Query<LaunchQuery>,
) -> Result<Json<Option<LocalInstanceId>>, ApiError> {
    let devices = query
        .devices()
        .map_err(|e| ApiError::bad_request("invalid_devices", e.to_string()))?;
    let id = state
        .host
        .launch(&query.image_name, &devices, &query.prefix)
        .await?;
    Ok(Json(id))
}

async fn stop(
    State(state): State<AgentState>,
    Query(query): Query<StopQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.host.stop(query.ident).await?;
    Ok(Json(serde_json::json!({})))
}

async fn delete(
    State(state): State<AgentState>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<bool>, ApiError> {
    Ok(Json(state.host.delete_image(&query.image).await?))
}

/// Drives a pull to its terminal value, publishing every value on the
/// image's progress channel, and answers with the terminal state.
async fn pull(
    State(state): State<AgentState>,
    Query(query): Query<PullQuery>,
) -> Json<PullOutcome> {
    let image = query.image_name;
    info!(image = %image, registry = ?query.registry, "Pull requested");
    // Dropping the publisher closes the channel, also when the request is cancelled.
    let publisher = state.hub.begin_pull(&image);

    let mut steps = state
        .host
        .pull(&image, query.registry.as_deref(), &query.pattern)
        .await;

    let mut last = Progress::FAILURE;
    while let Some(progress) = steps.next().await {
        publisher.publish(progress);
        last = progress;
    }
    drop(publisher);

    if !last.is_terminal() {
        warn!(image = %image, "Pull ended without a terminal value");
    }
    info!(image = %image, state = %last.state(), "Pull finished");
    Json(PullOutcome::from(last))
}

/// Streams the progress channel of one image as NDJSON `ProgressEvent`s.
/// The stream ends after a terminal value or when the pull closes the
/// channel.
async fn progress(State(state): State<AgentState>, Path(image): Path<String>) -> Response {
    let rx = state.hub.subscribe(&image);

    let stream = unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        loop {
            match rx.recv().await {
                Ok(progress) => {
                    let data = match serde_json::to_string(&ProgressEvent::from(progress)) {
                        Ok(data) => data,
                        Err(e) => {
                            tracing::error!(error = ?e, "Failed to serialize progress event");
                            continue;
                        }
                    };
                    let payload = Bytes::from(format!("{data}\n"));
                    let next = (!progress.is_terminal()).then_some(rx);
                    return Some((Ok::<Bytes, Infallible>(payload), next));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Progress subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let mut response = Response::new(Body::from_stream(stream));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PROGRESS_CONTENT_TYPE));
    response
}
