//! Peer host reached over its HTTP control surface.
//!
//! A pull uses two paths: a long-running control request that answers with
//! the final state, and the per-image NDJSON push channel that carries
//! progress while the control request is outstanding. The push channel is
//! opened first so no early value is missed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use emupool_id::LocalInstanceId;
use emupool_node_agent::ProgressStream;
use emupool_proto::node_api::{
    DeleteQuery, ImagesQuery, LaunchQuery, PullQuery, StopQuery, DELETE_PATH, IMAGES_PATH,
    INSTANCES_PATH, LAUNCH_PATH, PROGRESS_PATH, PULL_PATH, STOP_PATH,
};
use emupool_proto::{
    DeviceSpec, ImageMap, InstanceMap, Progress, ProgressEvent, ProgressParseError, PullOutcome,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::{Availability, Node};

const NO_QUERY: &[(&str, &str)] = &[];

type EventStream = BoxStream<'static, Result<Progress, ProgressParseError>>;

/// A node running on another machine.
#[derive(Clone)]
pub struct RemoteNode {
    endpoint: String,
    client: reqwest::Client,
    online: Arc<AtomicBool>,
    request_timeout: Duration,
    pull_timeout: Duration,
}

impl RemoteNode {
    /// Creates a node for `endpoint`, e.g. `http://10.0.0.2:5000`.
    ///
    /// The node starts offline until its first request succeeds.
    pub fn new(
        endpoint: impl Into<String>,
        request_timeout: Duration,
        pull_timeout: Duration,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            client: reqwest::Client::new(),
            online: Arc::new(AtomicBool::new(false)),
            request_timeout,
            pull_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Push channel URL of `image`, with the name as one encoded segment.
    fn progress_url(&self, image: &str) -> Option<Url> {
        let mut url = Url::parse(&self.endpoint).ok()?;
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .push(PROGRESS_PATH.trim_start_matches('/'))
            .push(image);
        Some(url)
    }

    fn mark(&self, availability: Availability) {
        self.online
            .store(availability.is_online(), Ordering::Relaxed);
    }

    /// Sends one control request. Transport failures flip the node offline;
    /// any failure yields `None`.
    async fn request<Q, T>(&self, path: &str, query: &Q, timeout: Duration) -> Option<T>
    where
        Q: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let response = match self
            .client
            .get(&url)
            .query(query)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.mark(Availability::Offline);
                info!(url = %url, error = %e, "Node not available");
                return None;
            }
        };
        self.mark(Availability::Online);

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Node rejected request");
            return None;
        }

        match response.json::<T>().await {
            Ok(body) => {
                debug!(url = %url, "Got response from node");
                Some(body)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Invalid response from node");
                None
            }
        }
    }

    /// Opens the push channel of `image`.
    async fn subscribe(&self, image: &str) -> Option<EventStream> {
        let Some(url) = self.progress_url(image) else {
            warn!(endpoint = %self.endpoint, "Endpoint is not a base URL");
            return None;
        };
        match self.client.get(url.clone()).timeout(self.pull_timeout).send().await {
            Ok(response) if response.status().is_success() => {
                self.mark(Availability::Online);
                Some(ndjson_events(response))
            }
            Ok(response) => {
                self.mark(Availability::Online);
                warn!(url = %url, status = %response.status(), "Node refused progress channel");
                None
            }
            Err(e) => {
                self.mark(Availability::Offline);
                info!(url = %url, error = %e, "Node not available");
                None
            }
        }
    }

    async fn drive_pull(self, query: PullQuery, tx: mpsc::Sender<Progress>) {
        let image = query.image_name.clone();

        let Some(mut events) = self.subscribe(&image).await else {
            let _ = tx.send(Progress::FAILURE).await;
            return;
        };

        let mut control = tokio::spawn({
            let node = self.clone();
            async move {
                node.request::<_, PullOutcome>(PULL_PATH, &query, node.pull_timeout)
                    .await
            }
        });

        let mut tracker = PullTracker::new();
        let mut outcome = None;
        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(Ok(progress)) => {
                        if let Some(value) = tracker.on_event(progress) {
                            let _ = tx.send(value).await;
                        }
                        if tracker.is_terminal() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(image = %image, error = %e, "Ignoring malformed progress event");
                    }
                    None => {
                        tracker.on_disconnect();
                        break;
                    }
                },
                result = &mut control => {
                    outcome = Some(result.ok().flatten());
                    break;
                }
            }
        }
        drop(events);

        let outcome = match outcome {
            Some(outcome) => outcome,
            None if tracker.current() == Progress::FAILURE => {
                // The answer can no longer change the result.
                control.abort();
                let _ = control.await;
                None
            }
            None => control.await.ok().flatten(),
        };
        let final_value = tracker.finish(outcome);
        info!(
            node = %self.endpoint,
            image = %image,
            state = %final_value.state(),
            "Remote pull finished"
        );
        let _ = tx.send(final_value).await;
    }
}

#[async_trait]
impl Node for RemoteNode {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn availability(&self) -> Availability {
        if self.online.load(Ordering::Relaxed) {
            Availability::Online
        } else {
            Availability::Offline
        }
    }

    /// Peers only report their local images; the registry stays with the
    /// master.
    async fn list_images(&self, _registry: Option<&str>, pattern: &str) -> ImageMap {
        let query = ImagesQuery {
            pattern: pattern.to_string(),
        };
        self.request(IMAGES_PATH, &query, self.request_timeout)
            .await
            .unwrap_or_default()
    }

    async fn list_containers(&self) -> InstanceMap {
        self.request(INSTANCES_PATH, NO_QUERY, self.request_timeout)
            .await
            .unwrap_or_default()
    }

    async fn start_image(
        &self,
        image_name: &str,
        devices: &[DeviceSpec],
        prefix: &str,
    ) -> Option<LocalInstanceId> {
        let query = LaunchQuery::new(image_name, devices, prefix);
        self.request::<_, Option<LocalInstanceId>>(LAUNCH_PATH, &query, self.request_timeout)
            .await
            .flatten()
    }

    async fn stop_container(&self, id: LocalInstanceId) {
        let query = StopQuery { ident: id };
        let _: Option<serde_json::Value> =
            self.request(STOP_PATH, &query, self.request_timeout).await;
    }

    async fn delete_image(&self, image: &str) -> bool {
        let query = DeleteQuery {
            image: image.to_string(),
        };
        self.request(DELETE_PATH, &query, self.request_timeout)
            .await
            .unwrap_or(false)
    }

    async fn pull(&self, image: &str, registry: Option<&str>, pattern: &str) -> ProgressStream {
        let query = PullQuery {
            image_name: image.to_string(),
            registry: registry.map(str::to_string),
            pattern: pattern.to_string(),
        };
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(self.clone().drive_pull(query, tx));
        ReceiverStream::new(rx).boxed()
    }
}

/// Push-channel state of one remote pull.
///
/// Values after a terminal one are ignored, since the push channel may
/// deliver late or out of order. A pushed terminal value is final; while
/// the push channel is still open the control response decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullTracker {
    current: Progress,
}

impl Default for PullTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PullTracker {
    pub fn new() -> Self {
        Self {
            current: Progress::downloading(0),
        }
    }

    pub fn current(&self) -> Progress {
        self.current
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Records a pushed value; returns it when it should be forwarded.
    pub fn on_event(&mut self, progress: Progress) -> Option<Progress> {
        if self.current.is_terminal() {
            return None;
        }
        self.current = progress;
        (!progress.is_terminal()).then_some(progress)
    }

    /// The push channel closed. Without a prior `Complete` this is a failure.
    pub fn on_disconnect(&mut self) {
        if self.current != Progress::COMPLETE {
            self.current = Progress::FAILURE;
        }
    }

    /// Final value given the control response (`None` if it failed or
    /// was not awaited).
    pub fn finish(self, outcome: Option<PullOutcome>) -> Progress {
        if self.current.is_terminal() {
            return self.current;
        }
        match outcome {
            Some(outcome) if outcome.is_complete() => Progress::COMPLETE,
            _ => Progress::FAILURE,
        }
    }
}

/// Splits an NDJSON body into progress values.
fn ndjson_events(response: reqwest::Response) -> EventStream {
    let chunks = response.bytes_stream().boxed();
    stream::unfold(
        (chunks, Vec::<u8>::new(), false),
        |(mut chunks, mut buf, mut done)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&line).trim().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    return Some((parse_event(&text), (chunks, buf, done)));
                }
                if done {
                    let text = String::from_utf8_lossy(&buf).trim().to_string();
                    if text.is_empty() {
                        return None;
                    }
                    return Some((parse_event(&text), (chunks, Vec::new(), true)));
                }
                match chunks.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        debug!(error = %e, "Progress channel read failed");
                        done = true;
                    }
                    None => done = true,
                }
            }
        },
    )
    .boxed()
}

fn parse_event(line: &str) -> Result<Progress, ProgressParseError> {
    serde_json::from_str::<ProgressEvent>(line)
        .map_err(|_| ProgressParseError::MalformedText(line.to_string()))?
        .progress()
}
