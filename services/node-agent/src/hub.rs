//! Per-image progress fan-out.
//!
//! Subscribers attach to an image name before its pull starts. Every pull
//! of the image publishes through a [`PullPublisher`]; the channel closes
//! when the last publisher is dropped, which is the disconnect signal seen
//! by subscribers. A channel nobody publishes to is dropped with its last
//! subscriber.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use emupool_proto::Progress;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

struct Channel {
    tx: broadcast::Sender<Progress>,
    /// Pulls currently publishing.
    pulls: usize,
}

impl Channel {
    fn new() -> Self {
        Self {
            tx: broadcast::channel(CHANNEL_CAPACITY).0,
            pulls: 0,
        }
    }
}

#[derive(Default)]
pub struct ProgressHub {
    channels: Mutex<HashMap<String, Channel>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(self: &Arc<Self>, image: &str) -> Subscription {
        let rx = self
            .lock()
            .entry(image.to_string())
            .or_insert_with(Channel::new)
            .tx
            .subscribe();
        Subscription {
            rx,
            _lease: Lease {
                hub: Arc::clone(self),
                image: image.to_string(),
            },
        }
    }

    /// Registers a pull of `image`. Concurrent pulls of one image share its
    /// channel.
    pub fn begin_pull(self: &Arc<Self>, image: &str) -> PullPublisher {
        let tx = {
            let mut channels = self.lock();
            let channel = channels
                .entry(image.to_string())
                .or_insert_with(Channel::new);
            channel.pulls += 1;
            channel.tx.clone()
        };
        PullPublisher {
            hub: Arc::clone(self),
            image: image.to_string(),
            tx,
        }
    }

    /// Number of images with a live channel.
    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }

    fn end_pull(&self, image: &str) {
        let mut channels = self.lock();
        if let Some(channel) = channels.get_mut(image) {
            channel.pulls = channel.pulls.saturating_sub(1);
            if channel.pulls == 0 {
                channels.remove(image);
            }
        }
    }

    fn release(&self, image: &str) {
        let mut channels = self.lock();
        let unused = channels
            .get(image)
            .is_some_and(|channel| channel.pulls == 0 && channel.tx.receiver_count() == 0);
        if unused {
            channels.remove(image);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        // A poisoned map only holds senders; keep serving it.
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Receiving end of one image's channel.
pub struct Subscription {
    // Dropped before the lease, so the release sees the receiver gone.
    rx: broadcast::Receiver<Progress>,
    _lease: Lease,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<Progress, RecvError> {
        self.rx.recv().await
    }
}

struct Lease {
    hub: Arc<ProgressHub>,
    image: String,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.hub.release(&self.image);
    }
}

/// Publishing end held by one pull.
pub struct PullPublisher {
    hub: Arc<ProgressHub>,
    image: String,
    tx: broadcast::Sender<Progress>,
}

impl PullPublisher {
    /// Sends a value to every current subscriber of the image.
    pub fn publish(&self, progress: Progress) {
        let receivers = self.tx.send(progress).unwrap_or(0);
        debug!(image = %self.image, %progress, receivers, "Published progress");
    }
}

impl Drop for PullPublisher {
    fn drop(&mut self) {
        self.hub.end_pull(&self.image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers_until_pull_ends() {
        let hub = Arc::new(ProgressHub::new());
        let mut rx = hub.subscribe("img");
        let mut other = hub.subscribe("other");

        let pull = hub.begin_pull("img");
        pull.publish(Progress::downloading(5));
        drop(pull);

        assert_eq!(rx.recv().await.unwrap(), Progress::downloading(5));
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert!(other.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_pulls_keep_channel_until_last_ends() {
        let hub = Arc::new(ProgressHub::new());
        let mut rx = hub.subscribe("img");

        let first = hub.begin_pull("img");
        let second = hub.begin_pull("img");
        drop(first);
        second.publish(Progress::extracting(40));
        drop(second);

        assert_eq!(rx.recv().await.unwrap(), Progress::extracting(40));
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }

    #[test]
    fn test_subscription_without_pull_is_released() {
        let hub = Arc::new(ProgressHub::new());
        let first = hub.subscribe("img");
        let second = hub.subscribe("img");
        assert_eq!(hub.channel_count(), 1);

        drop(first);
        assert_eq!(hub.channel_count(), 1);
        drop(second);
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let hub = Arc::new(ProgressHub::new());
        let pull = hub.begin_pull("img");
        pull.publish(Progress::COMPLETE);
        drop(pull);
        assert_eq!(hub.channel_count(), 0);

        let mut rx = hub.subscribe("img");
        assert!(rx.rx.try_recv().is_err());
    }
}
