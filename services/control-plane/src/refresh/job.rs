use std::collections::BTreeSet;

use emupool_id::NodeIndex;
use emupool_proto::{local_image_names, ImageMap, Progress};
use emupool_reconcile::{supersede_prefix, ImageCatalog, DEFAULT_MAX_PULL_ATTEMPTS};
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::pool::PoolManager;

/// What one refresh run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub deleted: Vec<String>,
    pub pulled: Vec<String>,
    pub failed_deletions: Vec<String>,
    pub failed_pulls: Vec<String>,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    /// Some youngest registry images are still not local after the run.
    #[error("refresh incomplete, missing: {}", missing.join(", "))]
    Incomplete {
        missing: Vec<String>,
        report: RefreshReport,
    },
}

/// One refresh of the pool's images.
pub struct RefreshJob {
    pool: PoolManager,
    catalog: ImageCatalog,
    registry: Option<String>,
    max_attempts: u32,
}

impl RefreshJob {
    pub fn new(pool: PoolManager, catalog: ImageCatalog, registry: Option<String>) -> Self {
        Self {
            pool,
            catalog,
            registry,
            max_attempts: DEFAULT_MAX_PULL_ATTEMPTS,
        }
    }

    /// Pull attempts per missing image; at least one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Runs the refresh once.
    ///
    /// Deletion and pull failures do not stop the run. The run fails only
    /// when the pool ends without some youngest registry image.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RefreshReport, RefreshError> {
        info!("Refresh started");
        for pattern in self.catalog.patterns() {
            self.sync(pattern).await;
        }

        let all = self.all_images().await;
        let local: Vec<&str> = local_image_names(&all).collect();
        let youngest_local: Vec<String> = self.catalog.youngest(local.iter().copied(), 1);
        let youngest_remote: Vec<String> =
            self.catalog.youngest(all.keys().map(String::as_str), 1);
        info!(?youngest_local, ?youngest_remote, "Youngest images");

        let mut report = RefreshReport::default();

        for image in local
            .iter()
            .filter(|name| !youngest_local.iter().any(|y| y.as_str() == **name))
        {
            self.delete(image, &mut report).await;
        }

        for image in &youngest_remote {
            if youngest_local.contains(image) {
                info!(image = %image, "Already the youngest local image");
                continue;
            }
            if self.pull_with_retries(image).await {
                report.pulled.push(image.clone());
                self.delete_superseded(image, &youngest_local, &mut report)
                    .await;
            } else {
                report.failed_pulls.push(image.clone());
            }
        }

        if !report.failed_deletions.is_empty() {
            warn!(images = ?report.failed_deletions, "Images failed to delete");
        }

        let refreshed = self.all_images().await;
        let refreshed: BTreeSet<&str> = local_image_names(&refreshed).collect();
        let missing: Vec<String> = youngest_remote
            .into_iter()
            .filter(|image| !refreshed.contains(image.as_str()))
            .collect();

        if missing.is_empty() {
            info!("Refresh finished successfully");
            Ok(report)
        } else {
            error!(?missing, "Refresh finished without every youngest image");
            Err(RefreshError::Incomplete { missing, report })
        }
    }

    async fn sync(&self, pattern: &str) {
        let mut lines = self
            .pool
            .sync(self.registry.as_deref(), pattern, NodeIndex::MASTER);
        while let Some(status) = lines.next().await {
            if !matches!(status, crate::sync::SyncStatus::Pulling { .. }) {
                info!(%status, "Sync");
            }
        }
    }

    /// Pool images of every family, with registry entries.
    async fn all_images(&self) -> ImageMap {
        let mut all = ImageMap::new();
        for pattern in self.catalog.patterns() {
            all.extend(
                self.pool
                    .list_images(self.registry.as_deref(), pattern)
                    .await,
            );
        }
        all
    }

    async fn delete(&self, image: &str, report: &mut RefreshReport) {
        if self.pool.delete_image(image).await {
            info!(image = %image, "Deleted");
            report.deleted.push(image.to_string());
        } else {
            warn!(image = %image, "Not deleted");
            report.failed_deletions.push(image.to_string());
        }
    }

    async fn pull_with_retries(&self, image: &str) -> bool {
        let pattern = self
            .catalog
            .pattern_for(image)
            .or_else(|| self.catalog.patterns().last().map(String::as_str))
            .unwrap_or_default();

        for attempt in 1..=self.max_attempts {
            let mut steps = self.pool.pull(image, self.registry.as_deref(), pattern);
            let mut last = Progress::FAILURE;
            while let Some(progress) = steps.next().await {
                last = progress;
            }
            if last == Progress::COMPLETE {
                info!(image = %image, attempt, "Image downloaded");
                return true;
            }
            error!(image = %image, attempt, "Image not downloaded");
        }
        error!(image = %image, attempts = self.max_attempts, "Image not downloaded at all");
        false
    }

    /// Deletes the youngest local builds of the date bucket `image` replaces.
    async fn delete_superseded(
        &self,
        image: &str,
        youngest_local: &[String],
        report: &mut RefreshReport,
    ) {
        let Some(prefix) = supersede_prefix(image) else {
            return;
        };
        let superseded: Vec<&String> = youngest_local
            .iter()
            .filter(|name| name.contains(prefix) && name.as_str() != image)
            .collect();
        info!(image = %image, prefix, ?superseded, "Deleting superseded images");
        for name in superseded {
            self.delete(name, report).await;
        }
    }
}
