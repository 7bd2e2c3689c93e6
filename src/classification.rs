use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::app_metrics::AppMetrics;
use crate::config::{ClassifierConfig, ClassifierMode};
use crate::error::JobError;
use crate::status_classifier::{CoarseClassifier, StatusClassifier};
use crate::status_publisher::{StatusPublisher, VesselRegistry};
use crate::track_store::TrackStore;
use crate::vessel::{StatusUpdate, TrackWindow};

/// Recompute and publish the status of every registered vessel.
pub struct ClassificationJob {
    store: Arc<dyn TrackStore>,
    registry: Arc<dyn VesselRegistry>,
    publisher: StatusPublisher,
    classifier: StatusClassifier,
    coarse: CoarseClassifier,
    mode: ClassifierMode,
    offline_threshold: Duration,
    lookback: Duration,
    max_points: usize,
    metrics: Arc<AppMetrics>,
}

impl ClassificationJob {
    pub fn new(
        config: &ClassifierConfig,
        store: Arc<dyn TrackStore>,
        registry: Arc<dyn VesselRegistry>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            store,
            publisher: StatusPublisher::new(registry.clone()),
            registry,
            classifier: StatusClassifier::from_config(config),
            coarse: CoarseClassifier::from_config(config),
            mode: config.mode,
            offline_threshold: config.offline_threshold(),
            lookback: config.lookback(),
            max_points: config.max_points,
            metrics,
        }
    }

    /// The update to publish, or None to keep whatever is stored.
    /// Stale or missing data is Offline in either mode.
    pub fn decide(&self, window: &TrackWindow, now: DateTime<Utc>) -> Option<StatusUpdate> {
        let stale = window.latest().map_or(true, |p| now - p.observed_at > self.offline_threshold);
        match self.mode {
            ClassifierMode::Coarse if !stale => self.coarse.classify(window).map(|c| c.to_update()),
            _ => Some(self.classifier.classify(window, now).to_update()),
        }
    }

    /// Returns how many stored records changed. Only an unreadable registry
    /// aborts the run.
    pub fn run(&self, now: DateTime<Utc>) -> Result<usize, JobError> {
        let vessels = self.registry.vessels()?;
        let mut changed = 0;

        for vessel in &vessels {
            let window = match self.store.recent_window(&vessel.mmsi, self.lookback, self.max_points, now) {
                Ok(window) => window,
                Err(e) => {
                    warn!(mmsi = %vessel.mmsi, "Failed to read track window: {}", e);
                    continue;
                }
            };

            let Some(update) = self.decide(&window, now) else {
                debug!(mmsi = %vessel.mmsi, "No usable speed samples, keeping prior status");
                continue;
            };
            AppMetrics::add(&self.metrics.vessels_classified, 1);

            match self.publisher.publish(&vessel.mmsi, &update) {
                Ok(true) => {
                    changed += 1;
                    AppMetrics::add(&self.metrics.status_changes, 1);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(mmsi = %vessel.mmsi, "Failed to publish status: {}", e);
                    AppMetrics::add(&self.metrics.publish_failures, 1);
                }
            }
        }

        info!("Classification run: {} vessels, {} status changes", vessels.len(), changed);
        Ok(changed)
    }
}
