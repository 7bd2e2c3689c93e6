use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::app_metrics::AppMetrics;
use crate::error::JobError;
use crate::geocoder::ReverseGeocoder;
use crate::position_source::PositionSource;
use crate::status_publisher::VesselRegistry;
use crate::track_store::TrackStore;

/// Counts of one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    /// Reports returned by the source, registered or not
    pub fetched: usize,
    pub appended: usize,
    /// Reports of registered vessels rejected at validation
    pub skipped: usize,
    /// Reports the track store refused
    pub failed: usize,
}

/// Fetch every fleet position once and append it to the track store.
pub struct IngestionJob {
    source: Arc<dyn PositionSource>,
    store: Arc<dyn TrackStore>,
    registry: Arc<dyn VesselRegistry>,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
    metrics: Arc<AppMetrics>,
}

impl IngestionJob {
    pub fn new(
        source: Arc<dyn PositionSource>,
        store: Arc<dyn TrackStore>,
        registry: Arc<dyn VesselRegistry>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            source,
            store,
            registry,
            geocoder: None,
            metrics,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Only a failed fleet fetch or an unreadable registry aborts the run.
    /// Anything that goes wrong for a single vessel is logged and skipped.
    pub fn run(&self, now: DateTime<Utc>) -> Result<IngestionSummary, JobError> {
        let vessels = self.registry.vessels()?;
        let reports = self.source.fetch_all().inspect_err(|e| {
            warn!("Fleet position fetch failed: {}", e);
            AppMetrics::add(&self.metrics.fetch_failures, 1);
        })?;

        let mut summary = IngestionSummary {
            fetched: reports.len(),
            ..Default::default()
        };
        AppMetrics::add(&self.metrics.positions_fetched, reports.len() as u64);

        for vessel in &vessels {
            let Some(report) = reports.get(&vessel.mmsi) else {
                debug!(mmsi = %vessel.mmsi, "No fresh position");
                continue;
            };

            let point = match report.to_track_point(&vessel.mmsi, now) {
                Ok(point) => point,
                Err(reason) => {
                    debug!(mmsi = %vessel.mmsi, "Skipping position report: {}", reason);
                    summary.skipped += 1;
                    continue;
                }
            };
            let position = point.position;

            if let Err(e) = self.store.append(point) {
                warn!(mmsi = %vessel.mmsi, "Failed to append track point: {}", e);
                AppMetrics::add(&self.metrics.append_failures, 1);
                summary.failed += 1;
                continue;
            }
            summary.appended += 1;
            AppMetrics::add(&self.metrics.points_appended, 1);

            let place = self.geocoder.as_ref().and_then(|g| g.locate(position));
            if let Err(e) = self
                .registry
                .record_sighting(&vessel.mmsi, report.vessel_name(), position, place.as_ref())
            {
                warn!(mmsi = %vessel.mmsi, "Failed to record last location: {}", e);
            }
        }

        info!(
            "Ingestion run: {} fetched, {} appended, {} skipped, {} failed",
            summary.fetched, summary.appended, summary.skipped, summary.failed
        );
        Ok(summary)
    }
}
