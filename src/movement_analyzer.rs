use chrono::{DateTime, Duration, Utc};

use crate::config::ClassifierConfig;
use crate::geo::points_within;
use crate::vessel::TrackPoint;

/// Decides whether a vessel stayed within a small radius of its latest fix.
#[derive(Debug, Clone)]
pub struct MovementAnalyzer {
    window: Duration,
    drift_meters: f64,
    fallback_min_gap: Duration,
}

impl MovementAnalyzer {
    pub fn new(window: Duration, drift_meters: f64, fallback_min_gap: Duration) -> Self {
        Self {
            window,
            drift_meters,
            fallback_min_gap,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(config.stationary_window(), config.drift_meters, config.fallback_min_gap())
    }

    /// With two or more fixes inside `[latest_time - window, ..]`, the vessel is
    /// stationary iff every one of them lies within the drift radius of the
    /// latest fix. With fewer, only the two most recent fixes of the whole
    /// track are compared, and they must be at least `fallback_min_gap` apart.
    /// No valid fixes means "cannot confirm", i.e. false.
    pub fn is_stationary(&self, points: &[TrackPoint], latest_time: DateTime<Utc>) -> bool {
        let mut recent = points_within(points, latest_time, self.window);
        if recent.len() >= 2 {
            recent.sort_by_key(|p| p.observed_at);
            let Some(latest) = recent.last() else {
                return false;
            };
            let max_drift = recent
                .iter()
                .map(|p| latest.position.distance_to(&p.position))
                .fold(0.0, f64::max);
            return max_drift <= self.drift_meters;
        }

        let mut fixes: Vec<&TrackPoint> = points.iter().filter(|p| p.position.is_valid()).collect();
        if fixes.len() < 2 {
            return false;
        }
        fixes.sort_by_key(|p| p.observed_at);
        let latest = fixes[fixes.len() - 1];
        let previous = fixes[fixes.len() - 2];

        if latest.observed_at - previous.observed_at < self.fallback_min_gap {
            return false;
        }
        latest.position.distance_to(&previous.position) <= self.drift_meters
    }
}

impl Default for MovementAnalyzer {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }
}
