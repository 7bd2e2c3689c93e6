use chrono::{DateTime, Duration, Utc};

use crate::config::ClassifierConfig;
use crate::geo::Position;
use crate::movement_analyzer::MovementAnalyzer;
use crate::speed_estimator::{KNOTS_TO_MS, SpeedEstimator};
use crate::vessel::{StatusUpdate, TrackWindow, VesselState};

/// Raw carrier status phrases that dredgers broadcast while working.
const WORK_STATUS_MARKERS: [&str; 5] = [
    "restricted maneuverability",
    "restricted manoeuvrability",
    "engaged in fishing",
    "操作能力受限",
    "正在捕鱼",
];

/// A reading of 0.1 kn or less counts as completely stationary for the coarse path
const COARSE_STATIONARY_MS: f64 = 0.1 * KNOTS_TO_MS;

/// Speed bands, m/s: `[0, moored_below)` moored, `[moored_below, working_up_to]`
/// dredging, above `working_up_to` underway.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedBands {
    pub moored_below: f64,
    pub working_up_to: f64,
}

impl SpeedBands {
    pub fn new(moored_below: f64, working_up_to: f64) -> Self {
        Self {
            moored_below,
            working_up_to,
        }
    }

    /// Unknown speed maps to Offline
    pub fn classify(&self, speed_ms: Option<f64>) -> VesselState {
        match speed_ms {
            None => VesselState::Offline,
            Some(v) if v < self.moored_below => VesselState::Moored,
            Some(v) if v <= self.working_up_to => VesselState::Dredging,
            Some(_) => VesselState::Underway,
        }
    }
}

/// Outcome of one classification pass for one vessel.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: VesselState,
    pub speed_ms: Option<f64>,
    pub heading: Option<f64>,
    pub location: Option<Position>,
    pub as_of: Option<DateTime<Utc>>,
}

impl Classification {
    fn offline(heading: Option<f64>, as_of: Option<DateTime<Utc>>) -> Self {
        Self {
            status: VesselState::Offline,
            speed_ms: None,
            heading,
            location: None,
            as_of,
        }
    }

    pub fn speed_kn(&self) -> Option<f64> {
        self.speed_ms.map(|v| v / KNOTS_TO_MS)
    }

    pub fn to_update(&self) -> StatusUpdate {
        StatusUpdate {
            status: self.status,
            speed_kn: self.speed_kn(),
            heading: self.heading,
            location: self.location,
            status_as_of: self.as_of,
        }
    }
}

/// Stateless classifier over a fine-grained track window.
pub struct StatusClassifier {
    offline_threshold: Duration,
    analyzer: MovementAnalyzer,
    estimator: SpeedEstimator,
    bands: SpeedBands,
}

impl StatusClassifier {
    pub fn new(offline_threshold: Duration, analyzer: MovementAnalyzer, estimator: SpeedEstimator, bands: SpeedBands) -> Self {
        Self {
            offline_threshold,
            analyzer,
            estimator,
            bands,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(
            config.offline_threshold(),
            MovementAnalyzer::from_config(config),
            SpeedEstimator::from_config(config),
            SpeedBands::new(config.moored_below_ms, config.working_up_to_ms),
        )
    }

    /// First match wins: stale or missing data, stationarity, then speed bands.
    pub fn classify(&self, window: &TrackWindow, now: DateTime<Utc>) -> Classification {
        let Some(latest) = window.latest() else {
            return Classification::offline(None, None);
        };
        if now - latest.observed_at > self.offline_threshold {
            return Classification::offline(latest.reported_heading, Some(latest.observed_at));
        }

        let location = latest.position.is_valid().then_some(latest.position);
        let heading = latest.reported_heading;

        if self.analyzer.is_stationary(window.points(), latest.observed_at) {
            return Classification {
                status: VesselState::Moored,
                speed_ms: Some(0.0),
                heading,
                location,
                as_of: Some(latest.observed_at),
            };
        }

        let speed_ms = self.estimator.estimate(window).meters_per_second();
        let status = self.bands.classify(speed_ms);
        let speed_ms = match status {
            VesselState::Offline => None,
            VesselState::Moored => Some(0.0),
            _ => speed_ms,
        };

        Classification {
            status,
            speed_ms,
            heading,
            location,
            as_of: Some(latest.observed_at),
        }
    }
}

/// Heuristic over coarse samples: mean reported speed of the most recent
/// samples, with the carrier's raw status able to lift a slow but moving
/// reading to Dredging.
pub struct CoarseClassifier {
    sample_count: usize,
    bands: SpeedBands,
}

impl CoarseClassifier {
    pub fn new(sample_count: usize, bands: SpeedBands) -> Self {
        Self {
            sample_count: sample_count.max(1),
            bands,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(
            config.coarse_sample_count,
            SpeedBands::new(config.coarse_moored_below_ms, config.coarse_working_up_to_ms),
        )
    }

    /// None when no sample carries a usable speed; the caller keeps the prior state.
    pub fn classify(&self, window: &TrackWindow) -> Option<Classification> {
        let points = window.points();
        let recent = &points[points.len().saturating_sub(self.sample_count)..];
        let latest = recent.last()?;

        let speeds: Vec<f64> = recent
            .iter()
            .filter_map(|p| p.reported_speed_kn)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|kn| kn * KNOTS_TO_MS)
            .collect();
        if speeds.is_empty() {
            return None;
        }
        let average = speeds.iter().sum::<f64>() / speeds.len() as f64;

        let mut status = self.bands.classify(Some(average));
        if status == VesselState::Moored && average > COARSE_STATIONARY_MS && indicates_work(&latest.raw_status) {
            status = VesselState::Dredging;
        }

        Some(Classification {
            status,
            speed_ms: Some(if status == VesselState::Moored { 0.0 } else { average }),
            heading: latest.reported_heading,
            location: latest.position.is_valid().then_some(latest.position),
            as_of: Some(latest.observed_at),
        })
    }
}

/// Carrier status text that signals active work (restricted maneuverability, fishing)
pub fn indicates_work(raw_status: &str) -> bool {
    let lowered = raw_status.to_lowercase();
    WORK_STATUS_MARKERS.iter().any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::EARTH_RADIUS_M;
    use crate::vessel::{TrackPoint, VesselId};
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 15, 12, 0, 0).unwrap()
    }

    /// One fix every `step_minutes`, moving north at `speed_ms`, the last one `age_minutes` old
    fn steady_track(speed_ms: f64, count: i64, step_minutes: i64, age_minutes: i64) -> TrackWindow {
        let id = VesselId::new("413999999");
        let start = now() - Duration::minutes(age_minutes + step_minutes * (count - 1));
        let points = (0..count)
            .map(|i| {
                let meters = speed_ms * (i * step_minutes * 60) as f64;
                let lat = 30.5 + (meters / EARTH_RADIUS_M).to_degrees();
                let mut p = TrackPoint::basic(id.clone(), Position::new(lat, 122.3), start + Duration::minutes(i * step_minutes));
                p.reported_heading = Some(0.0);
                p
            })
            .collect();
        TrackWindow::new(id, points)
    }

    fn classifier() -> StatusClassifier {
        StatusClassifier::from_config(&ClassifierConfig::default())
    }

    #[test]
    fn test_bands_cover_range() {
        let bands = SpeedBands::new(0.3, 3.0);
        assert_eq!(bands.classify(None), VesselState::Offline);
        assert_eq!(bands.classify(Some(0.0)), VesselState::Moored);
        assert_eq!(bands.classify(Some(0.299)), VesselState::Moored);
        assert_eq!(bands.classify(Some(0.3)), VesselState::Dredging);
        assert_eq!(bands.classify(Some(3.0)), VesselState::Dredging);
        assert_eq!(bands.classify(Some(3.0001)), VesselState::Underway);
        assert_eq!(bands.classify(Some(1e6)), VesselState::Underway);
    }

    #[test]
    fn test_no_points_is_offline() {
        let window = TrackWindow::empty(VesselId::new("1"));
        let c = classifier().classify(&window, now());
        assert_eq!(c.status, VesselState::Offline);
        assert_eq!(c.speed_ms, None);
        assert_eq!(c.as_of, None);
    }

    #[test]
    fn test_stale_points_are_offline() {
        let window = steady_track(1.5, 6, 10, 180);
        let c = classifier().classify(&window, now());
        assert_eq!(c.status, VesselState::Offline);
        assert_eq!(c.speed_ms, None);
        assert_eq!(c.location, None);
        assert_eq!(c.as_of, window.latest().map(|p| p.observed_at));
    }

    #[test]
    fn test_small_drift_is_moored_with_zero_speed() {
        let id = VesselId::new("1");
        let points = [(0.0, 120), (30.0, 60), (10.0, 0)]
            .iter()
            .map(|(m, age)| {
                let lat = 30.5 + (m / EARTH_RADIUS_M).to_degrees();
                TrackPoint::basic(id.clone(), Position::new(lat, 122.3), now() - Duration::minutes(*age))
            })
            .collect();
        let window = TrackWindow::new(id, points);
        let c = classifier().classify(&window, now());
        assert_eq!(c.status, VesselState::Moored);
        assert_eq!(c.speed_ms, Some(0.0));
        assert!(c.location.is_some());
    }

    #[test]
    fn test_steady_working_speed_is_dredging() {
        let window = steady_track(1.5, 12, 10, 5);
        let c = classifier().classify(&window, now());
        assert_eq!(c.status, VesselState::Dredging);
        assert_abs_diff_eq!(c.speed_ms.unwrap(), 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(c.speed_kn().unwrap(), 1.5 / KNOTS_TO_MS, epsilon = 1e-6);
        assert_eq!(c.heading, Some(0.0));
    }

    #[test]
    fn test_fast_track_is_underway() {
        let window = steady_track(6.0, 12, 10, 5);
        let c = classifier().classify(&window, now());
        assert_eq!(c.status, VesselState::Underway);
        assert_abs_diff_eq!(c.speed_ms.unwrap(), 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_single_recent_point_without_speed_is_offline() {
        let window = steady_track(0.0, 1, 10, 5);
        let c = classifier().classify(&window, now());
        assert_eq!(c.status, VesselState::Offline);
        assert_eq!(c.speed_ms, None);
    }

    #[test]
    fn test_single_recent_point_uses_reported_speed() {
        let id = VesselId::new("1");
        let mut p = TrackPoint::basic(id.clone(), Position::new(30.0, 122.0), now() - Duration::minutes(3));
        p.reported_speed_kn = Some(12.0);
        let window = TrackWindow::new(id, vec![p]);
        let c = classifier().classify(&window, now());
        assert_eq!(c.status, VesselState::Underway);
        assert_abs_diff_eq!(c.speed_kn().unwrap(), 12.0, epsilon = 1e-9);
    }

    #[test]
    fn test_to_update_carries_fields() {
        let window = steady_track(1.5, 12, 10, 5);
        let c = classifier().classify(&window, now());
        let update = c.to_update();
        assert_eq!(update.status, VesselState::Dredging);
        assert_eq!(update.location, c.location);
        assert_eq!(update.status_as_of, c.as_of);
    }

    fn coarse_window(speeds_kn: &[f64], raw_status: &str) -> TrackWindow {
        let id = VesselId::new("2");
        let points = speeds_kn
            .iter()
            .enumerate()
            .map(|(i, kn)| {
                let mut p = TrackPoint::basic(id.clone(), Position::new(1.3, 103.8), now() - Duration::hours(24 - i as i64));
                p.reported_speed_kn = Some(*kn);
                p.raw_status = raw_status.to_string();
                p
            })
            .collect();
        TrackWindow::new(id, points)
    }

    #[test]
    fn test_coarse_bands() {
        let coarse = CoarseClassifier::from_config(&ClassifierConfig::default());
        let moored = coarse.classify(&coarse_window(&[0.0, 0.2, 0.4], "Moored")).unwrap();
        assert_eq!(moored.status, VesselState::Moored);
        assert_eq!(moored.speed_ms, Some(0.0));

        let working = coarse.classify(&coarse_window(&[4.0, 5.0, 6.0], "Under way using engine")).unwrap();
        assert_eq!(working.status, VesselState::Dredging);

        let underway = coarse.classify(&coarse_window(&[10.0, 11.0, 12.0], "Under way using engine")).unwrap();
        assert_eq!(underway.status, VesselState::Underway);
    }

    #[test]
    fn test_coarse_raw_status_lifts_slow_moving_to_dredging() {
        let coarse = CoarseClassifier::from_config(&ClassifierConfig::default());
        let c = coarse
            .classify(&coarse_window(&[0.5, 0.6, 0.7], "Restricted maneuverability"))
            .unwrap();
        assert_eq!(c.status, VesselState::Dredging);

        let c = coarse.classify(&coarse_window(&[0.5, 0.6, 0.7], "操作能力受限")).unwrap();
        assert_eq!(c.status, VesselState::Dredging);
    }

    #[test]
    fn test_coarse_raw_status_never_changes_stationary_or_underway() {
        let coarse = CoarseClassifier::from_config(&ClassifierConfig::default());
        let still = coarse.classify(&coarse_window(&[0.0, 0.0, 0.0], "Engaged in fishing")).unwrap();
        assert_eq!(still.status, VesselState::Moored);

        let fast = coarse
            .classify(&coarse_window(&[12.0, 12.0, 12.0], "Restricted maneuverability"))
            .unwrap();
        assert_eq!(fast.status, VesselState::Underway);
    }

    #[test]
    fn test_coarse_uses_most_recent_samples() {
        let coarse = CoarseClassifier::new(2, SpeedBands::new(0.5, 4.0));
        let c = coarse.classify(&coarse_window(&[20.0, 20.0, 0.0, 0.0], "")).unwrap();
        assert_eq!(c.status, VesselState::Moored);
    }

    #[test]
    fn test_coarse_without_speeds_is_undecided() {
        let coarse = CoarseClassifier::from_config(&ClassifierConfig::default());
        let id = VesselId::new("3");
        let window = TrackWindow::new(id.clone(), vec![TrackPoint::basic(id, Position::new(1.0, 1.0), now())]);
        assert_eq!(coarse.classify(&window), None);
        assert_eq!(coarse.classify(&TrackWindow::empty(VesselId::new("4"))), None);
    }

    #[test]
    fn test_indicates_work() {
        assert!(indicates_work("Restricted Maneuverability"));
        assert!(indicates_work("engaged in fishing"));
        assert!(!indicates_work("At anchor"));
        assert!(!indicates_work(""));
    }
}
