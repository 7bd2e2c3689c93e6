use crate::config::ClassifierConfig;
use crate::vessel::{TrackPoint, TrackWindow};

/// Conversion factor from knots to meters per second
pub const KNOTS_TO_MS: f64 = 0.514444;

/// Representative speed of a vessel over a track window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedEstimate {
    /// Median of speeds derived from consecutive fixes (m/s)
    Derived(f64),
    /// Median of carrier-reported speeds, converted to m/s
    Reported(f64),
    /// No usable speed signal in the window
    Unknown,
}

impl SpeedEstimate {
    pub fn meters_per_second(&self) -> Option<f64> {
        match self {
            SpeedEstimate::Derived(v) | SpeedEstimate::Reported(v) => Some(*v),
            SpeedEstimate::Unknown => None,
        }
    }

    pub fn knots(&self) -> Option<f64> {
        self.meters_per_second().map(|v| v / KNOTS_TO_MS)
    }
}

pub struct SpeedEstimator {
    max_plausible_speed_ms: f64,
    median_sample_count: usize,
}

impl SpeedEstimator {
    pub fn new(max_plausible_speed_ms: f64, median_sample_count: usize) -> Self {
        Self {
            max_plausible_speed_ms,
            median_sample_count: median_sample_count.max(1),
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(config.max_plausible_speed_ms, config.median_sample_count)
    }

    /// Geometry first, carrier-reported speed as fallback.
    pub fn estimate(&self, window: &TrackWindow) -> SpeedEstimate {
        let series = self.speed_series(window.points());
        if let Some(speed) = self.representative_speed(&series) {
            return SpeedEstimate::Derived(speed);
        }
        match reported_speed_ms(window.points()) {
            Some(speed) => SpeedEstimate::Reported(speed),
            None => SpeedEstimate::Unknown,
        }
    }

    /// Speeds (m/s) between consecutive fixes, oldest first.
    ///
    /// Pairs with a non-positive time delta are skipped and speeds outside
    /// `[0, max_plausible]` are dropped as GPS glitches.
    pub fn speed_series(&self, points: &[TrackPoint]) -> Vec<f64> {
        let mut fixes: Vec<&TrackPoint> = points.iter().filter(|p| p.position.is_valid()).collect();
        fixes.sort_by_key(|p| p.observed_at);

        fixes
            .windows(2)
            .filter_map(|pair| {
                let dt = (pair[1].observed_at - pair[0].observed_at).num_milliseconds() as f64 / 1000.0;
                if dt <= 0.0 {
                    return None;
                }
                let speed = pair[0].position.distance_to(&pair[1].position) / dt;
                (speed.is_finite() && (0.0..=self.max_plausible_speed_ms).contains(&speed)).then_some(speed)
            })
            .collect()
    }

    /// Median of the most recent accepted speeds
    pub fn representative_speed(&self, series: &[f64]) -> Option<f64> {
        let start = series.len().saturating_sub(self.median_sample_count);
        median(&series[start..])
    }
}

/// Median of the non-negative reported speeds, knots converted to m/s
pub fn reported_speed_ms(points: &[TrackPoint]) -> Option<f64> {
    let speeds: Vec<f64> = points
        .iter()
        .filter_map(|p| p.reported_speed_kn)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .collect();
    median(&speeds).map(|kn| kn * KNOTS_TO_MS)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{EARTH_RADIUS_M, Position};
    use crate::vessel::VesselId;
    use approx::assert_abs_diff_eq;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 6, 0, 0).unwrap()
    }

    /// Degrees of latitude spanning `meters` along a meridian
    fn lat_offset(meters: f64) -> f64 {
        (meters / EARTH_RADIUS_M).to_degrees()
    }

    fn fix(lat: f64, seconds: i64) -> TrackPoint {
        TrackPoint::basic(VesselId::new("A"), Position::new(lat, 120.0), base() + Duration::seconds(seconds))
    }

    fn estimator() -> SpeedEstimator {
        SpeedEstimator::new(15.0, 24)
    }

    #[test]
    fn test_one_meter_per_second() {
        let points = vec![fix(0.0, 0), fix(lat_offset(1000.0), 1000)];
        let series = estimator().speed_series(&points);
        assert_eq!(series.len(), 1);
        assert_abs_diff_eq!(series[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_time_delta_is_dropped() {
        let points = vec![fix(0.0, 0), fix(lat_offset(1000.0), 0)];
        assert!(estimator().speed_series(&points).is_empty());
    }

    #[test]
    fn test_teleport_is_rejected() {
        let points = vec![
            fix(0.0, 0),
            fix(lat_offset(600.0), 600),
            fix(lat_offset(50_600.0), 610),
            fix(lat_offset(51_200.0), 1210),
        ];
        let series = estimator().speed_series(&points);
        assert_eq!(series.len(), 2);
        assert!(series.iter().all(|s| *s <= 15.0));
    }

    #[test]
    fn test_out_of_order_points_are_sorted() {
        let points = vec![fix(lat_offset(200.0), 200), fix(0.0, 0), fix(lat_offset(400.0), 400)];
        let series = estimator().speed_series(&points);
        assert_eq!(series.len(), 2);
        assert_abs_diff_eq!(series[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(series[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_median_uses_most_recent_samples() {
        let est = SpeedEstimator::new(15.0, 3);
        let series = [9.0, 9.0, 9.0, 1.0, 2.0, 3.0];
        assert_eq!(est.representative_speed(&series), Some(2.0));
        assert_eq!(est.representative_speed(&[]), None);
    }

    #[test]
    fn test_median_even_count() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_single_point_falls_back_to_reported_speed() {
        let mut point = fix(0.0, 0);
        point.reported_speed_kn = Some(10.0);
        let window = TrackWindow::new(VesselId::new("A"), vec![point]);
        match estimator().estimate(&window) {
            SpeedEstimate::Reported(v) => assert_abs_diff_eq!(v, 5.14444, epsilon = 1e-9),
            other => panic!("expected reported speed, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_reported_speeds_are_ignored() {
        let mut a = fix(0.0, 0);
        a.reported_speed_kn = Some(-1.0);
        let mut b = fix(0.0, 0);
        b.reported_speed_kn = Some(2.0);
        assert_abs_diff_eq!(reported_speed_ms(&[a.clone(), b]).unwrap(), 2.0 * KNOTS_TO_MS, epsilon = 1e-9);
        assert_eq!(reported_speed_ms(&[a]), None);
    }

    #[test]
    fn test_no_signal_is_unknown() {
        let window = TrackWindow::new(VesselId::new("A"), vec![fix(0.0, 0)]);
        assert_eq!(estimator().estimate(&window), SpeedEstimate::Unknown);
        assert_eq!(SpeedEstimate::Unknown.knots(), None);
    }

    #[test]
    fn test_derived_estimate_knots() {
        let points: Vec<TrackPoint> = (0..5).map(|i| fix(lat_offset(i as f64 * 600.0), i * 600)).collect();
        let window = TrackWindow::new(VesselId::new("A"), points);
        let estimate = estimator().estimate(&window);
        assert!(matches!(estimate, SpeedEstimate::Derived(_)));
        assert_abs_diff_eq!(estimate.knots().unwrap(), 1.0 / KNOTS_TO_MS, epsilon = 1e-6);
    }
}
