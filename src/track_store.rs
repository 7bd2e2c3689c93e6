use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::error::StorageError;
use crate::vessel::{TrackPoint, TrackWindow, VesselId};

/// Longest lookback a caller can ask for; keeps `now - days` inside chrono's range
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Per-vessel track history with bounded retention.
///
/// Implementations keep at most N points per vessel: after an append only
/// the N most recently observed points of that vessel survive. Points of
/// other vessels are never touched by an append.
pub trait TrackStore: Send + Sync {
    /// Insert one point, then trim that vessel's history back to the retention bound.
    /// A point with the same `observed_at` as a stored one replaces it.
    fn append(&self, point: TrackPoint) -> Result<(), StorageError>;

    /// Points observed at or after `now - trailing`, ascending, keeping the
    /// `max_points` most recent ones.
    fn recent_window(
        &self,
        vessel_id: &VesselId,
        trailing: Duration,
        max_points: usize,
        now: DateTime<Utc>,
    ) -> Result<TrackWindow, StorageError>;

    /// Every stored point within the last `days` days, ascending.
    fn recent_days(&self, vessel_id: &VesselId, days: u32, now: DateTime<Utc>) -> Result<TrackWindow, StorageError> {
        let days = days.min(MAX_LOOKBACK_DAYS);
        self.recent_window(vessel_id, Duration::days(days as i64), usize::MAX, now)
    }
}

/// In-process track store backed by one sorted ring per vessel.
pub struct MemoryTrackStore {
    tracks: Mutex<HashMap<VesselId, VecDeque<TrackPoint>>>,
    max_points_per_vessel: usize,
}

impl MemoryTrackStore {
    pub fn new(max_points_per_vessel: usize) -> Self {
        Self {
            tracks: Mutex::new(HashMap::new()),
            max_points_per_vessel: max_points_per_vessel.max(1),
        }
    }

    /// Number of points currently held for a vessel
    pub fn point_count(&self, vessel_id: &VesselId) -> Result<usize, StorageError> {
        let tracks = self.lock()?;
        Ok(tracks.get(vessel_id).map_or(0, |t| t.len()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<VesselId, VecDeque<TrackPoint>>>, StorageError> {
        self.tracks
            .lock()
            .map_err(|_| StorageError::Unavailable("track store lock poisoned".to_string()))
    }
}

impl TrackStore for MemoryTrackStore {
    fn append(&self, point: TrackPoint) -> Result<(), StorageError> {
        let mut tracks = self.lock()?;
        let track = tracks.entry(point.vessel_id.clone()).or_default();

        let idx = track.partition_point(|p| p.observed_at < point.observed_at);
        if idx < track.len() && track[idx].observed_at == point.observed_at {
            track[idx] = point;
        } else {
            track.insert(idx, point);
        }

        while track.len() > self.max_points_per_vessel {
            track.pop_front();
        }
        Ok(())
    }

    fn recent_window(
        &self,
        vessel_id: &VesselId,
        trailing: Duration,
        max_points: usize,
        now: DateTime<Utc>,
    ) -> Result<TrackWindow, StorageError> {
        let tracks = self.lock()?;
        let Some(track) = tracks.get(vessel_id) else {
            return Ok(TrackWindow::empty(vessel_id.clone()));
        };

        let since = now - trailing;
        let start = track.partition_point(|p| p.observed_at < since);
        let available = track.len() - start;
        let skip = available.saturating_sub(max_points);
        let points: Vec<TrackPoint> = track.iter().skip(start + skip).cloned().collect();

        Ok(TrackWindow::new(vessel_id.clone(), points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Position;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, 0, 0, 0).unwrap()
    }

    fn point(id: &str, minutes: i64) -> TrackPoint {
        TrackPoint::basic(VesselId::new(id), Position::new(31.0, 121.8), base() + Duration::minutes(minutes))
    }

    #[test]
    fn test_retention_keeps_most_recent() {
        let store = MemoryTrackStore::new(5);
        let id = VesselId::new("412000001");
        for m in 0..6 {
            store.append(point("412000001", m * 10)).unwrap();
        }
        assert_eq!(store.point_count(&id).unwrap(), 5);

        let window = store.recent_window(&id, Duration::days(1), 100, base() + Duration::hours(2)).unwrap();
        let minutes: Vec<i64> = window.points().iter().map(|p| (p.observed_at - base()).num_minutes()).collect();
        assert_eq!(minutes, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_retention_is_per_vessel() {
        let store = MemoryTrackStore::new(3);
        store.append(point("A", 0)).unwrap();
        store.append(point("A", 1)).unwrap();
        for m in 0..10 {
            store.append(point("B", m)).unwrap();
        }
        assert_eq!(store.point_count(&VesselId::new("A")).unwrap(), 2);
        assert_eq!(store.point_count(&VesselId::new("B")).unwrap(), 3);
    }

    #[test]
    fn test_out_of_order_append_is_sorted_and_trimmed() {
        let store = MemoryTrackStore::new(3);
        let id = VesselId::new("A");
        for m in [30, 10, 20, 40] {
            store.append(point("A", m)).unwrap();
        }
        // older than everything retained: evicted straight away
        store.append(point("A", 5)).unwrap();

        let window = store.recent_days(&id, 1, base() + Duration::hours(1)).unwrap();
        let minutes: Vec<i64> = window.points().iter().map(|p| (p.observed_at - base()).num_minutes()).collect();
        assert_eq!(minutes, vec![20, 30, 40]);
    }

    #[test]
    fn test_duplicate_timestamp_replaces() {
        let store = MemoryTrackStore::new(10);
        let id = VesselId::new("A");
        store.append(point("A", 0)).unwrap();
        let mut replacement = point("A", 0);
        replacement.raw_status = "Moored".to_string();
        store.append(replacement).unwrap();

        assert_eq!(store.point_count(&id).unwrap(), 1);
        let window = store.recent_days(&id, 1, base()).unwrap();
        assert_eq!(window.points()[0].raw_status, "Moored");
    }

    #[test]
    fn test_recent_window_bounds() {
        let store = MemoryTrackStore::new(100);
        let id = VesselId::new("A");
        for m in 0..10 {
            store.append(point("A", m * 30)).unwrap();
        }
        let now = base() + Duration::minutes(270);

        let window = store.recent_window(&id, Duration::hours(2), 100, now).unwrap();
        assert_eq!(window.len(), 5);
        assert_eq!(window.points()[0].observed_at, base() + Duration::minutes(150));

        let capped = store.recent_window(&id, Duration::hours(2), 2, now).unwrap();
        let minutes: Vec<i64> = capped.points().iter().map(|p| (p.observed_at - base()).num_minutes()).collect();
        assert_eq!(minutes, vec![240, 270]);
    }

    #[test]
    fn test_unknown_vessel_is_empty() {
        let store = MemoryTrackStore::new(10);
        let window = store.recent_days(&VesselId::new("nobody"), 3, base()).unwrap();
        assert!(window.is_empty());
    }
}
