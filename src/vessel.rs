use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Position;

/// Maritime station identifier (MMSI) keying every per-vessel record.
/// Always trimmed and never blank, whichever way it was built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VesselId(String);

impl VesselId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    /// Returns None for blank identifiers
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VesselId {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| "vessel identifier must not be blank".to_string())
    }
}

impl From<VesselId> for String {
    fn from(id: VesselId) -> Self {
        id.0
    }
}

impl std::fmt::Display for VesselId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One immutable position observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackPoint {
    pub vessel_id: VesselId,
    pub position: Position,
    /// knots, as reported by the carrier
    pub reported_speed_kn: Option<f64>,
    /// degrees
    pub reported_heading: Option<f64>,
    pub raw_status: String,
    pub observed_at: DateTime<Utc>,
}

impl TrackPoint {
    pub fn basic(vessel_id: VesselId, position: Position, observed_at: DateTime<Utc>) -> Self {
        Self {
            vessel_id,
            position,
            reported_speed_kn: None,
            reported_heading: None,
            raw_status: String::new(),
            observed_at,
        }
    }
}

/// Track points of one vessel, ascending by `observed_at`.
#[derive(Debug, Clone, Serialize)]
pub struct TrackWindow {
    pub vessel_id: VesselId,
    points: Vec<TrackPoint>,
}

impl TrackWindow {
    pub fn new(vessel_id: VesselId, mut points: Vec<TrackPoint>) -> Self {
        points.sort_by_key(|p| p.observed_at);
        Self { vessel_id, points }
    }

    pub fn empty(vessel_id: VesselId) -> Self {
        Self { vessel_id, points: Vec::new() }
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn latest(&self) -> Option<&TrackPoint> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Operating state of a vessel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VesselState {
    #[default]
    Offline,
    Moored,
    Dredging,
    Underway,
}

impl VesselState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VesselState::Offline => "offline",
            VesselState::Moored => "moored",
            VesselState::Dredging => "dredging",
            VesselState::Underway => "underway",
        }
    }
}

impl std::fmt::Display for VesselState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VesselState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "offline" => Ok(VesselState::Offline),
            "moored" => Ok(VesselState::Moored),
            "dredging" => Ok(VesselState::Dredging),
            "underway" => Ok(VesselState::Underway),
            other => Err(format!("unknown vessel state '{}'", other)),
        }
    }
}

/// Reverse-geocoded place of the last known location. Blank fields mean unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub continent: String,
    #[serde(default)]
    pub admin_region: String,
    #[serde(default)]
    pub locality: String,
}

/// Registry entry for a tracked vessel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vessel {
    pub mmsi: VesselId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub fleet: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub place: Option<Place>,
    #[serde(default)]
    pub last_location: Option<Position>,
}

impl Vessel {
    pub fn new(mmsi: VesselId) -> Self {
        Self {
            mmsi,
            name: None,
            company: None,
            fleet: None,
            region: None,
            place: None,
            last_location: None,
        }
    }
}

/// Current derived status of one vessel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VesselStatusRecord {
    pub status: VesselState,
    pub status_as_of: Option<DateTime<Utc>>,
    pub location: Option<Position>,
    pub speed_kn: Option<f64>,
    pub heading: Option<f64>,
    pub region: Option<String>,
}

/// New information for a status record. `None` means "nothing new", except
/// that an `Offline` state always clears the speed.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: VesselState,
    pub speed_kn: Option<f64>,
    pub heading: Option<f64>,
    pub location: Option<Position>,
    pub status_as_of: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn offline() -> Self {
        Self {
            status: VesselState::Offline,
            speed_kn: None,
            heading: None,
            location: None,
            status_as_of: None,
        }
    }
}

impl VesselStatusRecord {
    /// Merge an update into the record. Returns true if anything changed.
    pub fn apply(&mut self, update: &StatusUpdate) -> bool {
        let before = self.clone();

        self.status = update.status;
        self.speed_kn = match update.status {
            VesselState::Offline => None,
            VesselState::Moored => Some(0.0),
            _ => update.speed_kn.or(self.speed_kn),
        };
        if update.heading.is_some() {
            self.heading = update.heading;
        }
        if update.location.is_some() {
            self.location = update.location;
        }
        if update.status_as_of.is_some() {
            self.status_as_of = update.status_as_of;
        }

        *self != before
    }

    /// True when the last observation is no older than `threshold`
    pub fn is_recently_active(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        self.status_as_of.is_some_and(|t| now - t <= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_vessel_id_parse() {
        assert_eq!(VesselId::parse("  413000001 ").unwrap().as_str(), "413000001");
        assert!(VesselId::parse("   ").is_none());
        assert!(VesselId::parse("").is_none());
    }

    #[test]
    fn test_vessel_id_deserializes_trimmed() {
        let vessels: Vec<Vessel> = serde_json::from_str(r#"[{"mmsi":" 413000001 ","name":"Tian Kun Hao"}]"#).unwrap();
        assert_eq!(vessels[0].mmsi, VesselId::new("413000001"));
        assert_eq!(serde_json::to_string(&vessels[0].mmsi).unwrap(), r#""413000001""#);

        assert!(serde_json::from_str::<Vessel>(r#"{"mmsi":"   "}"#).is_err());
        assert!(serde_json::from_str::<Vessel>(r#"{"mmsi":""}"#).is_err());
    }

    #[test]
    fn test_track_window_sorts_ascending() {
        let id = VesselId::new("1");
        let p = Position::new(1.0, 1.0);
        let window = TrackWindow::new(
            id.clone(),
            vec![
                TrackPoint::basic(id.clone(), p, ts(3, 0)),
                TrackPoint::basic(id.clone(), p, ts(1, 0)),
                TrackPoint::basic(id.clone(), p, ts(2, 0)),
            ],
        );
        let times: Vec<_> = window.points().iter().map(|p| p.observed_at).collect();
        assert_eq!(times, vec![ts(1, 0), ts(2, 0), ts(3, 0)]);
        assert_eq!(window.latest().unwrap().observed_at, ts(3, 0));
    }

    #[test]
    fn test_state_round_trip_strings() {
        for state in [VesselState::Offline, VesselState::Moored, VesselState::Dredging, VesselState::Underway] {
            assert_eq!(state.as_str().parse::<VesselState>().unwrap(), state);
        }
        assert_eq!("Dredging".parse::<VesselState>().unwrap(), VesselState::Dredging);
        assert!("anchored".parse::<VesselState>().is_err());
        assert_eq!(VesselState::default(), VesselState::Offline);
    }

    #[test]
    fn test_apply_keeps_prior_optional_fields() {
        let mut record = VesselStatusRecord {
            status: VesselState::Dredging,
            status_as_of: Some(ts(10, 0)),
            location: Some(Position::new(30.0, 122.0)),
            speed_kn: Some(2.5),
            heading: Some(90.0),
            region: Some("East Asia".to_string()),
        };
        let changed = record.apply(&StatusUpdate {
            status: VesselState::Underway,
            speed_kn: None,
            heading: None,
            location: None,
            status_as_of: None,
        });
        assert!(changed);
        assert_eq!(record.status, VesselState::Underway);
        assert_eq!(record.speed_kn, Some(2.5));
        assert_eq!(record.heading, Some(90.0));
        assert_eq!(record.location, Some(Position::new(30.0, 122.0)));
        assert_eq!(record.status_as_of, Some(ts(10, 0)));
        assert_eq!(record.region.as_deref(), Some("East Asia"));
    }

    #[test]
    fn test_apply_moored_forces_zero_and_offline_clears_speed() {
        let mut record = VesselStatusRecord {
            speed_kn: Some(7.0),
            ..Default::default()
        };
        let mut update = StatusUpdate::offline();
        update.status = VesselState::Moored;
        update.speed_kn = Some(3.0);
        record.apply(&update);
        assert_eq!(record.speed_kn, Some(0.0));

        record.apply(&StatusUpdate::offline());
        assert_eq!(record.status, VesselState::Offline);
        assert_eq!(record.speed_kn, None);
    }

    #[test]
    fn test_apply_identical_update_is_unchanged() {
        let mut record = VesselStatusRecord::default();
        let update = StatusUpdate {
            status: VesselState::Underway,
            speed_kn: Some(11.7),
            heading: Some(45.0),
            location: Some(Position::new(1.0, 2.0)),
            status_as_of: Some(ts(8, 30)),
        };
        assert!(record.apply(&update));
        assert!(!record.apply(&update));
    }

    #[test]
    fn test_recently_active() {
        let record = VesselStatusRecord {
            status_as_of: Some(ts(0, 0)),
            ..Default::default()
        };
        assert!(record.is_recently_active(ts(23, 0), Duration::hours(24)));
        assert!(!record.is_recently_active(ts(0, 0) + Duration::hours(25), Duration::hours(24)));
        assert!(!VesselStatusRecord::default().is_recently_active(ts(0, 0), Duration::hours(24)));
    }
}
