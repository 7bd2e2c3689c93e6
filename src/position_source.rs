use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::SourceError;
use crate::geo::Position;
use crate::vessel::{TrackPoint, VesselId};

/// Raw carrier status text is cut to this many characters
pub const MAX_RAW_STATUS_CHARS: usize = 255;

/// Coordinates this close to (0, 0) are the carrier's "no fix" placeholder
const NULL_ISLAND_EPSILON_DEG: f64 = 0.01;

/// Loosely-typed position report as delivered by the fleet API.
/// Numeric fields may arrive as numbers or numeric strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PositionReport {
    #[serde(default, deserialize_with = "lenient_string")]
    pub mmsi: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lon: Option<f64>,
    /// knots
    #[serde(default, deserialize_with = "lenient_f64")]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub heading: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub updatetime: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub shipname: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FleetResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    list: Vec<Value>,
}

/// Why a report was not turned into a track point
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("report has no coordinates")]
    MissingCoordinates,
    #[error("report sits on the null-island placeholder")]
    NullIsland,
    #[error("coordinates out of range: {0}, {1}")]
    OutOfRange(f64, f64),
    #[error("unparseable timestamp '{0}'")]
    MalformedTimestamp(String),
}

impl PositionReport {
    /// Validate once at the boundary. Missing timestamp means "observed now",
    /// missing raw status becomes "Unknown" and an overlong one is truncated.
    pub fn to_track_point(&self, vessel_id: &VesselId, now: DateTime<Utc>) -> Result<TrackPoint, RejectReason> {
        let (Some(lat), Some(lon)) = (self.lat, self.lon) else {
            return Err(RejectReason::MissingCoordinates);
        };
        if lat.abs() < NULL_ISLAND_EPSILON_DEG && lon.abs() < NULL_ISLAND_EPSILON_DEG {
            return Err(RejectReason::NullIsland);
        }
        let position = Position::new(lat, lon);
        if !position.is_valid() {
            return Err(RejectReason::OutOfRange(lat, lon));
        }

        let observed_at = match self.updatetime.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => parse_timestamp(raw).ok_or_else(|| RejectReason::MalformedTimestamp(raw.to_string()))?,
            None => now,
        };

        Ok(TrackPoint {
            vessel_id: vessel_id.clone(),
            position,
            reported_speed_kn: self.speed.filter(|v| v.is_finite()),
            reported_heading: self.heading.filter(|v| v.is_finite()),
            raw_status: self
                .status
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("Unknown")
                .chars()
                .take(MAX_RAW_STATUS_CHARS)
                .collect(),
            observed_at,
        })
    }

    /// Name reported by the carrier, if any
    pub fn vessel_name(&self) -> Option<&str> {
        [self.shipname.as_deref(), self.name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|n| !n.is_empty())
    }
}

/// Accepts RFC 3339, naive `YYYY-MM-DD HH:MM:SS[.f]` / `YYYY-MM-DDTHH:MM:SS[.f]`
/// (taken as UTC) and unix seconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    raw.parse::<i64>().ok().and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Source of the latest position of every vessel in the fleet.
pub trait PositionSource: Send + Sync {
    /// Latest report per vessel. Vessels absent from the map have no fresh data.
    fn fetch_all(&self) -> Result<HashMap<VesselId, PositionReport>, SourceError>;
}

/// Decode the fleet API envelope `{"result": "ok", "list": [...]}`.
/// Entries without an identifier or that fail to decode are skipped.
pub fn decode_fleet_response(body: &str) -> Result<HashMap<VesselId, PositionReport>, SourceError> {
    let response: FleetResponse = serde_json::from_str(body)?;
    match response.result.as_deref() {
        Some("ok") => {}
        other => return Err(SourceError::Rejected(other.unwrap_or("missing result").to_string())),
    }

    let mut reports = HashMap::new();
    for item in response.list {
        let report: PositionReport = match serde_json::from_value(item) {
            Ok(r) => r,
            Err(e) => {
                debug!("Skipping undecodable fleet entry: {}", e);
                continue;
            }
        };
        if let Some(id) = report.mmsi.as_deref().and_then(VesselId::parse) {
            reports.insert(id, report);
        }
    }
    Ok(reports)
}

/// Blocking HTTP client for the fleet position endpoint.
pub struct FleetApiClient {
    client: reqwest::blocking::Client,
    url: String,
}

impl FleetApiClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client, url: url.into() })
    }
}

impl PositionSource for FleetApiClient {
    fn fetch_all(&self) -> Result<HashMap<VesselId, PositionReport>, SourceError> {
        let response = self.client.get(&self.url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        let body = response.text()?;
        decode_fleet_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_lenient_fields() {
        let body = r#"{
            "result": "ok",
            "list": [
                {"mmsi": 413000001, "lat": "31.25", "lon": 121.5, "speed": "9.8", "heading": 270,
                 "status": "Under way using engine", "updatetime": "2025-09-30 23:50:00", "shipname": "XIN HAI XUN"},
                {"mmsi": "", "lat": 1.0, "lon": 1.0},
                {"lat": 1.0, "lon": 1.0},
                {"mmsi": "413000002", "lat": "n/a", "lon": null, "speed": "fast"}
            ]
        }"#;
        let reports = decode_fleet_response(body).unwrap();
        assert_eq!(reports.len(), 2);

        let first = &reports[&VesselId::new("413000001")];
        assert_eq!(first.lat, Some(31.25));
        assert_eq!(first.speed, Some(9.8));
        assert_eq!(first.heading, Some(270.0));
        assert_eq!(first.vessel_name(), Some("XIN HAI XUN"));

        let second = &reports[&VesselId::new("413000002")];
        assert_eq!(second.lat, None);
        assert_eq!(second.lon, None);
        assert_eq!(second.speed, None);
    }

    #[test]
    fn test_decode_rejected_envelope() {
        let err = decode_fleet_response(r#"{"result": "error", "msg": "bad token"}"#).unwrap_err();
        assert!(matches!(err, SourceError::Rejected(ref r) if r == "error"));
        assert!(matches!(decode_fleet_response("<html>"), Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_track_point_conversion() {
        let report = PositionReport {
            mmsi: Some("413000001".to_string()),
            lat: Some(31.25),
            lon: Some(121.5),
            speed: Some(9.8),
            heading: Some(270.0),
            status: None,
            updatetime: Some("2025-09-30T23:50:00Z".to_string()),
            ..Default::default()
        };
        let id = VesselId::new("413000001");
        let point = report.to_track_point(&id, now()).unwrap();
        assert_eq!(point.position, Position::new(31.25, 121.5));
        assert_eq!(point.reported_speed_kn, Some(9.8));
        assert_eq!(point.raw_status, "Unknown");
        assert_eq!(point.observed_at, Utc.with_ymd_and_hms(2025, 9, 30, 23, 50, 0).unwrap());
    }

    #[test]
    fn test_missing_timestamp_is_now() {
        let report = PositionReport {
            lat: Some(10.0),
            lon: Some(20.0),
            ..Default::default()
        };
        let point = report.to_track_point(&VesselId::new("1"), now()).unwrap();
        assert_eq!(point.observed_at, now());
    }

    #[test]
    fn test_invalid_reports_are_rejected() {
        let id = VesselId::new("1");
        let missing = PositionReport {
            lat: Some(10.0),
            ..Default::default()
        };
        assert_eq!(missing.to_track_point(&id, now()), Err(RejectReason::MissingCoordinates));

        let null_island = PositionReport {
            lat: Some(0.001),
            lon: Some(-0.002),
            ..Default::default()
        };
        assert_eq!(null_island.to_track_point(&id, now()), Err(RejectReason::NullIsland));

        let out_of_range = PositionReport {
            lat: Some(95.0),
            lon: Some(20.0),
            ..Default::default()
        };
        assert!(matches!(out_of_range.to_track_point(&id, now()), Err(RejectReason::OutOfRange(..))));

        let bad_time = PositionReport {
            lat: Some(10.0),
            lon: Some(20.0),
            updatetime: Some("yesterday".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad_time.to_track_point(&id, now()), Err(RejectReason::MalformedTimestamp(_))));
    }

    #[test]
    fn test_overlong_raw_status_is_truncated() {
        let long_status = "操作能力受限 restricted maneuverability ".repeat(20);
        let report = PositionReport {
            lat: Some(22.2),
            lon: Some(113.6),
            status: Some(long_status.clone()),
            ..Default::default()
        };
        let point = report.to_track_point(&VesselId::new("1"), now()).unwrap();
        assert_eq!(point.raw_status.chars().count(), MAX_RAW_STATUS_CHARS);
        assert!(long_status.trim().starts_with(&point.raw_status));
        assert!(crate::status_classifier::indicates_work(&point.raw_status));

        let short = PositionReport {
            lat: Some(22.2),
            lon: Some(113.6),
            status: Some(" Moored ".to_string()),
            ..Default::default()
        };
        assert_eq!(short.to_track_point(&VesselId::new("1"), now()).unwrap().raw_status, "Moored");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp("2025-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-02T11:04:05+08:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-02T03:04:05.000"), Some(expected));
        assert_eq!(parse_timestamp(&expected.timestamp().to_string()), Some(expected));
        assert_eq!(parse_timestamp("not a time"), None);
    }

    #[test]
    fn test_vessel_name_fallback() {
        let report = PositionReport {
            shipname: Some("  ".to_string()),
            name: Some("HAI YANG SHI YOU".to_string()),
            ..Default::default()
        };
        assert_eq!(report.vessel_name(), Some("HAI YANG SHI YOU"));
        assert_eq!(PositionReport::default().vessel_name(), None);
    }
}
