use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use std::sync::Arc;

use crate::status_publisher::VesselRegistry;
use crate::track_store::TrackStore;
use crate::vessel::{TrackWindow, Vessel, VesselId, VesselState, VesselStatusRecord};

const DEFAULT_TRACK_DAYS: u32 = 1;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TrackStore>,
    pub registry: Arc<dyn VesselRegistry>,
    /// How recent `status_as_of` must be for a vessel to count as active
    pub active_threshold: Duration,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TrackQuery {
    pub mmsi: Option<String>,
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct VesselOverview {
    #[serde(flatten)]
    pub vessel: Vessel,
    pub status: VesselStatusRecord,
    pub recently_active: bool,
}

#[derive(Debug, Serialize)]
pub struct FleetOverview {
    pub total: usize,
    /// Vessels whose status is anything but offline
    pub tracked: usize,
    pub vessels: Vec<VesselOverview>,
}

pub async fn get_track(
    State(state): State<AppState>,
    Query(params): Query<TrackQuery>,
) -> Result<Json<ApiResponse<TrackWindow>>, StatusCode> {
    info!(?params, "GET /api/track called");
    let Some(vessel_id) = params.mmsi.as_deref().and_then(VesselId::parse) else {
        return Ok(Json(ApiResponse::error("mmsi is required".to_string())));
    };
    let days = params.days.unwrap_or(DEFAULT_TRACK_DAYS);

    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.recent_days(&vessel_id, days, Utc::now()))
        .await
        .map_err(|e| {
            error!(error = %e, "Track query task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    match result {
        Ok(window) => Ok(Json(ApiResponse::ok(window))),
        Err(e) => {
            error!(error = %e, "Failed to fetch track");
            Ok(Json(ApiResponse::error(e.to_string())))
        }
    }
}

pub async fn get_vessels(State(state): State<AppState>) -> Result<Json<ApiResponse<FleetOverview>>, StatusCode> {
    info!("GET /api/vessels called");
    let registry = state.registry.clone();
    let result = tokio::task::spawn_blocking(move || registry.statuses())
        .await
        .map_err(|e| {
            error!(error = %e, "Vessel query task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    match result {
        Ok(statuses) => Ok(Json(ApiResponse::ok(fleet_overview(
            statuses,
            Utc::now(),
            state.active_threshold,
        )))),
        Err(e) => {
            error!(error = %e, "Failed to fetch vessels");
            Ok(Json(ApiResponse::error(e.to_string())))
        }
    }
}

pub fn fleet_overview(
    statuses: Vec<(Vessel, VesselStatusRecord)>,
    now: chrono::DateTime<Utc>,
    active_threshold: Duration,
) -> FleetOverview {
    let vessels: Vec<VesselOverview> = statuses
        .into_iter()
        .map(|(vessel, status)| VesselOverview {
            recently_active: status.is_recently_active(now, active_threshold),
            vessel,
            status,
        })
        .collect();
    FleetOverview {
        total: vessels.len(),
        tracked: vessels.iter().filter(|v| v.status.status != VesselState::Offline).count(),
        vessels,
    }
}

pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/track", get(get_track))
        .route("/vessels", get(get_vessels))
        .with_state(state)
}
