use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{bad_request, unavailable, upstream_error, ApiError};
use crate::api::{AppState, ErrorResponse};
use crate::models::{Coordinates, NearbyStop};
use crate::providers::mbta::StopDeparture;

const DEFAULT_RADIUS_MILES: f64 = 0.3;
const MAX_RADIUS_MILES: f64 = 5.0;
const DEFAULT_DEPARTURE_LIMIT: usize = 5;
const MAX_DEPARTURE_LIMIT: usize = 50;

#[derive(Debug, Deserialize, IntoParams)]
pub struct NearbyStopsQuery {
    pub lat: f64,
    pub lon: f64,
    /// Search radius in miles (default 0.3)
    pub radius: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NearbyStopsResponse {
    pub stops: Vec<NearbyStop>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DeparturesQuery {
    /// Maximum number of departures (default 5)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopDeparturesResponse {
    pub departures: Vec<StopDeparture>,
}

/// Transit stops around a point, nearest first
#[utoipa::path(
    get,
    path = "/api/stops/nearby",
    params(NearbyStopsQuery),
    responses(
        (status = 200, description = "Stops within the radius", body = NearbyStopsResponse),
        (status = 400, description = "Invalid coordinates or radius", body = ErrorResponse),
        (status = 502, description = "Stops provider failed", body = ErrorResponse),
        (status = 503, description = "No stops provider configured", body = ErrorResponse)
    ),
    tag = "stops"
)]
pub async fn nearby_stops(
    State(state): State<AppState>,
    Query(query): Query<NearbyStopsQuery>,
) -> Result<Json<NearbyStopsResponse>, ApiError> {
    let origin = Coordinates::new(query.lat, query.lon);
    if !origin.is_valid() {
        return Err(bad_request("lat/lon out of range"));
    }
    let radius = query.radius.unwrap_or(DEFAULT_RADIUS_MILES);
    if !(radius > 0.0 && radius <= MAX_RADIUS_MILES) {
        return Err(bad_request(format!(
            "radius must be within (0, {}] miles",
            MAX_RADIUS_MILES
        )));
    }

    let provider = state
        .stops
        .as_ref()
        .ok_or_else(|| unavailable("No stops provider configured"))?;
    let stops = provider
        .nearby_stops(origin, radius)
        .await
        .map_err(upstream_error)?;

    Ok(Json(NearbyStopsResponse { stops }))
}

/// Upcoming departures from a stop, soonest first
#[utoipa::path(
    get,
    path = "/api/stops/{stop_id}/departures",
    params(
        ("stop_id" = String, Path, description = "MBTA stop id, e.g. place-harsq"),
        DeparturesQuery
    ),
    responses(
        (status = 200, description = "Upcoming departures", body = StopDeparturesResponse),
        (status = 502, description = "Departures provider failed", body = ErrorResponse),
        (status = 503, description = "No departures provider configured", body = ErrorResponse)
    ),
    tag = "stops"
)]
pub async fn stop_departures(
    State(state): State<AppState>,
    Path(stop_id): Path<String>,
    Query(query): Query<DeparturesQuery>,
) -> Result<Json<StopDeparturesResponse>, ApiError> {
    let client = state
        .departures
        .as_ref()
        .ok_or_else(|| unavailable("No departures provider configured"))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DEPARTURE_LIMIT)
        .clamp(1, MAX_DEPARTURE_LIMIT);

    let departures = client
        .next_departures(&stop_id, limit, Utc::now().fixed_offset())
        .await
        .map_err(upstream_error)?;

    Ok(Json(StopDeparturesResponse { departures }))
}
