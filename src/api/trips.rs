use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{prediction_error, store_error, ApiError};
use crate::api::{AppState, ErrorResponse};
use crate::models::{Coordinates, TrainingExample, TripRecord};
use crate::services::features::parse_timestamp;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// A completed trip as reported by the client
#[derive(Debug, Deserialize, ToSchema)]
pub struct LogTripRequest {
    pub destination: String,
    pub leave_time: String,
    pub arrival_time: String,
    pub start_coord: Coordinates,
    pub end_coord: Coordinates,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TripListResponse {
    pub trips: Vec<TripRecord>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TripExportResponse {
    pub examples: Vec<TrainingExample>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TripListQuery {
    /// Maximum number of trips, newest first (default 50)
    pub limit: Option<usize>,
}

/// Record a completed trip in the personal log
#[utoipa::path(
    post,
    path = "/api/trips",
    request_body = LogTripRequest,
    responses(
        (status = 201, description = "Trip logged", body = TripRecord),
        (status = 400, description = "Malformed or inconsistent trip", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn log_trip(
    State(state): State<AppState>,
    Json(body): Json<LogTripRequest>,
) -> Result<(StatusCode, Json<TripRecord>), ApiError> {
    let leave_time = parse_timestamp(&body.leave_time).map_err(prediction_error)?;
    let arrival_time = parse_timestamp(&body.arrival_time).map_err(prediction_error)?;

    let trip = TripRecord::from_log(
        &body.destination,
        leave_time,
        arrival_time,
        body.start_coord,
        body.end_coord,
    );
    state.trips.insert_trip(&trip).await.map_err(store_error)?;

    Ok((StatusCode::CREATED, Json(trip)))
}

/// List logged trips, newest first
#[utoipa::path(
    get,
    path = "/api/trips",
    params(TripListQuery),
    responses(
        (status = 200, description = "Logged trips", body = TripListResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn list_trips(
    State(state): State<AppState>,
    Query(query): Query<TripListQuery>,
) -> Result<Json<TripListResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(MAX_LIST_LIMIT);
    let trips = state.trips.list_trips(limit).await.map_err(store_error)?;

    Ok(Json(TripListResponse { trips }))
}

/// Export the whole trip log as flattened model features
#[utoipa::path(
    get,
    path = "/api/trips/export",
    responses(
        (status = 200, description = "One example per logged trip, newest first", body = TripExportResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn export_trips(
    State(state): State<AppState>,
) -> Result<Json<TripExportResponse>, ApiError> {
    let trips = state
        .trips
        .list_trips(usize::MAX)
        .await
        .map_err(store_error)?;
    let examples = trips.iter().map(TrainingExample::from).collect();

    Ok(Json(TripExportResponse { examples }))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{body_json, get, post_json, test_app, TestApp};
    use crate::config::MatchPolicy;
    use crate::store::{TripHistory, TripStore};
    use axum::http::StatusCode;
    use serde_json::json;

    fn trip_body(destination: &str, leave: &str, arrive: &str) -> serde_json::Value {
        json!({
            "destination": destination,
            "leave_time": leave,
            "arrival_time": arrive,
            "start_coord": { "latitude": 42.3555, "longitude": -71.0605 },
            "end_coord": { "latitude": 42.3736, "longitude": -71.1190 }
        })
    }

    #[tokio::test]
    async fn logged_trip_is_stored_with_derived_features() {
        let TestApp { router, trips } = test_app(Vec::new());
        let response = post_json(
            router,
            "/api/trips",
            trip_body(
                " Harvard Square ",
                "2024-06-08T10:15:00-04:00",
                "2024-06-08T10:41:00-04:00",
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["destination"], "Harvard Square");
        assert_eq!(body["travel_time_minutes"], 26.0);
        assert_eq!(body["day_of_week"], 6);
        assert_eq!(body["is_weekend"], true);

        let stored = trips
            .trips_for_destination("harvard", MatchPolicy::Contains)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn backwards_trip_is_rejected() {
        let TestApp { router, trips } = test_app(Vec::new());
        let response = post_json(
            router,
            "/api/trips",
            trip_body("Gym", "2024-06-08T10:41:00-04:00", "2024-06-08T10:15:00-04:00"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(trips.list_trips(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_newest_first_with_limit() {
        let TestApp { router, .. } = test_app(Vec::new());
        for (leave, arrive) in [
            ("2024-06-03T08:00:00-04:00", "2024-06-03T08:25:00-04:00"),
            ("2024-06-05T08:00:00-04:00", "2024-06-05T08:22:00-04:00"),
            ("2024-06-04T08:00:00-04:00", "2024-06-04T08:24:00-04:00"),
        ] {
            let response =
                post_json(router.clone(), "/api/trips", trip_body("Office", leave, arrive)).await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = get(router, "/api/trips?limit=2").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let trips = body["trips"].as_array().unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0]["leave_time"], "2024-06-05T08:00:00-04:00");
        assert_eq!(trips[1]["leave_time"], "2024-06-04T08:00:00-04:00");
    }

    #[tokio::test]
    async fn export_includes_delay_flag() {
        let TestApp { router, .. } = test_app(Vec::new());
        // Same point, so the expected time is zero and only the 5 minute margin counts
        let here = json!({ "latitude": 42.3555, "longitude": -71.0605 });
        for (leave, arrive) in [
            ("2024-06-03T12:00:00Z", "2024-06-03T12:05:00Z"),
            ("2024-06-04T12:00:00Z", "2024-06-04T12:06:00Z"),
        ] {
            let body = json!({
                "destination": "hello",
                "leave_time": leave,
                "arrival_time": arrive,
                "start_coord": here,
                "end_coord": here
            });
            let response = post_json(router.clone(), "/api/trips", body).await;
            assert_eq!(response.status(), StatusCode::CREATED);
            let logged = body_json(response).await;
            assert_eq!(logged["expected_time_minutes"], 0.0);
        }

        let response = get(router, "/api/trips/export").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let examples = body["examples"].as_array().unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0]["travel_time_minutes"], 6.0);
        assert_eq!(examples[0]["was_delayed"], true);
        assert_eq!(examples[1]["travel_time_minutes"], 5.0);
        assert_eq!(examples[1]["was_delayed"], false);
        assert_eq!(examples[1]["destination_encoded"], 99_162_322);
    }
}
