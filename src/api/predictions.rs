use axum::{extract::State, Json};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{prediction_error, ApiError};
use crate::api::{AppState, ErrorResponse};
use crate::models::{Coordinates, OfflineEstimate, PredictionResult};
use crate::services::features::parse_timestamp;
use crate::services::PredictionRequest;

/// Departures closer than this are "leave now" rather than a reminder
const LEAVE_NOW_WINDOW_SECS: i64 = 60;

#[derive(Debug, Deserialize, ToSchema)]
pub struct PredictionRequestBody {
    pub origin: Coordinates,
    pub destination: String,
    /// RFC 3339 timestamp with offset, e.g. 2024-06-10T09:00:00-04:00
    pub arrival_time: String,
    /// Client clock at request time, defaults to the server clock
    pub requested_at: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OfflineRequestBody {
    pub destination: String,
    pub arrival_time: String,
    pub requested_at: Option<String>,
}

/// What the client should do with a prediction
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReminderPlan {
    LeaveNow {
        message: String,
    },
    Schedule {
        title: String,
        body: String,
        fire_in_seconds: i64,
    },
}

impl ReminderPlan {
    pub fn from_prediction(
        result: &PredictionResult,
        destination: &str,
        now: DateTime<FixedOffset>,
    ) -> Self {
        let fire_in_seconds = (result.departure_time - now).num_seconds();
        if fire_in_seconds <= LEAVE_NOW_WINDOW_SECS {
            return ReminderPlan::LeaveNow {
                message: "You should leave immediately to arrive on time!".to_string(),
            };
        }

        ReminderPlan::Schedule {
            title: format!("Time to leave for {}!", destination.trim()),
            body: format!(
                "{} - {}min total",
                result.primary_route.description,
                result.total_time_needed.round()
            ),
            fire_in_seconds,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PredictionResponse {
    pub prediction: PredictionResult,
    pub reminder: ReminderPlan,
}

/// Parse the arrival time and the optional client clock. Without a client
/// clock the server clock is used, in the arrival time's offset.
fn parse_times(
    arrival_time: &str,
    requested_at: Option<&str>,
) -> Result<(DateTime<FixedOffset>, DateTime<FixedOffset>), ApiError> {
    let arrival = parse_timestamp(arrival_time).map_err(prediction_error)?;
    let requested_at = match requested_at {
        Some(value) => parse_timestamp(value).map_err(prediction_error)?,
        None => Utc::now().with_timezone(arrival.offset()),
    };
    Ok((arrival, requested_at))
}

/// Recommend a departure time for a trip
#[utoipa::path(
    post,
    path = "/api/predictions",
    request_body = PredictionRequestBody,
    responses(
        (status = 200, description = "Recommended departure with a reminder plan", body = PredictionResponse),
        (status = 400, description = "Malformed input or arrival time not in the future", body = ErrorResponse),
        (status = 404, description = "Destination could not be geocoded", body = ErrorResponse),
        (status = 422, description = "No route provider returned a route", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "predictions"
)]
pub async fn create_prediction(
    State(state): State<AppState>,
    Json(body): Json<PredictionRequestBody>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let (arrival_time, requested_at) =
        parse_times(&body.arrival_time, body.requested_at.as_deref())?;

    let request = PredictionRequest {
        origin: body.origin,
        destination: body.destination,
        arrival_time,
        requested_at,
    };

    let prediction = state
        .engine
        .predict(&request)
        .await
        .map_err(prediction_error)?;
    let reminder = ReminderPlan::from_prediction(&prediction, &request.destination, requested_at);

    info!(
        destination = %request.destination,
        departure = %prediction.departure_time.to_rfc3339(),
        confidence = prediction.confidence,
        "Served prediction"
    );

    Ok(Json(PredictionResponse {
        prediction,
        reminder,
    }))
}

/// Estimate a departure time from the trip log alone
#[utoipa::path(
    post,
    path = "/api/predictions/offline",
    request_body = OfflineRequestBody,
    responses(
        (status = 200, description = "Offline departure estimate", body = OfflineEstimate),
        (status = 400, description = "Malformed input or arrival time not in the future", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "predictions"
)]
pub async fn create_offline_estimate(
    State(state): State<AppState>,
    Json(body): Json<OfflineRequestBody>,
) -> Result<Json<OfflineEstimate>, ApiError> {
    let (arrival_time, requested_at) =
        parse_times(&body.arrival_time, body.requested_at.as_deref())?;

    let estimate = state
        .engine
        .offline_estimate(&body.destination, arrival_time, requested_at)
        .await
        .map_err(prediction_error)?;

    Ok(Json(estimate))
}
