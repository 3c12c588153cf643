use chrono::{DateTime, FixedOffset, TimeDelta};

use crate::models::{RouteEstimate, RouteMode};
use crate::services::PredictionError;

/// Transit confidence above which the shorter transit buffer applies
const CONFIDENT_TRANSIT: f64 = 0.8;
/// Offline estimates above this confidence get the short buffer
const CONFIDENT_OFFLINE: f64 = 0.7;

/// Safety margin for a route, in minutes
pub fn buffer_minutes(mode: RouteMode, confidence: f64) -> u32 {
    match mode {
        // A missed connection costs a full headway
        RouteMode::Transit if confidence > CONFIDENT_TRANSIT => 8,
        RouteMode::Transit => 12,
        RouteMode::Walking => 3,
        RouteMode::Cycling => 5,
        RouteMode::Driving => 10,
    }
}

/// Margin for an estimate that has no route mode
pub fn offline_buffer_minutes(confidence: f64) -> u32 {
    if confidence > CONFIDENT_OFFLINE {
        5
    } else {
        10
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeparturePlan {
    pub departure_time: DateTime<FixedOffset>,
    pub predicted_travel_time: f64,
    pub buffer_minutes: u32,
    pub total_time_needed: f64,
}

/// Subtract travel time plus buffer from the arrival time. The result may
/// lie in the past; deciding to leave immediately is up to the caller.
///
/// A travel time that cannot be represented as a date offset is
/// `InvalidInput`.
pub fn plan_departure(
    arrival_time: DateTime<FixedOffset>,
    predicted_travel_time: f64,
    buffer_minutes: u32,
) -> Result<DeparturePlan, PredictionError> {
    let total_time_needed = predicted_travel_time + f64::from(buffer_minutes);
    let out_of_range = || {
        PredictionError::InvalidInput(format!(
            "travel time of {} minutes is out of range",
            total_time_needed
        ))
    };
    if !total_time_needed.is_finite() {
        return Err(out_of_range());
    }

    // `as` saturates; a saturated lead fails the checked subtraction
    let lead_ms = (total_time_needed * 60_000.0).round() as i64;
    let departure_time = TimeDelta::try_milliseconds(lead_ms)
        .and_then(|lead| arrival_time.checked_sub_signed(lead))
        .ok_or_else(out_of_range)?;

    Ok(DeparturePlan {
        departure_time,
        predicted_travel_time,
        buffer_minutes,
        total_time_needed,
    })
}

/// Plan a departure for an already blended primary route
pub fn plan_for_route(
    arrival_time: DateTime<FixedOffset>,
    route: &RouteEstimate,
) -> Result<DeparturePlan, PredictionError> {
    plan_departure(
        arrival_time,
        route.duration_minutes,
        buffer_minutes(route.mode, route.confidence),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProviderId, RouteDetail};

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn buffer_table() {
        assert_eq!(buffer_minutes(RouteMode::Transit, 0.85), 8);
        assert_eq!(buffer_minutes(RouteMode::Transit, 0.8), 12);
        assert_eq!(buffer_minutes(RouteMode::Transit, 0.5), 12);
        assert_eq!(buffer_minutes(RouteMode::Walking, 0.1), 3);
        assert_eq!(buffer_minutes(RouteMode::Walking, 0.95), 3);
        assert_eq!(buffer_minutes(RouteMode::Cycling, 0.75), 5);
        assert_eq!(buffer_minutes(RouteMode::Driving, 0.9), 10);
    }

    #[test]
    fn offline_buffer() {
        assert_eq!(offline_buffer_minutes(0.8), 5);
        assert_eq!(offline_buffer_minutes(0.7), 10);
        assert_eq!(offline_buffer_minutes(0.3), 10);
    }

    #[test]
    fn departure_is_arrival_minus_total() {
        let arrival = at("2024-06-03T09:00:00-04:00");
        let plan = plan_departure(arrival, 23.5, 8).unwrap();

        assert_eq!(plan.total_time_needed, 31.5);
        assert_eq!(plan.departure_time, at("2024-06-03T08:28:30-04:00"));
        assert_eq!(plan.departure_time.offset(), arrival.offset());
    }

    #[test]
    fn route_plan_uses_mode_buffer() {
        let route = RouteEstimate {
            mode: RouteMode::Walking,
            source: ProviderId::GoogleDirections,
            duration_minutes: 12.0,
            description: "12min walk".into(),
            confidence: 0.8,
            priority: 1,
            detail: RouteDetail::None,
        };
        let plan = plan_for_route(at("2024-06-03T09:00:00Z"), &route).unwrap();
        assert_eq!(plan.buffer_minutes, 3);
        assert_eq!(plan.departure_time, at("2024-06-03T08:45:00Z"));
    }

    #[test]
    fn departure_may_be_in_the_past() {
        let arrival = at("2024-06-03T00:05:00Z");
        let plan = plan_departure(arrival, 30.0, 10).unwrap();
        assert_eq!(plan.departure_time, at("2024-06-02T23:25:00Z"));
    }

    #[test]
    fn unrepresentable_travel_time_is_invalid_input() {
        let arrival = at("2024-06-03T09:00:00-04:00");
        for minutes in [1.0e13, f64::MAX, f64::INFINITY, f64::NAN] {
            assert!(matches!(
                plan_departure(arrival, minutes, 10),
                Err(PredictionError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn departure_before_earliest_date_is_invalid_input() {
        // Fits in a TimeDelta but lands before chrono's minimum date
        let arrival = DateTime::<chrono::Utc>::MIN_UTC.fixed_offset() + TimeDelta::minutes(10);
        assert!(matches!(
            plan_departure(arrival, 20.0, 0),
            Err(PredictionError::InvalidInput(_))
        ));
    }
}
