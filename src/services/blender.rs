//! Personal history blending.
//!
//! Past trips to the same destination are averaged with weights favouring
//! recent trips, trips at a similar hour and trips on the same weekday. The
//! average is mixed into the live route estimate only when enough trips
//! exist for it to mean something.
use chrono::{DateTime, FixedOffset};

use crate::models::{RouteEstimate, TripRecord};
use crate::services::features::TimeFeatures;

/// Decay scale of the recency weight, in days
const RECENCY_SCALE_DAYS: f64 = 30.0;
const SIMILAR_HOUR_WINDOW: u8 = 2;
const SIMILAR_HOUR_WEIGHT: f64 = 1.5;
const SAME_WEEKDAY_WEIGHT: f64 = 1.3;
const CONFIDENCE_BOOST: f64 = 0.1;
const MAX_BLENDED_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendPolicy {
    /// Share of the historical mean in the blend, in [0, 1]
    pub historical_weight: f64,
    pub min_trips: usize,
}

impl Default for BlendPolicy {
    fn default() -> Self {
        Self {
            historical_weight: 0.4,
            min_trips: 3,
        }
    }
}

impl BlendPolicy {
    pub fn blend(&self, historical_minutes: f64, route_minutes: f64) -> f64 {
        self.historical_weight * historical_minutes
            + (1.0 - self.historical_weight) * route_minutes
    }
}

/// Weight of one past trip relative to the requested trip
pub fn trip_weight(trip: &TripRecord, requested: &TimeFeatures, now: DateTime<FixedOffset>) -> f64 {
    let days_since = (now - trip.leave_time).num_seconds().max(0) as f64 / 86_400.0;
    let recency = (-days_since / RECENCY_SCALE_DAYS).exp();

    let time_weight = if trip.hour_of_day.abs_diff(requested.hour_of_day) <= SIMILAR_HOUR_WINDOW {
        SIMILAR_HOUR_WEIGHT
    } else {
        1.0
    };
    let day_weight = if trip.day_of_week == requested.day_of_week {
        SAME_WEEKDAY_WEIGHT
    } else {
        1.0
    };

    recency * time_weight * day_weight
}

/// Weighted mean travel time of past trips, `None` without usable weight
pub fn weighted_historical_mean(
    trips: &[TripRecord],
    requested: &TimeFeatures,
    now: DateTime<FixedOffset>,
) -> Option<f64> {
    let (weighted_sum, total_weight) = trips
        .iter()
        .filter(|trip| trip.travel_time_minutes.is_finite())
        .map(|trip| (trip.travel_time_minutes, trip_weight(trip, requested, now)))
        .fold((0.0, 0.0), |(sum, total), (minutes, weight)| {
            (sum + minutes * weight, total + weight)
        });

    if total_weight > 0.0 && total_weight.is_finite() {
        Some(weighted_sum / total_weight)
    } else {
        None
    }
}

/// Result of blending the primary route with history
#[derive(Debug, Clone, PartialEq)]
pub struct BlendOutcome {
    pub route: RouteEstimate,
    pub historical_mean: Option<f64>,
    pub personalized: bool,
}

/// Blend `route` with the trip history. With fewer than `min_trips` records
/// the route is returned untouched.
pub fn blend_route(
    route: RouteEstimate,
    trips: &[TripRecord],
    requested: &TimeFeatures,
    now: DateTime<FixedOffset>,
    policy: &BlendPolicy,
) -> BlendOutcome {
    if trips.len() < policy.min_trips {
        return BlendOutcome {
            route,
            historical_mean: None,
            personalized: false,
        };
    }

    let Some(historical_mean) = weighted_historical_mean(trips, requested, now) else {
        return BlendOutcome {
            route,
            historical_mean: None,
            personalized: false,
        };
    };

    let mut route = route;
    route.duration_minutes = policy.blend(historical_mean, route.duration_minutes);
    route.confidence = route
        .confidence
        .max((route.confidence + CONFIDENCE_BOOST).min(MAX_BLENDED_CONFIDENCE));
    route.description.push_str(" (personalized)");

    BlendOutcome {
        route,
        historical_mean: Some(historical_mean),
        personalized: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coordinates, ProviderId, RouteDetail, RouteMode};
    use chrono::Duration;

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn trip(leave: &str, minutes: f64) -> TripRecord {
        let leave_time = at(leave);
        let arrival_time = leave_time + Duration::seconds((minutes * 60.0) as i64);
        TripRecord::from_log(
            "Office",
            leave_time,
            arrival_time,
            Coordinates::new(42.3555, -71.0605),
            Coordinates::new(42.3736, -71.1190),
        )
    }

    fn route(minutes: f64, confidence: f64) -> RouteEstimate {
        RouteEstimate {
            mode: RouteMode::Transit,
            source: ProviderId::GoogleTransit,
            duration_minutes: minutes,
            description: format!("{minutes}min via Red"),
            confidence,
            priority: 1,
            detail: RouteDetail::None,
        }
    }

    fn monday_morning() -> TimeFeatures {
        TimeFeatures {
            day_of_week: 1,
            hour_of_day: 8,
            is_weekend: false,
        }
    }

    #[test]
    fn weights_combine_recency_hour_and_weekday() {
        let now = at("2024-06-10T08:00:00-04:00");
        let requested = monday_morning();

        // Same time one week earlier: Monday, 8h
        let similar = trip("2024-06-03T08:00:00-04:00", 20.0);
        let expected = (-7.0f64 / 30.0).exp() * 1.5 * 1.3;
        assert!((trip_weight(&similar, &requested, now) - expected).abs() < 1e-12);

        // Tuesday 14h of the previous week
        let different = trip("2024-06-04T14:00:00-04:00", 20.0);
        let days = 5.0 + 18.0 / 24.0;
        let expected = (-days / 30.0f64).exp();
        assert!((trip_weight(&different, &requested, now) - expected).abs() < 1e-12);
    }

    #[test]
    fn hour_window_is_inclusive() {
        let now = at("2024-06-10T08:00:00-04:00");
        let requested = monday_morning();
        let edge = trip("2024-06-10T06:00:00-04:00", 20.0);
        let outside = trip("2024-06-10T05:00:00-04:00", 20.0);
        assert!(trip_weight(&edge, &requested, now) > 1.5 * 1.3 * 0.99);
        assert!(trip_weight(&outside, &requested, now) < 1.3);
    }

    #[test]
    fn weighted_mean_stays_within_sample_range() {
        let now = at("2024-06-10T08:00:00-04:00");
        let trips = vec![
            trip("2024-06-03T08:00:00-04:00", 20.0),
            trip("2024-05-20T17:30:00-04:00", 22.0),
            trip("2024-04-02T08:10:00-04:00", 18.0),
        ];
        let mean = weighted_historical_mean(&trips, &monday_morning(), now).unwrap();
        assert!(mean > 18.0 && mean < 22.0, "mean {mean}");
    }

    #[test]
    fn blends_when_enough_history() {
        let now = at("2024-06-10T08:00:00-04:00");
        let trips = vec![
            trip("2024-06-03T08:00:00-04:00", 20.0),
            trip("2024-06-04T08:30:00-04:00", 22.0),
            trip("2024-06-05T07:45:00-04:00", 18.0),
        ];
        let outcome = blend_route(
            route(25.0, 0.85),
            &trips,
            &monday_morning(),
            now,
            &BlendPolicy::default(),
        );

        let mean = outcome.historical_mean.unwrap();
        assert!(outcome.personalized);
        assert!(outcome.route.duration_minutes > mean);
        assert!(outcome.route.duration_minutes < 25.0);
        assert!((outcome.route.duration_minutes - (0.4 * mean + 0.6 * 25.0)).abs() < 1e-9);
        assert!((outcome.route.confidence - 0.95).abs() < 1e-12);
        assert!(outcome.route.description.ends_with("(personalized)"));
    }

    #[test]
    fn confidence_boost_is_capped_but_never_lowers() {
        let now = at("2024-06-10T08:00:00-04:00");
        let trips = vec![
            trip("2024-06-03T08:00:00-04:00", 20.0),
            trip("2024-06-04T08:00:00-04:00", 20.0),
            trip("2024-06-05T08:00:00-04:00", 20.0),
        ];
        let policy = BlendPolicy::default();

        let low = blend_route(route(25.0, 0.5), &trips, &monday_morning(), now, &policy);
        assert!((low.route.confidence - 0.6).abs() < 1e-12);

        let high = blend_route(route(25.0, 0.97), &trips, &monday_morning(), now, &policy);
        assert_eq!(high.route.confidence, 0.97);
    }

    #[test]
    fn too_little_history_leaves_route_untouched() {
        let now = at("2024-06-10T08:00:00-04:00");
        let trips = vec![
            trip("2024-06-03T08:00:00-04:00", 20.0),
            trip("2024-06-04T08:00:00-04:00", 22.0),
        ];
        let original = route(25.0, 0.85);
        let outcome = blend_route(
            original.clone(),
            &trips,
            &monday_morning(),
            now,
            &BlendPolicy::default(),
        );
        assert!(!outcome.personalized);
        assert_eq!(outcome.route, original);
        assert_eq!(outcome.historical_mean, None);
    }

    #[test]
    fn configurable_weight() {
        let policy = BlendPolicy {
            historical_weight: 0.7,
            min_trips: 3,
        };
        assert!((policy.blend(20.0, 30.0) - 23.0).abs() < 1e-12);
    }
}
