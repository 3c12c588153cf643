/// Distance-based travel time model used when no route provider is consulted.
///
/// Deterministic in its inputs: 2 minutes per kilometre, scaled by a
/// time-of-day factor and a weekend discount.
use crate::services::features::TimeFeatures;

const MINUTES_PER_KM: f64 = 2.0;
const WEEKEND_FACTOR: f64 = 0.8;
const MIN_PREDICTION_MINUTES: f64 = 1.0;
/// A logged trip this much slower than expected counts as delayed
const DELAY_THRESHOLD_MINUTES: f64 = 5.0;

/// Multiplier for the hour of day: morning and evening rush are slower,
/// midday is slightly faster
pub fn rush_hour_multiplier(hour_of_day: u8) -> f64 {
    match hour_of_day {
        7..=9 | 17..=19 => 1.5,
        10..=16 => 0.9,
        _ => 1.0,
    }
}

/// Unadjusted expectation for a distance, 30 km/h flat
pub fn expected_minutes(distance_meters: f64) -> f64 {
    distance_meters.max(0.0) / 1000.0 * MINUTES_PER_KM
}

/// Strictly more than the threshold over the expectation
pub fn was_delayed(actual_minutes: f64, expected_minutes: f64) -> bool {
    actual_minutes > expected_minutes + DELAY_THRESHOLD_MINUTES
}

pub fn predict_minutes(features: &TimeFeatures, distance_meters: f64) -> f64 {
    let base = expected_minutes(distance_meters);
    let weekend = if features.is_weekend { WEEKEND_FACTOR } else { 1.0 };
    let predicted = base * rush_hour_multiplier(features.hour_of_day) * weekend;
    predicted.max(MIN_PREDICTION_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(hour_of_day: u8, is_weekend: bool) -> TimeFeatures {
        TimeFeatures {
            day_of_week: if is_weekend { 6 } else { 2 },
            hour_of_day,
            is_weekend,
        }
    }

    #[test]
    fn multiplier_bands() {
        assert_eq!(rush_hour_multiplier(6), 1.0);
        assert_eq!(rush_hour_multiplier(7), 1.5);
        assert_eq!(rush_hour_multiplier(9), 1.5);
        assert_eq!(rush_hour_multiplier(10), 0.9);
        assert_eq!(rush_hour_multiplier(16), 0.9);
        assert_eq!(rush_hour_multiplier(18), 1.5);
        assert_eq!(rush_hour_multiplier(22), 1.0);
    }

    #[test]
    fn rush_hour_weekday() {
        // 5 km at 08h on a weekday: 10 min * 1.5
        let minutes = predict_minutes(&features(8, false), 5000.0);
        assert!((minutes - 15.0).abs() < 1e-9);
    }

    #[test]
    fn weekend_discount_applies() {
        let minutes = predict_minutes(&features(12, true), 5000.0);
        assert!((minutes - 10.0 * 0.9 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn short_trips_floor_at_one_minute() {
        assert_eq!(predict_minutes(&features(3, false), 50.0), 1.0);
        assert_eq!(predict_minutes(&features(3, false), 0.0), 1.0);
    }

    #[test]
    fn same_inputs_same_output() {
        let f = features(18, false);
        assert_eq!(predict_minutes(&f, 7321.0), predict_minutes(&f, 7321.0));
    }

    #[test]
    fn expected_time_is_thirty_kmh() {
        assert!((expected_minutes(15_000.0) - 30.0).abs() < 1e-9);
        assert_eq!(expected_minutes(0.0), 0.0);
        assert_eq!(expected_minutes(-10.0), 0.0);
    }

    #[test]
    fn delay_threshold_is_exclusive() {
        assert!(!was_delayed(15.0, 10.0));
        assert!(was_delayed(15.01, 10.0));
        assert!(!was_delayed(3.0, 10.0));
    }
}
