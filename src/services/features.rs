/// Calendar and distance features derived from raw trip data.
///
/// Calendar fields are read in the timestamp's own offset, so a trip logged
/// at 23:30 local time counts as 23h even when UTC has rolled over.
use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike};

use crate::models::Coordinates;
use crate::services::PredictionError;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
pub const EARTH_RADIUS_MILES: f64 = 3_959.0;
pub const METERS_PER_MILE: f64 = 1_609.344;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFeatures {
    /// 0 = Sunday
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub is_weekend: bool,
}

pub fn time_features<Tz: TimeZone>(timestamp: &DateTime<Tz>) -> TimeFeatures {
    let day_of_week = timestamp.weekday().num_days_from_sunday() as u8;
    TimeFeatures {
        day_of_week,
        hour_of_day: timestamp.hour() as u8,
        is_weekend: day_of_week == 0 || day_of_week == 6,
    }
}

/// Parse an RFC 3339 / ISO 8601 timestamp that carries an offset
pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, PredictionError> {
    DateTime::parse_from_rfc3339(value.trim()).map_err(|e| {
        PredictionError::InvalidInput(format!("malformed timestamp '{}': {}", value, e))
    })
}

pub fn extract_time_features(value: &str) -> Result<TimeFeatures, PredictionError> {
    parse_timestamp(value).map(|timestamp| time_features(&timestamp))
}

/// Central angle between two points, in radians
fn central_angle(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);

    2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Great-circle distance in meters
pub fn haversine_meters(a: Coordinates, b: Coordinates) -> f64 {
    EARTH_RADIUS_METERS * central_angle(a, b)
}

/// Great-circle distance in miles
pub fn haversine_miles(a: Coordinates, b: Coordinates) -> f64 {
    EARTH_RADIUS_MILES * central_angle(a, b)
}

/// Stable numeric id for a destination string, for exported datasets.
/// 31-based hash over UTF-16 units with 32-bit wraparound, absolute value.
pub fn destination_code(destination: &str) -> u32 {
    destination
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_mul(31).wrapping_add(i32::from(unit))
        })
        .unsigned_abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOSTON: Coordinates = Coordinates {
        latitude: 42.3601,
        longitude: -71.0589,
    };
    const NEW_YORK: Coordinates = Coordinates {
        latitude: 40.7128,
        longitude: -74.0060,
    };

    #[test]
    fn weekday_features() {
        // 2024-06-03 is a Monday
        let features = extract_time_features("2024-06-03T08:15:00-04:00").unwrap();
        assert_eq!(
            features,
            TimeFeatures {
                day_of_week: 1,
                hour_of_day: 8,
                is_weekend: false
            }
        );
    }

    #[test]
    fn weekend_features_use_local_fields() {
        // Sunday 01:00 UTC is still Saturday evening in Boston
        let features = extract_time_features("2024-06-01T21:00:00-04:00").unwrap();
        assert_eq!(features.day_of_week, 6);
        assert_eq!(features.hour_of_day, 21);
        assert!(features.is_weekend);

        let sunday = extract_time_features("2024-06-02T10:00:00Z").unwrap();
        assert_eq!(sunday.day_of_week, 0);
        assert!(sunday.is_weekend);
    }

    #[test]
    fn malformed_timestamp_is_invalid_input() {
        for bad in ["", "yesterday", "2024-13-01T00:00:00Z", "2024-06-01 10:00"] {
            let err = extract_time_features(bad).unwrap_err();
            assert!(matches!(err, PredictionError::InvalidInput(_)), "{bad}");
        }
    }

    #[test]
    fn haversine_is_symmetric() {
        let there = haversine_meters(BOSTON, NEW_YORK);
        let back = haversine_meters(NEW_YORK, BOSTON);
        assert!((there - back).abs() < 1e-6);
        // Roughly 306 km
        assert!(there > 300_000.0 && there < 312_000.0);
    }

    #[test]
    fn haversine_of_same_point_is_zero() {
        assert_eq!(haversine_meters(BOSTON, BOSTON), 0.0);
        assert_eq!(haversine_miles(NEW_YORK, NEW_YORK), 0.0);
    }

    #[test]
    fn meters_and_miles_agree() {
        let meters = haversine_meters(BOSTON, NEW_YORK);
        let miles = haversine_miles(BOSTON, NEW_YORK);
        let relative = (meters / METERS_PER_MILE - miles).abs() / miles;
        assert!(relative < 1e-4, "relative difference {relative}");
    }

    #[test]
    fn destination_code_is_stable() {
        assert_eq!(destination_code(""), 0);
        assert_eq!(destination_code("a"), 97);
        assert_eq!(destination_code("ab"), 97 * 31 + 98);
        assert_eq!(destination_code("hello"), 99_162_322);
        assert_eq!(destination_code("Harvard Square"), 1_336_390_791);
        // Wraps negative before the abs
        assert_eq!(destination_code("harvard square"), 1_040_450_489);
    }
}
