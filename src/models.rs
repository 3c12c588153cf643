use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::services::baseline;
use crate::services::features::{self, TimeFeatures};

/// WGS84 coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// "lat,lng" as used by the Google query strings
    pub fn to_lat_lng_string(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

/// Transport mode of a route candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    Transit,
    Walking,
    Cycling,
    Driving,
}

impl RouteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMode::Transit => "transit",
            RouteMode::Walking => "walking",
            RouteMode::Cycling => "cycling",
            RouteMode::Driving => "driving",
        }
    }
}

impl std::fmt::Display for RouteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External data source identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    GoogleTransit,
    GoogleDirections,
    OpenRouteService,
    Mbta,
    GoogleGeocoding,
    OrsGeocoding,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::GoogleTransit => "google_transit",
            ProviderId::GoogleDirections => "google_directions",
            ProviderId::OpenRouteService => "openrouteservice",
            ProviderId::Mbta => "mbta",
            ProviderId::GoogleGeocoding => "google_geocoding",
            ProviderId::OrsGeocoding => "ors_geocoding",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time constraint passed to route providers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeAnchor {
    DepartAt(DateTime<FixedOffset>),
    ArriveBy(DateTime<FixedOffset>),
}

/// One origin/destination lookup as handed to every route provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripQuery {
    pub origin: Coordinates,
    pub destination: Coordinates,
    pub anchor: TimeAnchor,
}

/// A single public transport leg of a transit route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransitLeg {
    pub vehicle: String,
    pub line_name: String,
    pub departure_stop: String,
    pub arrival_stop: String,
    pub headsign: Option<String>,
    pub num_stops: Option<u32>,
}

/// Provider-specific detail attached to an estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteDetail {
    Transit {
        legs: Vec<TransitLeg>,
        walking_minutes: f64,
    },
    Street {
        distance_meters: f64,
        in_traffic: bool,
    },
    None,
}

/// Normalized travel-time estimate produced by a provider adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RouteEstimate {
    #[serde(rename = "type")]
    pub mode: RouteMode,
    pub source: ProviderId,
    pub duration_minutes: f64,
    pub description: String,
    pub confidence: f64,
    /// Rank assigned by the reconciler, lower is better. Zero until ranked.
    pub priority: u8,
    pub detail: RouteDetail,
}

/// A geocoded destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Place {
    pub coordinates: Coordinates,
    pub label: String,
    pub confidence: Option<f64>,
    pub source: ProviderId,
}

/// Transit stop near the origin, returned as context only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NearbyStop {
    pub id: String,
    pub name: String,
    pub coordinates: Coordinates,
    pub distance_miles: f64,
    pub wheelchair_accessible: bool,
}

/// A completed trip from the personal log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TripRecord {
    pub destination: String,
    pub leave_time: DateTime<FixedOffset>,
    pub arrival_time: DateTime<FixedOffset>,
    pub distance_meters: f64,
    /// 0 = Sunday
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub is_weekend: bool,
    pub travel_time_minutes: f64,
    /// Flat 30 km/h expectation for the distance
    pub expected_time_minutes: f64,
    /// More than 5 minutes slower than expected
    pub was_delayed: bool,
    pub start_coord: Coordinates,
    pub end_coord: Coordinates,
}

impl TripRecord {
    /// Build a record from the raw values captured when a trip ends
    pub fn from_log(
        destination: &str,
        leave_time: DateTime<FixedOffset>,
        arrival_time: DateTime<FixedOffset>,
        start_coord: Coordinates,
        end_coord: Coordinates,
    ) -> Self {
        let TimeFeatures {
            day_of_week,
            hour_of_day,
            is_weekend,
        } = features::time_features(&leave_time);
        let travel_time_minutes =
            (arrival_time - leave_time).num_milliseconds() as f64 / 60_000.0;
        let distance_meters = features::haversine_meters(start_coord, end_coord);
        let expected_time_minutes = baseline::expected_minutes(distance_meters);

        Self {
            destination: destination.trim().to_string(),
            leave_time,
            arrival_time,
            distance_meters,
            day_of_week,
            hour_of_day,
            is_weekend,
            travel_time_minutes,
            expected_time_minutes,
            was_delayed: baseline::was_delayed(travel_time_minutes, expected_time_minutes),
            start_coord,
            end_coord,
        }
    }
}

/// One logged trip flattened into model features, destination hashed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrainingExample {
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub is_weekend: bool,
    pub distance: f64,
    pub start_lat: f64,
    pub start_lng: f64,
    pub destination_encoded: u32,
    pub travel_time_minutes: f64,
    pub was_delayed: bool,
}

impl From<&TripRecord> for TrainingExample {
    fn from(trip: &TripRecord) -> Self {
        Self {
            day_of_week: trip.day_of_week,
            hour_of_day: trip.hour_of_day,
            is_weekend: trip.is_weekend,
            distance: trip.distance_meters,
            start_lat: trip.start_coord.latitude,
            start_lng: trip.start_coord.longitude,
            destination_encoded: features::destination_code(&trip.destination),
            travel_time_minutes: trip.travel_time_minutes,
            was_delayed: trip.was_delayed,
        }
    }
}

/// Which inputs contributed to a prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DataQuality {
    /// Providers that returned usable data, even if their estimate lost
    /// the per-mode pick. Stable order.
    pub sources_used: Vec<ProviderId>,
    pub historical_sample_size: usize,
    pub personalized: bool,
}

/// Recommended departure for one planned trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PredictionResult {
    pub departure_time: DateTime<FixedOffset>,
    pub arrival_time: DateTime<FixedOffset>,
    pub predicted_travel_time: f64,
    pub buffer_minutes: u32,
    pub confidence: f64,
    pub total_time_needed: f64,
    pub primary_route: RouteEstimate,
    pub alternatives: Vec<RouteEstimate>,
    pub data_quality: DataQuality,
    pub destination: Place,
    pub nearby_stops: Vec<NearbyStop>,
}

/// Departure estimate computed without any route provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OfflineEstimate {
    pub departure_time: DateTime<FixedOffset>,
    pub predicted_travel_time: f64,
    pub buffer_minutes: u32,
    pub confidence: f64,
    pub total_time_needed: f64,
    pub assumed_distance_meters: f64,
    pub historical_sample_size: usize,
}
