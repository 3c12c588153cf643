/// MBTA V3 API: nearby stops and real-time departure predictions.
///
/// Stops are context for a prediction, never a route candidate. The stops
/// endpoint filters by a radius in degrees; we convert from miles and then
/// filter again by great-circle distance, since a degree of longitude is
/// shorter than a degree of latitude at Boston's latitude.
///
/// An API key is optional; without one the API applies a lower rate limit.
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::models::{Coordinates, NearbyStop, ProviderId};
use crate::providers::{parse_body, HttpClient, ProviderError, StopsProvider};
use crate::services::features::haversine_miles;

const MAX_NEARBY_STOPS: usize = 8;
const MILES_PER_DEGREE_LATITUDE: f64 = 69.0;

/// An upcoming departure from a stop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StopDeparture {
    pub stop_id: String,
    pub departure_time: DateTime<FixedOffset>,
    pub direction_id: Option<u8>,
    pub route_id: Option<String>,
    pub route_name: Option<String>,
    /// 0 = light rail, 1 = subway, 2 = commuter rail, 3 = bus, 4 = ferry
    pub route_type: Option<u8>,
    pub headsign: Option<String>,
    pub minutes_until_departure: i64,
}

#[derive(Debug, Clone)]
pub struct MbtaClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
}

impl MbtaClient {
    pub fn new(http: HttpClient, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn with_key(&self, mut params: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    /// Next departures from a stop, soonest first
    pub async fn next_departures(
        &self,
        stop_id: &str,
        limit: usize,
        now: DateTime<FixedOffset>,
    ) -> Result<Vec<StopDeparture>, ProviderError> {
        let url = format!("{}/predictions", self.base_url);
        let params = self.with_key(vec![
            ("filter[stop]", stop_id.to_string()),
            ("sort", "departure_time".to_string()),
            ("include", "trip,route".to_string()),
        ]);

        let body = self
            .http
            .execute_with_retry(|client| client.get(&url).query(&params))
            .await?;

        let departures = parse_predictions_response(stop_id, &body, limit, now)?;
        info!(stop_id = %stop_id, count = departures.len(), "Retrieved MBTA departures");
        Ok(departures)
    }
}

#[async_trait]
impl StopsProvider for MbtaClient {
    fn id(&self) -> ProviderId {
        ProviderId::Mbta
    }

    async fn nearby_stops(
        &self,
        origin: Coordinates,
        radius_miles: f64,
    ) -> Result<Vec<NearbyStop>, ProviderError> {
        let url = format!("{}/stops", self.base_url);
        let params = self.with_key(vec![
            ("filter[latitude]", origin.latitude.to_string()),
            ("filter[longitude]", origin.longitude.to_string()),
            (
                "filter[radius]",
                (radius_miles / MILES_PER_DEGREE_LATITUDE).to_string(),
            ),
            ("sort", "distance".to_string()),
        ]);

        let body = self
            .http
            .execute_with_retry(|client| client.get(&url).query(&params))
            .await?;

        let stops = parse_stops_response(origin, radius_miles, &body)?;
        info!(count = stops.len(), "Found nearby MBTA stops");
        Ok(stops)
    }
}

#[derive(Debug, Deserialize)]
struct StopAttributes {
    name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    wheelchair_boarding: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct StopResource {
    id: String,
    attributes: StopAttributes,
}

#[derive(Debug, Deserialize)]
struct StopsResponse {
    #[serde(default)]
    data: Vec<StopResource>,
}

#[derive(Debug, Deserialize)]
struct ResourceRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    data: Option<ResourceRef>,
}

#[derive(Debug, Default, Deserialize)]
struct PredictionRelationships {
    route: Option<Relationship>,
    trip: Option<Relationship>,
}

#[derive(Debug, Deserialize)]
struct PredictionAttributes {
    departure_time: Option<String>,
    direction_id: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct PredictionResource {
    attributes: PredictionAttributes,
    #[serde(default)]
    relationships: PredictionRelationships,
}

#[derive(Debug, Deserialize)]
struct IncludedAttributes {
    short_name: Option<String>,
    long_name: Option<String>,
    headsign: Option<String>,
    #[serde(rename = "type")]
    route_type: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct IncludedResource {
    #[serde(rename = "type")]
    resource_type: String,
    id: String,
    attributes: IncludedAttributes,
}

#[derive(Debug, Deserialize)]
struct PredictionsResponse {
    #[serde(default)]
    data: Vec<PredictionResource>,
    #[serde(default)]
    included: Vec<IncludedResource>,
}

fn parse_stops_response(
    origin: Coordinates,
    radius_miles: f64,
    body: &str,
) -> Result<Vec<NearbyStop>, ProviderError> {
    let response: StopsResponse = parse_body(ProviderId::Mbta, body)?;

    let mut stops: Vec<NearbyStop> = response
        .data
        .into_iter()
        .filter_map(|stop| {
            let coordinates = Coordinates::new(stop.attributes.latitude?, stop.attributes.longitude?);
            Some(NearbyStop {
                distance_miles: haversine_miles(origin, coordinates),
                name: stop.attributes.name.unwrap_or_else(|| stop.id.clone()),
                id: stop.id,
                coordinates,
                wheelchair_accessible: stop.attributes.wheelchair_boarding == Some(1),
            })
        })
        .filter(|stop| stop.distance_miles <= radius_miles)
        .collect();

    stops.sort_by(|a, b| a.distance_miles.total_cmp(&b.distance_miles));
    stops.truncate(MAX_NEARBY_STOPS);
    Ok(stops)
}

fn parse_predictions_response(
    stop_id: &str,
    body: &str,
    limit: usize,
    now: DateTime<FixedOffset>,
) -> Result<Vec<StopDeparture>, ProviderError> {
    let response: PredictionsResponse = parse_body(ProviderId::Mbta, body)?;

    let find_included = |resource_type: &str, relationship: &Option<Relationship>| {
        let id = relationship.as_ref()?.data.as_ref()?.id.as_str();
        response
            .included
            .iter()
            .find(|item| item.resource_type == resource_type && item.id == id)
    };

    let mut departures: Vec<StopDeparture> = response
        .data
        .iter()
        .filter_map(|prediction| {
            let departure_time =
                DateTime::parse_from_rfc3339(prediction.attributes.departure_time.as_deref()?)
                    .ok()?;
            let route = find_included("route", &prediction.relationships.route);
            let trip = find_included("trip", &prediction.relationships.trip);
            let seconds_until = (departure_time - now).num_seconds() as f64;

            Some(StopDeparture {
                stop_id: stop_id.to_string(),
                departure_time,
                direction_id: prediction.attributes.direction_id,
                route_id: prediction
                    .relationships
                    .route
                    .as_ref()
                    .and_then(|r| r.data.as_ref())
                    .map(|r| r.id.clone()),
                route_name: route.and_then(|r| {
                    r.attributes
                        .short_name
                        .clone()
                        .filter(|name| !name.is_empty())
                        .or_else(|| r.attributes.long_name.clone())
                }),
                route_type: route.and_then(|r| r.attributes.route_type),
                headsign: trip.and_then(|t| t.attributes.headsign.clone()),
                minutes_until_departure: ((seconds_until / 60.0).round() as i64).max(0),
            })
        })
        .collect();

    departures.sort_by_key(|departure| departure.departure_time);
    departures.truncate(limit);
    Ok(departures)
}
