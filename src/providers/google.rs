/// Google Maps Platform adapters.
///
/// Three capabilities share one client:
/// - geocoding (`/geocode/json`), the primary geocoder
/// - transit directions (`/directions/json?mode=transit`)
/// - walking and driving directions (`/directions/json?mode=walking|driving`)
///
/// Google reports application-level failures in the body `status` field
/// ("ZERO_RESULTS", "REQUEST_DENIED", "OVER_QUERY_LIMIT", ...) while still
/// answering HTTP 200, so every parser checks it before reading results.
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::models::{
    Coordinates, Place, ProviderId, RouteDetail, RouteEstimate, RouteMode, TimeAnchor,
    TransitLeg, TripQuery,
};
use crate::providers::{parse_body, Geocoder, HttpClient, ProviderError, RouteProvider};
use crate::services::reconciler::source_prior;

const MAX_GEOCODE_RESULTS: usize = 3;

#[derive(Debug, Clone)]
pub struct GoogleMapsClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl GoogleMapsClient {
    pub fn new(http: HttpClient, base_url: &str, api_key: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn directions(
        &self,
        query: &TripQuery,
        mode: &str,
        extra: &[(&str, String)],
    ) -> Result<String, ProviderError> {
        let url = format!("{}/directions/json", self.base_url);
        let mut params: Vec<(&str, String)> = vec![
            ("origin", query.origin.to_lat_lng_string()),
            ("destination", query.destination.to_lat_lng_string()),
            ("mode", mode.to_string()),
            ("key", self.api_key.clone()),
        ];
        params.extend(extra.iter().cloned());

        debug!(mode, "Requesting Google directions");
        self.http
            .execute_with_retry(|client| client.get(&url).query(&params))
            .await
    }

    /// Best transit itinerary for the query
    pub async fn transit_directions(
        &self,
        query: &TripQuery,
    ) -> Result<Vec<RouteEstimate>, ProviderError> {
        let time_param = match query.anchor {
            TimeAnchor::DepartAt(at) => ("departure_time", at.timestamp().to_string()),
            TimeAnchor::ArriveBy(at) => ("arrival_time", at.timestamp().to_string()),
        };
        let body = self
            .directions(query, "transit", &[("alternatives", "true".to_string()), time_param])
            .await?;

        let estimates = parse_transit_response(&body)?;
        info!(count = estimates.len(), "Retrieved Google transit directions");
        Ok(estimates)
    }

    /// Walking and driving estimates, requested concurrently. A mode that
    /// fails is skipped as long as the other one succeeds.
    pub async fn walking_driving_routes(
        &self,
        query: &TripQuery,
    ) -> Result<Vec<RouteEstimate>, ProviderError> {
        let now = [("departure_time", "now".to_string())];
        let (walking, driving) = futures::join!(
            self.directions(query, "walking", &[]),
            self.directions(query, "driving", &now),
        );

        let mut estimates = Vec::new();
        let mut last_error = None;

        for (mode, result) in [(RouteMode::Walking, walking), (RouteMode::Driving, driving)] {
            match result.and_then(|body| parse_directions_response(mode, &body)) {
                Ok(estimate) => estimates.push(estimate),
                Err(e) => {
                    warn!(mode = %mode, error = %e, "Google directions mode failed, skipping");
                    last_error = Some(e);
                }
            }
        }

        match (estimates.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            (true, None) => Err(ProviderError::Empty),
            _ => Ok(estimates),
        }
    }
}

#[async_trait]
impl Geocoder for GoogleMapsClient {
    fn id(&self) -> ProviderId {
        ProviderId::GoogleGeocoding
    }

    async fn geocode(&self, text: &str) -> Result<Vec<Place>, ProviderError> {
        let url = format!("{}/geocode/json", self.base_url);
        let params = [("address", text.to_string()), ("key", self.api_key.clone())];

        let body = self
            .http
            .execute_with_retry(|client| client.get(&url).query(&params))
            .await?;

        let places = parse_geocode_response(&body)?;
        info!(count = places.len(), address = %text, "Google geocoding finished");
        Ok(places)
    }
}

/// Transit directions provider
#[derive(Debug, Clone)]
pub struct GoogleTransit(pub GoogleMapsClient);

#[async_trait]
impl RouteProvider for GoogleTransit {
    fn id(&self) -> ProviderId {
        ProviderId::GoogleTransit
    }

    async fn fetch_estimates(&self, query: &TripQuery) -> Result<Vec<RouteEstimate>, ProviderError> {
        self.0.transit_directions(query).await
    }
}

/// Walking/driving directions provider
#[derive(Debug, Clone)]
pub struct GoogleDirections(pub GoogleMapsClient);

#[async_trait]
impl RouteProvider for GoogleDirections {
    fn id(&self) -> ProviderId {
        ProviderId::GoogleDirections
    }

    async fn fetch_estimates(&self, query: &TripQuery) -> Result<Vec<RouteEstimate>, ProviderError> {
        self.0.walking_driving_routes(query).await
    }
}

#[derive(Debug, Deserialize)]
struct GoogleValue {
    value: f64,
}

#[derive(Debug, Deserialize)]
struct GoogleNamed {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleVehicle {
    #[serde(rename = "type")]
    vehicle_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleLine {
    short_name: Option<String>,
    name: Option<String>,
    vehicle: Option<GoogleVehicle>,
}

#[derive(Debug, Deserialize)]
struct GoogleTransitDetails {
    line: GoogleLine,
    departure_stop: Option<GoogleNamed>,
    arrival_stop: Option<GoogleNamed>,
    headsign: Option<String>,
    num_stops: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GoogleStep {
    travel_mode: String,
    duration: Option<GoogleValue>,
    transit_details: Option<GoogleTransitDetails>,
}

#[derive(Debug, Deserialize)]
struct GoogleLeg {
    duration: GoogleValue,
    duration_in_traffic: Option<GoogleValue>,
    distance: Option<GoogleValue>,
    #[serde(default)]
    steps: Vec<GoogleStep>,
}

#[derive(Debug, Deserialize)]
struct GoogleRoute {
    #[serde(default)]
    legs: Vec<GoogleLeg>,
}

#[derive(Debug, Deserialize)]
struct GoogleDirectionsResponse {
    status: String,
    #[serde(default)]
    routes: Vec<GoogleRoute>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleLatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct GoogleGeometry {
    location: GoogleLatLng,
}

#[derive(Debug, Deserialize)]
struct GoogleGeocodeResult {
    formatted_address: String,
    geometry: GoogleGeometry,
}

#[derive(Debug, Deserialize)]
struct GoogleGeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleGeocodeResult>,
}

fn check_status(status: &str, error_message: Option<&str>) -> Result<(), ProviderError> {
    match status {
        "OK" => Ok(()),
        "ZERO_RESULTS" | "NOT_FOUND" => Err(ProviderError::Empty),
        other => Err(ProviderError::StatusError(match error_message {
            Some(message) => format!("{}: {}", other, message),
            None => other.to_string(),
        })),
    }
}

fn first_leg(response: &GoogleDirectionsResponse) -> Result<&GoogleLeg, ProviderError> {
    response
        .routes
        .first()
        .and_then(|route| route.legs.first())
        .ok_or(ProviderError::Empty)
}

/// Convert a transit directions body into at most one estimate: the first
/// route, which Google ranks best
fn parse_transit_response(body: &str) -> Result<Vec<RouteEstimate>, ProviderError> {
    let response: GoogleDirectionsResponse = parse_body(ProviderId::GoogleTransit, body)?;
    check_status(&response.status, response.error_message.as_deref())?;
    let leg = first_leg(&response)?;

    let legs: Vec<TransitLeg> = leg
        .steps
        .iter()
        .filter(|step| step.travel_mode == "TRANSIT")
        .filter_map(|step| step.transit_details.as_ref())
        .map(|details| TransitLeg {
            vehicle: details
                .line
                .vehicle
                .as_ref()
                .and_then(|v| v.vehicle_type.clone())
                .unwrap_or_else(|| "TRANSIT".to_string()),
            line_name: details
                .line
                .short_name
                .clone()
                .or_else(|| details.line.name.clone())
                .unwrap_or_else(|| "?".to_string()),
            departure_stop: stop_name(details.departure_stop.as_ref()),
            arrival_stop: stop_name(details.arrival_stop.as_ref()),
            headsign: details.headsign.clone(),
            num_stops: details.num_stops,
        })
        .collect();

    let walking_seconds: f64 = leg
        .steps
        .iter()
        .filter(|step| step.travel_mode == "WALKING")
        .filter_map(|step| step.duration.as_ref().map(|d| d.value))
        .sum();

    let duration_minutes = leg.duration.value / 60.0;
    let description = if legs.is_empty() {
        format!("{}min by transit", duration_minutes.round())
    } else {
        let lines: Vec<&str> = legs.iter().map(|l| l.line_name.as_str()).collect();
        format!("{}min via {}", duration_minutes.round(), lines.join(" → "))
    };

    Ok(vec![RouteEstimate {
        mode: RouteMode::Transit,
        source: ProviderId::GoogleTransit,
        duration_minutes,
        description,
        confidence: source_prior(ProviderId::GoogleTransit, RouteMode::Transit),
        priority: 0,
        detail: RouteDetail::Transit {
            legs,
            walking_minutes: (walking_seconds / 60.0).round(),
        },
    }])
}

fn stop_name(stop: Option<&GoogleNamed>) -> String {
    stop.and_then(|s| s.name.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Convert a walking or driving directions body into an estimate. Driving
/// prefers the traffic-aware duration when Google supplies one.
fn parse_directions_response(mode: RouteMode, body: &str) -> Result<RouteEstimate, ProviderError> {
    let response: GoogleDirectionsResponse = parse_body(ProviderId::GoogleDirections, body)?;
    check_status(&response.status, response.error_message.as_deref())?;
    let leg = first_leg(&response)?;

    let (seconds, in_traffic) = match (mode, &leg.duration_in_traffic) {
        (RouteMode::Driving, Some(traffic)) => (traffic.value, true),
        _ => (leg.duration.value, false),
    };
    let duration_minutes = seconds / 60.0;
    let description = match mode {
        RouteMode::Walking => format!("{}min walk", duration_minutes.round()),
        RouteMode::Driving => format!("{}min drive", duration_minutes.round()),
        RouteMode::Cycling => format!("{}min bike ride", duration_minutes.round()),
        RouteMode::Transit => format!("{}min by transit", duration_minutes.round()),
    };

    Ok(RouteEstimate {
        mode,
        source: ProviderId::GoogleDirections,
        duration_minutes,
        description,
        confidence: source_prior(ProviderId::GoogleDirections, mode),
        priority: 0,
        detail: RouteDetail::Street {
            distance_meters: leg.distance.as_ref().map(|d| d.value).unwrap_or(0.0),
            in_traffic,
        },
    })
}

/// Geocoding results, best first. "ZERO_RESULTS" is an empty list, not an error.
fn parse_geocode_response(body: &str) -> Result<Vec<Place>, ProviderError> {
    let response: GoogleGeocodeResponse = parse_body(ProviderId::GoogleGeocoding, body)?;
    match check_status(&response.status, None) {
        Ok(()) => {}
        Err(ProviderError::Empty) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    }

    Ok(response
        .results
        .into_iter()
        .take(MAX_GEOCODE_RESULTS)
        .map(|result| Place {
            coordinates: Coordinates::new(result.geometry.location.lat, result.geometry.location.lng),
            label: result.formatted_address,
            confidence: None,
            source: ProviderId::GoogleGeocoding,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transit_body() -> String {
        json!({
            "status": "OK",
            "routes": [
                {
                    "summary": "",
                    "legs": [{
                        "duration": { "value": 1800, "text": "30 mins" },
                        "distance": { "value": 6200, "text": "6.2 km" },
                        "steps": [
                            { "travel_mode": "WALKING", "duration": { "value": 240 } },
                            {
                                "travel_mode": "TRANSIT",
                                "duration": { "value": 900 },
                                "transit_details": {
                                    "line": { "short_name": "Red", "vehicle": { "type": "SUBWAY" } },
                                    "departure_stop": { "name": "Park Street" },
                                    "arrival_stop": { "name": "Harvard" },
                                    "headsign": "Alewife",
                                    "num_stops": 4
                                }
                            },
                            {
                                "travel_mode": "TRANSIT",
                                "duration": { "value": 420 },
                                "transit_details": {
                                    "line": { "name": "Route 1", "vehicle": { "type": "BUS" } },
                                    "departure_stop": { "name": "Harvard" },
                                    "arrival_stop": { "name": "Central" }
                                }
                            },
                            { "travel_mode": "WALKING", "duration": { "value": 180 } }
                        ]
                    }]
                },
                {
                    "legs": [{ "duration": { "value": 1500 }, "steps": [] }]
                }
            ]
        })
        .to_string()
    }

    #[test]
    fn transit_takes_first_route_with_legs() {
        let estimates = parse_transit_response(&transit_body()).unwrap();
        assert_eq!(estimates.len(), 1);

        let estimate = &estimates[0];
        assert_eq!(estimate.mode, RouteMode::Transit);
        assert_eq!(estimate.duration_minutes, 30.0);
        assert_eq!(estimate.confidence, 0.85);
        assert_eq!(estimate.description, "30min via Red → Route 1");
        match &estimate.detail {
            RouteDetail::Transit {
                legs,
                walking_minutes,
            } => {
                assert_eq!(legs.len(), 2);
                assert_eq!(legs[0].vehicle, "SUBWAY");
                assert_eq!(legs[0].departure_stop, "Park Street");
                assert_eq!(legs[0].num_stops, Some(4));
                assert_eq!(legs[1].line_name, "Route 1");
                assert_eq!(*walking_minutes, 7.0);
            }
            other => panic!("unexpected detail {:?}", other),
        }
    }

    #[test]
    fn transit_non_ok_status_is_an_error() {
        let body = json!({ "status": "REQUEST_DENIED", "error_message": "bad key", "routes": [] });
        let err = parse_transit_response(&body.to_string()).unwrap_err();
        match err {
            ProviderError::StatusError(message) => assert!(message.contains("bad key")),
            other => panic!("unexpected error {:?}", other),
        }

        let zero = json!({ "status": "ZERO_RESULTS", "routes": [] });
        assert!(matches!(
            parse_transit_response(&zero.to_string()),
            Err(ProviderError::Empty)
        ));
    }

    #[test]
    fn driving_prefers_traffic_duration() {
        let body = json!({
            "status": "OK",
            "routes": [{ "legs": [{
                "duration": { "value": 900 },
                "duration_in_traffic": { "value": 1260 },
                "distance": { "value": 8000 }
            }]}]
        })
        .to_string();

        let driving = parse_directions_response(RouteMode::Driving, &body).unwrap();
        assert_eq!(driving.duration_minutes, 21.0);
        assert_eq!(driving.confidence, 0.9);
        assert_eq!(driving.description, "21min drive");
        assert_eq!(
            driving.detail,
            RouteDetail::Street {
                distance_meters: 8000.0,
                in_traffic: true
            }
        );

        let walking = parse_directions_response(RouteMode::Walking, &body).unwrap();
        assert_eq!(walking.duration_minutes, 15.0);
        assert_eq!(walking.confidence, 0.8);
    }

    #[test]
    fn ok_status_without_routes_is_empty() {
        let body = json!({ "status": "OK", "routes": [] }).to_string();
        assert!(matches!(
            parse_directions_response(RouteMode::Walking, &body),
            Err(ProviderError::Empty)
        ));
    }

    #[test]
    fn geocode_keeps_top_three() {
        let result = |address: &str, lat: f64| {
            json!({
                "formatted_address": address,
                "geometry": { "location": { "lat": lat, "lng": -71.0 } },
                "place_id": "x"
            })
        };
        let body = json!({
            "status": "OK",
            "results": [result("A", 42.1), result("B", 42.2), result("C", 42.3), result("D", 42.4)]
        })
        .to_string();

        let places = parse_geocode_response(&body).unwrap();
        assert_eq!(places.len(), 3);
        assert_eq!(places[0].label, "A");
        assert_eq!(places[0].coordinates, Coordinates::new(42.1, -71.0));
        assert_eq!(places[0].source, ProviderId::GoogleGeocoding);
    }

    #[test]
    fn geocode_zero_results_is_empty_list() {
        let body = json!({ "status": "ZERO_RESULTS", "results": [] }).to_string();
        assert!(parse_geocode_response(&body).unwrap().is_empty());

        let denied = json!({ "status": "OVER_QUERY_LIMIT" }).to_string();
        assert!(matches!(
            parse_geocode_response(&denied),
            Err(ProviderError::StatusError(_))
        ));
    }
}
