/// OpenRouteService adapters: multi-profile routing and the fallback geocoder.
///
/// Directions are requested per profile with
/// `POST /v2/directions/{profile}` and a body of `[lon, lat]` pairs;
/// errors come back as `{"error": {...}}` or `{"error": "..."}`.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::{
    Coordinates, Place, ProviderId, RouteDetail, RouteEstimate, RouteMode, TripQuery,
};
use crate::providers::{parse_body, Geocoder, HttpClient, ProviderError, RouteProvider};
use crate::services::reconciler::source_prior;

const MAX_GEOCODE_RESULTS: usize = 5;

/// Routing profiles queried for every trip
const PROFILES: [(&str, RouteMode); 3] = [
    ("driving-car", RouteMode::Driving),
    ("cycling-regular", RouteMode::Cycling),
    ("foot-walking", RouteMode::Walking),
];

#[derive(Debug, Clone)]
pub struct OpenRouteServiceClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct DirectionsRequest {
    coordinates: [[f64; 2]; 2],
    instructions: bool,
}

impl OpenRouteServiceClient {
    pub fn new(http: HttpClient, base_url: &str, api_key: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn route(
        &self,
        query: &TripQuery,
        profile: &str,
        mode: RouteMode,
    ) -> Result<RouteEstimate, ProviderError> {
        let url = format!("{}/v2/directions/{}", self.base_url, profile);
        let request = DirectionsRequest {
            coordinates: [
                [query.origin.longitude, query.origin.latitude],
                [query.destination.longitude, query.destination.latitude],
            ],
            instructions: false,
        };

        debug!(profile, "Requesting OpenRouteService directions");
        let body = self
            .http
            .execute_with_retry(|client| {
                client
                    .post(&url)
                    .header("Authorization", &self.api_key)
                    .json(&request)
            })
            .await?;

        parse_directions_response(mode, &body)
    }

    /// One estimate per profile that answered; fails only if all failed
    pub async fn multiple_route_options(
        &self,
        query: &TripQuery,
    ) -> Result<Vec<RouteEstimate>, ProviderError> {
        let results = futures::future::join_all(
            PROFILES
                .iter()
                .map(|(profile, mode)| self.route(query, profile, *mode)),
        )
        .await;

        let mut estimates = Vec::new();
        let mut last_error = None;
        for ((profile, _), result) in PROFILES.iter().zip(results) {
            match result {
                Ok(estimate) => estimates.push(estimate),
                Err(e) => {
                    warn!(profile, error = %e, "OpenRouteService profile failed, skipping");
                    last_error = Some(e);
                }
            }
        }

        info!(count = estimates.len(), "Retrieved OpenRouteService route options");
        if estimates.is_empty() {
            return Err(last_error.unwrap_or(ProviderError::Empty));
        }
        Ok(estimates)
    }
}

#[async_trait]
impl RouteProvider for OpenRouteServiceClient {
    fn id(&self) -> ProviderId {
        ProviderId::OpenRouteService
    }

    async fn fetch_estimates(&self, query: &TripQuery) -> Result<Vec<RouteEstimate>, ProviderError> {
        self.multiple_route_options(query).await
    }
}

#[async_trait]
impl Geocoder for OpenRouteServiceClient {
    fn id(&self) -> ProviderId {
        ProviderId::OrsGeocoding
    }

    async fn geocode(&self, text: &str) -> Result<Vec<Place>, ProviderError> {
        let url = format!("{}/geocode/search", self.base_url);
        let params = [
            ("api_key", self.api_key.clone()),
            ("text", text.to_string()),
            ("size", MAX_GEOCODE_RESULTS.to_string()),
        ];

        let body = self
            .http
            .execute_with_retry(|client| client.get(&url).query(&params))
            .await?;

        let places = parse_geocode_response(&body)?;
        info!(count = places.len(), address = %text, "OpenRouteService geocoding finished");
        Ok(places)
    }
}

#[derive(Debug, Deserialize)]
struct OrsSummary {
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    distance: f64,
}

#[derive(Debug, Deserialize)]
struct OrsRoute {
    summary: OrsSummary,
}

#[derive(Debug, Deserialize)]
struct OrsDirectionsResponse {
    #[serde(default)]
    routes: Vec<OrsRoute>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OrsGeometry {
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct OrsProperties {
    label: Option<String>,
    name: Option<String>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OrsFeature {
    geometry: OrsGeometry,
    properties: OrsProperties,
}

#[derive(Debug, Deserialize)]
struct OrsGeocodeResponse {
    #[serde(default)]
    features: Vec<OrsFeature>,
}

fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

fn parse_directions_response(mode: RouteMode, body: &str) -> Result<RouteEstimate, ProviderError> {
    let response: OrsDirectionsResponse = parse_body(ProviderId::OpenRouteService, body)?;
    if let Some(error) = &response.error {
        return Err(ProviderError::StatusError(error_message(error)));
    }

    let route = response.routes.first().ok_or(ProviderError::Empty)?;
    let duration_minutes = route.summary.duration / 60.0;
    let rounded = duration_minutes.round();
    let description = match mode {
        RouteMode::Walking => format!("{}min walk", rounded),
        RouteMode::Cycling => format!("{}min bike ride", rounded),
        RouteMode::Driving => format!("{}min drive", rounded),
        RouteMode::Transit => format!("{}min by transit", rounded),
    };

    Ok(RouteEstimate {
        mode,
        source: ProviderId::OpenRouteService,
        duration_minutes,
        description,
        confidence: source_prior(ProviderId::OpenRouteService, mode),
        priority: 0,
        detail: RouteDetail::Street {
            distance_meters: route.summary.distance,
            in_traffic: false,
        },
    })
}

/// Geocoding features ordered by the provider's confidence, highest first
fn parse_geocode_response(body: &str) -> Result<Vec<Place>, ProviderError> {
    let response: OrsGeocodeResponse = parse_body(ProviderId::OrsGeocoding, body)?;

    let mut places: Vec<Place> = response
        .features
        .into_iter()
        .filter_map(|feature| {
            let [longitude, latitude] = feature.geometry.coordinates.get(..2)? else {
                return None;
            };
            Some(Place {
                coordinates: Coordinates::new(*latitude, *longitude),
                label: feature
                    .properties
                    .label
                    .or(feature.properties.name)
                    .unwrap_or_else(|| "Unknown".to_string()),
                confidence: feature.properties.confidence,
                source: ProviderId::OrsGeocoding,
            })
        })
        .collect();

    // Stable sort keeps the provider order among equal confidences
    places.sort_by(|a, b| {
        b.confidence
            .unwrap_or(0.0)
            .total_cmp(&a.confidence.unwrap_or(0.0))
    });
    Ok(places)
}
