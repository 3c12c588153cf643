/// Hybrid prediction engine.
///
/// Geocodes the destination, fans out to route providers, blends the chosen
/// route with the personal trip log and turns the result into a departure
/// time. Holds no mutable state: every call reads the trip store and the
/// providers afresh.
use chrono::{DateTime, FixedOffset};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, MatchPolicy};
use crate::models::{
    Coordinates, DataQuality, NearbyStop, OfflineEstimate, Place, PredictionResult, ProviderId,
    TimeAnchor, TripQuery,
};
use crate::providers::{Geocoder, RouteProvider, StopsProvider};
use crate::services::baseline;
use crate::services::blender::{self, BlendPolicy};
use crate::services::departure;
use crate::services::features::time_features;
use crate::services::reconciler::RouteReconciler;
use crate::services::PredictionError;
use crate::store::TripHistory;

/// Stops attached to a prediction as context
const MAX_CONTEXT_STOPS: usize = 3;
/// Assumed trip length for the offline estimate when nothing is logged
const DEFAULT_DISTANCE_METERS: f64 = 5_000.0;
const DEFAULT_OFFLINE_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub origin: Coordinates,
    /// Free-text destination, geocoded and used to look up trip history
    pub destination: String,
    pub arrival_time: DateTime<FixedOffset>,
    /// Instant the prediction is made for; recency weights are measured from it
    pub requested_at: DateTime<FixedOffset>,
}

pub struct PredictionEngine {
    geocoders: Vec<Arc<dyn Geocoder>>,
    reconciler: RouteReconciler,
    stops: Option<Arc<dyn StopsProvider>>,
    history: Arc<dyn TripHistory>,
    blend_policy: BlendPolicy,
    history_match: MatchPolicy,
    stop_radius_miles: f64,
    call_timeout: Duration,
}

impl PredictionEngine {
    /// `geocoders` are tried in order; the first non-empty answer wins
    pub fn new(
        geocoders: Vec<Arc<dyn Geocoder>>,
        route_providers: Vec<Arc<dyn RouteProvider>>,
        stops: Option<Arc<dyn StopsProvider>>,
        history: Arc<dyn TripHistory>,
        config: &Config,
    ) -> Self {
        let call_timeout = Duration::from_secs(config.providers.call_timeout_secs);
        Self {
            geocoders,
            reconciler: RouteReconciler::new(route_providers, call_timeout),
            stops,
            history,
            blend_policy: BlendPolicy {
                historical_weight: config.prediction.historical_weight,
                min_trips: config.prediction.min_historical_trips,
            },
            history_match: config.prediction.history_match,
            stop_radius_miles: config.prediction.nearby_stop_radius_miles,
            call_timeout,
        }
    }

    pub fn route_provider_count(&self) -> usize {
        self.reconciler.provider_count()
    }

    pub fn geocoder_count(&self) -> usize {
        self.geocoders.len()
    }

    pub async fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult, PredictionError> {
        let destination_text = validate_destination(&request.destination)?;
        if !request.origin.is_valid() {
            return Err(PredictionError::InvalidInput(format!(
                "origin coordinates out of range: {}",
                request.origin.to_lat_lng_string()
            )));
        }
        validate_arrival(request.arrival_time, request.requested_at)?;

        let destination = self.geocode(destination_text).await?;
        info!(
            destination = %destination_text,
            label = %destination.label,
            source = %destination.source,
            "Resolved destination"
        );

        let query = TripQuery {
            origin: request.origin,
            destination: destination.coordinates,
            anchor: TimeAnchor::ArriveBy(request.arrival_time),
        };

        let (ranked, stops, history) = tokio::join!(
            self.reconciler.reconcile(&query),
            self.nearby_stops(request.origin),
            self.history
                .trips_for_destination(destination_text, self.history_match),
        );
        let ranked = ranked?;
        let history = history?;

        let requested = time_features(&request.arrival_time);
        let blended = blender::blend_route(
            ranked.primary,
            &history,
            &requested,
            request.requested_at,
            &self.blend_policy,
        );
        let primary = blended.route;
        let plan = departure::plan_for_route(request.arrival_time, &primary)?;

        let mut sources_used = ranked.sources;
        if !stops.is_empty() {
            sources_used.push(ProviderId::Mbta);
            sources_used.sort();
            sources_used.dedup();
        }

        info!(
            mode = %primary.mode,
            predicted_minutes = plan.predicted_travel_time,
            buffer = plan.buffer_minutes,
            personalized = blended.personalized,
            history = history.len(),
            "Computed departure"
        );

        Ok(PredictionResult {
            departure_time: plan.departure_time,
            arrival_time: request.arrival_time,
            predicted_travel_time: plan.predicted_travel_time,
            buffer_minutes: plan.buffer_minutes,
            confidence: primary.confidence.clamp(0.0, 1.0),
            total_time_needed: plan.total_time_needed,
            primary_route: primary,
            alternatives: ranked.alternatives,
            data_quality: DataQuality {
                sources_used,
                historical_sample_size: history.len(),
                personalized: blended.personalized,
            },
            destination,
            nearby_stops: stops,
        })
    }

    /// Estimate a departure from the trip log and the baseline model alone,
    /// for when no route provider is reachable
    pub async fn offline_estimate(
        &self,
        destination: &str,
        arrival_time: DateTime<FixedOffset>,
        requested_at: DateTime<FixedOffset>,
    ) -> Result<OfflineEstimate, PredictionError> {
        let destination = validate_destination(destination)?;
        validate_arrival(arrival_time, requested_at)?;

        let history = self
            .history
            .trips_for_destination(destination, self.history_match)
            .await?;
        let requested = time_features(&arrival_time);

        let assumed_distance_meters = if history.is_empty() {
            DEFAULT_DISTANCE_METERS
        } else {
            history.iter().map(|t| t.distance_meters).sum::<f64>() / history.len() as f64
        };
        let baseline_minutes = baseline::predict_minutes(&requested, assumed_distance_meters);

        let (predicted, confidence) = if history.len() >= self.blend_policy.min_trips {
            let confidence = (history.len() as f64 / 10.0).min(1.0);
            match blender::weighted_historical_mean(&history, &requested, requested_at) {
                Some(mean) => (self.blend_policy.blend(mean, baseline_minutes), confidence),
                None => (baseline_minutes, confidence),
            }
        } else {
            (baseline_minutes, DEFAULT_OFFLINE_CONFIDENCE)
        };

        let plan = departure::plan_departure(
            arrival_time,
            predicted,
            departure::offline_buffer_minutes(confidence),
        )?;

        debug!(
            destination = %destination,
            history = history.len(),
            predicted_minutes = predicted,
            "Computed offline estimate"
        );

        Ok(OfflineEstimate {
            departure_time: plan.departure_time,
            predicted_travel_time: plan.predicted_travel_time,
            buffer_minutes: plan.buffer_minutes,
            confidence,
            total_time_needed: plan.total_time_needed,
            assumed_distance_meters,
            historical_sample_size: history.len(),
        })
    }

    /// Try each geocoder in turn. Errors count as empty answers.
    async fn geocode(&self, text: &str) -> Result<Place, PredictionError> {
        for geocoder in &self.geocoders {
            match tokio::time::timeout(self.call_timeout, geocoder.geocode(text)).await {
                Ok(Ok(places)) => {
                    if let Some(place) = places.into_iter().find(|p| p.coordinates.is_valid()) {
                        return Ok(place);
                    }
                    debug!(geocoder = %geocoder.id(), "Geocoder returned no results");
                }
                Ok(Err(e)) => {
                    warn!(geocoder = %geocoder.id(), error = %e, "Geocoder failed, trying next");
                }
                Err(_) => {
                    warn!(geocoder = %geocoder.id(), "Geocoder timed out, trying next");
                }
            }
        }

        Err(PredictionError::DestinationNotFound(text.to_string()))
    }

    /// Supplementary context only; any failure yields no stops
    async fn nearby_stops(&self, origin: Coordinates) -> Vec<NearbyStop> {
        let Some(stops) = &self.stops else {
            return Vec::new();
        };

        let result = tokio::time::timeout(
            self.call_timeout,
            stops.nearby_stops(origin, self.stop_radius_miles),
        )
        .await;

        match result {
            Ok(Ok(mut found)) => {
                found.truncate(MAX_CONTEXT_STOPS);
                found
            }
            Ok(Err(e)) => {
                warn!(provider = %stops.id(), error = %e, "Nearby stops unavailable");
                Vec::new()
            }
            Err(_) => {
                warn!(provider = %stops.id(), "Nearby stops timed out");
                Vec::new()
            }
        }
    }
}

fn validate_destination(destination: &str) -> Result<&str, PredictionError> {
    let trimmed = destination.trim();
    if trimmed.is_empty() {
        return Err(PredictionError::InvalidInput(
            "destination must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}

fn validate_arrival(
    arrival_time: DateTime<FixedOffset>,
    requested_at: DateTime<FixedOffset>,
) -> Result<(), PredictionError> {
    if arrival_time <= requested_at {
        return Err(PredictionError::InvalidInput(format!(
            "arrival time {} is not in the future",
            arrival_time.to_rfc3339()
        )));
    }
    Ok(())
}
