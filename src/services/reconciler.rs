/// Route reconciliation: fan out to every route provider, wait for all of
/// them to settle, and merge whatever came back into one ranked list.
///
/// A provider that errors, times out or panics contributes nothing; it never
/// cancels or fails its siblings. Only when every provider comes back empty
/// does reconciliation fail.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::{ProviderId, RouteEstimate, RouteMode, TripQuery};
use crate::providers::{ProviderError, RouteProvider};
use crate::services::PredictionError;

/// Walks up to this long rank alongside transit
const SHORT_WALK_MINUTES: f64 = 15.0;
const MAX_ALTERNATIVES: usize = 3;
/// Estimates longer than a day are provider garbage
const MAX_ROUTE_MINUTES: f64 = 24.0 * 60.0;

/// Fixed confidence of a provider for one mode. Used both as the estimate's
/// initial confidence and to choose between providers reporting the same mode.
pub fn source_prior(provider: ProviderId, mode: RouteMode) -> f64 {
    match (provider, mode) {
        (ProviderId::GoogleTransit, _) => 0.85,
        (ProviderId::GoogleDirections, RouteMode::Driving) => 0.90,
        (ProviderId::GoogleDirections, _) => 0.80,
        (ProviderId::OpenRouteService, RouteMode::Driving) => 0.85,
        (ProviderId::OpenRouteService, RouteMode::Walking) => 0.78,
        (ProviderId::OpenRouteService, _) => 0.75,
        _ => 0.5,
    }
}

/// Rank of a mode, lower is better. Driving comes last: this is a transit
/// planner and driving is only a fallback.
pub fn route_priority(mode: RouteMode, duration_minutes: f64) -> u8 {
    match mode {
        RouteMode::Transit => 1,
        RouteMode::Walking if duration_minutes <= SHORT_WALK_MINUTES => 1,
        RouteMode::Walking => 3,
        RouteMode::Cycling => 2,
        RouteMode::Driving => 4,
    }
}

/// Settled result of one provider call
#[derive(Debug)]
pub struct ProviderOutcome {
    pub provider: ProviderId,
    pub result: Result<Vec<RouteEstimate>, ProviderError>,
}

/// Ranked candidates for one request
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRoutes {
    pub primary: RouteEstimate,
    pub alternatives: Vec<RouteEstimate>,
    /// Every provider that returned at least one usable estimate, including
    /// those that lost the per-mode pick. Stable order.
    pub sources: Vec<ProviderId>,
}

pub struct RouteReconciler {
    providers: Vec<Arc<dyn RouteProvider>>,
    call_timeout: Duration,
}

impl RouteReconciler {
    pub fn new(providers: Vec<Arc<dyn RouteProvider>>, call_timeout: Duration) -> Self {
        Self {
            providers,
            call_timeout,
        }
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Call every provider concurrently and wait for all of them. Each call
    /// runs in its own task under its own timeout.
    pub async fn settle_all(&self, query: &TripQuery) -> Vec<ProviderOutcome> {
        let tasks: Vec<_> = self
            .providers
            .iter()
            .map(|provider| {
                let provider = Arc::clone(provider);
                let query = *query;
                let call_timeout = self.call_timeout;
                let id = provider.id();
                let handle = tokio::spawn(async move {
                    match tokio::time::timeout(call_timeout, provider.fetch_estimates(&query)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Timeout(call_timeout)),
                    }
                });
                (id, handle)
            })
            .collect();

        let (ids, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        ids.into_iter()
            .zip(results)
            .map(|(provider, joined)| ProviderOutcome {
                provider,
                result: joined.unwrap_or_else(|e| Err(ProviderError::TaskFailed(e.to_string()))),
            })
            .collect()
    }

    pub async fn reconcile(&self, query: &TripQuery) -> Result<RankedRoutes, PredictionError> {
        let outcomes = self.settle_all(query).await;
        rank_candidates(outcomes)
    }
}

/// Keep one estimate per mode: the higher-confidence source wins, then the
/// shorter duration
fn prefer(current: &RouteEstimate, candidate: &RouteEstimate) -> bool {
    candidate
        .confidence
        .total_cmp(&current.confidence)
        .then_with(|| current.duration_minutes.total_cmp(&candidate.duration_minutes))
        .is_gt()
}

/// Merge settled provider outcomes into a ranked candidate list
pub fn rank_candidates(outcomes: Vec<ProviderOutcome>) -> Result<RankedRoutes, PredictionError> {
    let mut by_mode: BTreeMap<RouteMode, RouteEstimate> = BTreeMap::new();
    let mut sources: BTreeSet<ProviderId> = BTreeSet::new();

    for outcome in outcomes {
        let estimates = match outcome.result {
            Ok(estimates) => estimates,
            Err(e) => {
                warn!(provider = %outcome.provider, error = %e, "Route provider failed, excluding it");
                continue;
            }
        };

        debug!(provider = %outcome.provider, count = estimates.len(), "Route provider settled");

        for estimate in estimates {
            if !(0.0..=MAX_ROUTE_MINUTES).contains(&estimate.duration_minutes) {
                warn!(
                    provider = %outcome.provider,
                    mode = %estimate.mode,
                    duration = estimate.duration_minutes,
                    "Discarding estimate with invalid duration"
                );
                continue;
            }

            sources.insert(outcome.provider);
            let replace = by_mode
                .get(&estimate.mode)
                .map_or(true, |current| prefer(current, &estimate));
            if replace {
                by_mode.insert(estimate.mode, estimate);
            }
        }
    }

    let mut candidates: Vec<RouteEstimate> = by_mode
        .into_values()
        .map(|mut estimate| {
            estimate.priority = route_priority(estimate.mode, estimate.duration_minutes);
            estimate
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.duration_minutes.total_cmp(&b.duration_minutes))
    });

    let mut ranked = candidates.into_iter();
    let primary = ranked.next().ok_or(PredictionError::NoRouteFound)?;
    let alternatives: Vec<RouteEstimate> = ranked.take(MAX_ALTERNATIVES).collect();

    let sources: Vec<ProviderId> = sources.into_iter().collect();

    info!(
        primary = %primary.mode,
        primary_minutes = primary.duration_minutes,
        alternatives = alternatives.len(),
        "Ranked route candidates"
    );

    Ok(RankedRoutes {
        primary,
        alternatives,
        sources,
    })
}
