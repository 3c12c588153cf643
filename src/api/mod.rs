pub mod error;
pub mod predictions;
pub mod stops;
pub mod trips;

pub use error::{internal_error, ErrorResponse};

use axum::Router;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::providers::mbta::MbtaClient;
use crate::providers::StopsProvider;
use crate::services::PredictionEngine;
use crate::store::TripStore;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Departure Planner API",
        description = "Departure time recommendations from live routing data and a personal trip log"
    ),
    tags(
        (name = "predictions", description = "Departure time predictions"),
        (name = "trips", description = "Personal trip log"),
        (name = "stops", description = "Nearby transit stops and departures")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PredictionEngine>,
    pub trips: Arc<dyn TripStore>,
    pub stops: Option<Arc<dyn StopsProvider>>,
    pub departures: Option<MbtaClient>,
}

/// All API routes with their OpenAPI description
pub fn router(state: AppState) -> (Router, utoipa::openapi::OpenApi) {
    OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(predictions::create_prediction))
        .routes(routes!(predictions::create_offline_estimate))
        .routes(routes!(trips::log_trip, trips::list_trips))
        .routes(routes!(trips::export_trips))
        .routes(routes!(stops::nearby_stops))
        .routes(routes!(stops::stop_departures))
        .with_state(state)
        .split_for_parts()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::Config;
    use crate::models::{
        Coordinates, NearbyStop, Place, ProviderId, RouteDetail, RouteEstimate, RouteMode,
        TripQuery, TripRecord,
    };
    use crate::providers::{Geocoder, ProviderError, RouteProvider};
    use crate::store::InMemoryTripStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, Response};
    use tower::ServiceExt;

    /// Knows a single destination
    struct HarvardGeocoder;

    #[async_trait]
    impl Geocoder for HarvardGeocoder {
        fn id(&self) -> ProviderId {
            ProviderId::GoogleGeocoding
        }

        async fn geocode(&self, text: &str) -> Result<Vec<Place>, ProviderError> {
            if !text.to_lowercase().contains("harvard") {
                return Ok(Vec::new());
            }
            Ok(vec![Place {
                coordinates: Coordinates::new(42.3736, -71.1190),
                label: "Harvard Square, Cambridge, MA".into(),
                confidence: Some(0.9),
                source: ProviderId::GoogleGeocoding,
            }])
        }
    }

    struct FixedTransit;

    #[async_trait]
    impl RouteProvider for FixedTransit {
        fn id(&self) -> ProviderId {
            ProviderId::GoogleTransit
        }

        async fn fetch_estimates(&self, _query: &TripQuery) -> Result<Vec<RouteEstimate>, ProviderError> {
            Ok(vec![RouteEstimate {
                mode: RouteMode::Transit,
                source: ProviderId::GoogleTransit,
                duration_minutes: 25.0,
                description: "25min via Park Street → Harvard".into(),
                confidence: 0.85,
                priority: 0,
                detail: RouteDetail::None,
            }])
        }
    }

    pub struct FixedStops(pub Vec<NearbyStop>);

    #[async_trait]
    impl StopsProvider for FixedStops {
        fn id(&self) -> ProviderId {
            ProviderId::Mbta
        }

        async fn nearby_stops(
            &self,
            _origin: Coordinates,
            _radius_miles: f64,
        ) -> Result<Vec<NearbyStop>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    pub struct TestApp {
        pub router: Router,
        pub trips: Arc<InMemoryTripStore>,
    }

    pub fn test_state(trips: Arc<InMemoryTripStore>, stops: Option<Arc<dyn StopsProvider>>) -> AppState {
        let engine = PredictionEngine::new(
            vec![Arc::new(HarvardGeocoder)],
            vec![Arc::new(FixedTransit)],
            None,
            trips.clone(),
            &Config::default(),
        );
        AppState {
            engine: Arc::new(engine),
            trips,
            stops,
            departures: None,
        }
    }

    pub fn test_app(history: Vec<TripRecord>) -> TestApp {
        let trips = Arc::new(InMemoryTripStore::with_trips(history));
        let (router, _) = router(test_state(trips.clone(), None));
        TestApp { router, trips }
    }

    pub async fn post_json(router: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        router.oneshot(request).await.unwrap()
    }

    pub async fn get(router: Router, uri: &str) -> Response<Body> {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        router.oneshot(request).await.unwrap()
    }

    pub async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
