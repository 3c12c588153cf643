use axum::http::{header, HeaderValue, Method};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa_swagger_ui::SwaggerUi;

use departure_planner::api::{self, AppState};
use departure_planner::config::{Config, ProvidersConfig, ServerConfig};
use departure_planner::providers::google::{GoogleDirections, GoogleMapsClient, GoogleTransit};
use departure_planner::providers::mbta::MbtaClient;
use departure_planner::providers::ors::OpenRouteServiceClient;
use departure_planner::providers::{Geocoder, HttpClient, RouteProvider, StopsProvider};
use departure_planner::services::PredictionEngine;
use departure_planner::store::SqliteTripStore;

const CONFIG_PATH_ENV: &str = "DEPARTURE_PLANNER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    if server.cors_permissive {
        warn!("CORS is permissive, allowing any origin");
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    cors.allow_origin(origins)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "departure_planner=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)?;
    info!(path = %config_path, "Loaded configuration");

    let http = HttpClient::new(&config.providers)?;
    let providers = &config.providers;

    let mut geocoders: Vec<Arc<dyn Geocoder>> = Vec::new();
    let mut route_providers: Vec<Arc<dyn RouteProvider>> = Vec::new();

    match ProvidersConfig::api_key(&providers.google_api_key_env) {
        Some(key) => {
            let google = GoogleMapsClient::new(http.clone(), &providers.google_base_url, key);
            geocoders.push(Arc::new(google.clone()));
            route_providers.push(Arc::new(GoogleTransit(google.clone())));
            route_providers.push(Arc::new(GoogleDirections(google)));
            info!("Registered Google Maps providers");
        }
        None => warn!(
            env = %providers.google_api_key_env,
            "Google Maps API key not set, skipping Google providers"
        ),
    }

    match ProvidersConfig::api_key(&providers.ors_api_key_env) {
        Some(key) => {
            let ors = Arc::new(OpenRouteServiceClient::new(
                http.clone(),
                &providers.ors_base_url,
                key,
            ));
            geocoders.push(ors.clone());
            route_providers.push(ors);
            info!("Registered OpenRouteService providers");
        }
        None => warn!(
            env = %providers.ors_api_key_env,
            "OpenRouteService API key not set, skipping OpenRouteService providers"
        ),
    }

    // MBTA works without a key at a lower rate limit
    let mbta = MbtaClient::new(
        http,
        &providers.mbta_base_url,
        ProvidersConfig::api_key(&providers.mbta_api_key_env),
    );
    let stops: Arc<dyn StopsProvider> = Arc::new(mbta.clone());

    if route_providers.is_empty() {
        warn!("No route providers configured, live predictions will fail with no route found");
    }

    if let Some(parent) = config
        .database
        .url
        .strip_prefix("sqlite://")
        .and_then(|path| std::path::Path::new(path).parent())
    {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let trips = Arc::new(SqliteTripStore::connect(&config.database.url).await?);

    let engine = PredictionEngine::new(
        geocoders,
        route_providers,
        Some(stops.clone()),
        trips.clone(),
        &config,
    );
    info!(
        geocoders = engine.geocoder_count(),
        route_providers = engine.route_provider_count(),
        "Prediction engine ready"
    );

    let state = AppState {
        engine: Arc::new(engine),
        trips,
        stops: Some(stops),
        departures: Some(mbta),
    };

    let (router, openapi) = api::router(state);
    let app = router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server));

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!(address = %config.server.bind_address, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
