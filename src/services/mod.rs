pub mod baseline;
pub mod blender;
pub mod departure;
pub mod engine;
pub mod features;
pub mod reconciler;

pub use engine::{PredictionEngine, PredictionRequest};

use crate::store::StoreError;

/// Failures surfaced to callers of the prediction engine.
///
/// Individual provider failures never appear here; they are logged and
/// dropped by the reconciler.
#[derive(Debug, thiserror::Error)]
pub enum PredictionError {
    #[error("Destination not found: {0}")]
    DestinationNotFound(String),
    #[error("No route found from any provider")]
    NoRouteFound,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Trip store error: {0}")]
    Store(#[from] StoreError),
}
