//! HTTP surface of the livetail server.

mod health;
mod ingest;
mod stream;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use livetail_core::config::StreamConfig;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::storage::StreamDatabase;

pub use health::HealthResponse;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: StreamDatabase,
    /// Shared secret required on every write route.
    pub secret: Arc<str>,
    pub stream: StreamConfig,
    /// Sessions kept when a new one starts.
    pub retention: u32,
    /// Cancelled on server shutdown; ends every open stream.
    pub shutdown: CancellationToken,
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/session", post(ingest::session))
        .route("/push", post(ingest::push))
        .route("/countdown", post(ingest::countdown))
        .route("/stream", get(stream::stream).layer(CorsLayer::permissive()))
        .route("/health", get(health::health))
        .with_state(state)
}
