//! HTTP surface: health check and customer search.

mod customers;
mod health;

pub use customers::CustomerQueryParams;

use crate::config::ServerConfig;
use crate::customers::CustomerSearch;
use crate::error::DataError;
use axum::{
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Shared state for the API routes
pub struct AppState {
    pub search: Arc<dyn CustomerSearch>,
}

/// Build the application router
pub fn create_app(config: &ServerConfig, search: Arc<dyn CustomerSearch>) -> Router {
    let state = Arc::new(AppState { search });

    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/customers", get(customers::search_customers))
        .with_state(state)
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
}

/// Configured origins only, or mirror the caller when none are configured.
/// Credentials are allowed either way.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid allowed origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

/// Any failure below the router surfaces as a 500 with its message.
#[derive(Debug)]
pub struct ApiError(DataError);

impl From<DataError> for ApiError {
    fn from(err: DataError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Request failed");

        let body = Json(ErrorResponse {
            message: self.0.to_string(),
        });

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
