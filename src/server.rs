//! HTTP routes for maps
//!
//! - `GET /api/v1/map` redirects to a random seed
//! - `GET /api/v1/map/:seed` color map
//! - `GET /api/v1/height/:seed` elevation map
//!
//! Maps are served as PNG unless the client asks for `application/json` or the
//! seed ends in `.json`, in which case the [`MapDocument`] is returned.
//!
//! [`MapDocument`]: crate::service::MapDocument

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::error::MapError;
use crate::raster::RenderMode;
use crate::seeds::MapSeed;
use crate::service::MapService;

/// Route-level errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Map(#[from] MapError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Map(MapError::Timeout) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            ApiError::Map(MapError::Generation(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "GENERATION_ERROR"),
            ApiError::Map(MapError::Storage(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Create the map router
pub fn create_router(service: Arc<MapService>) -> Router {
    let api_routes = Router::new()
        .route("/map", get(random_map))
        .route("/map/:seed", get(color_map))
        .route("/height/:seed", get(height_map));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn random_map() -> Response {
    let location = format!("/api/v1/map/{}", MapSeed::random());
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

async fn color_map(
    State(service): State<Arc<MapService>>,
    Path(seed): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_map(&service, seed, RenderMode::Color, &headers).await
}

async fn height_map(
    State(service): State<Arc<MapService>>,
    Path(seed): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_map(&service, seed, RenderMode::Elevation, &headers).await
}

async fn serve_map(
    service: &MapService,
    seed: String,
    mode: RenderMode,
    headers: &HeaderMap,
) -> ApiResult<Response> {
    let (seed, json_suffix) = match seed.strip_suffix(".json") {
        Some(stem) => (stem.to_string(), true),
        None => (seed, false),
    };
    if seed.is_empty() {
        return Err(ApiError::BadRequest("seed must not be empty".to_string()));
    }

    let accepts_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "application/json");

    if json_suffix || accepts_json {
        let document = service.get_map_document(&seed, mode).await?;
        return Ok(Json(document).into_response());
    }

    let png = service.get_map(&seed, mode).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CONTENT_DISPOSITION, "inline"),
        ],
        png,
    )
        .into_response())
}
