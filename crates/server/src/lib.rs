//! HTTP projection of [`PlaneApi`].
//!
//! Every route is a `GET` returning pretty-printed JSON. Lists come back as `{"items": [...]}`;
//! failures as `{"error": "..."}` with a status derived from the [`PlaneError`] category.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use kplane_api::{PlaneApi, PlaneError};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

mod handlers;

pub type AppState = Arc<dyn PlaneApi>;

#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Served at `/` for anything the API routes do not match.
    pub static_dir: Option<PathBuf>,
    /// Allow any origin; for running a UI dev server against the API.
    pub cors_off: bool,
}

/// Serializes with indentation.
pub struct Pretty<T>(pub T);

impl<T: Serialize> IntoResponse for Pretty<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec_pretty(&self.0) {
            Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
            Err(e) => HttpError(PlaneError::Internal(format!("encode response: {}", e))).into_response(),
        }
    }
}

/// Kubernetes-style list document. Lists are wrapped in `{"items": [...]}` rather than sent as a
/// bare JSON array, matching the list kinds the cluster itself returns.
pub fn items(items: Vec<Value>) -> Pretty<Value> {
    Pretty(json!({ "items": items }))
}

pub struct HttpError(pub PlaneError);

impl From<PlaneError> for HttpError {
    fn from(e: PlaneError) -> Self {
        Self(e)
    }
}

pub fn status_of(e: &PlaneError) -> StatusCode {
    match e {
        PlaneError::NotFound(_) => StatusCode::NOT_FOUND,
        PlaneError::Validation(_) => StatusCode::BAD_REQUEST,
        PlaneError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        PlaneError::Fetch(_) | PlaneError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, "http: request failed");
        }
        let mut resp = Pretty(json!({ "error": self.0.message() })).into_response();
        *resp.status_mut() = status;
        resp
    }
}

pub type HttpResult<T> = Result<T, HttpError>;

pub fn router(api: AppState, options: &ServerOptions) -> Router {
    let routes = Router::new()
        .route("/status", get(handlers::status))
        .route("/api/providers", get(handlers::list_providers))
        .route("/api/providers/{name}", get(handlers::get_provider))
        .route("/api/providers/{name}/events", get(handlers::provider_events))
        .route("/api/providers/{name}/configs", get(handlers::provider_configs))
        .route("/api/providerconfigs/{group}/{version}/{kind}/{name}", get(handlers::get_provider_config))
        .route("/api/claims", get(handlers::list_claims))
        .route("/api/claims/{group}/{version}/{kind}/{namespace}/{name}", get(handlers::get_claim))
        .route("/api/managed", get(handlers::list_managed))
        .route("/api/managed/{group}/{version}/{kind}/{name}", get(handlers::get_managed))
        .route("/api/managed/{group}/{version}/{kind}/{namespace}/{name}", get(handlers::get_managed_namespaced))
        .route("/api/composite", get(handlers::list_composites))
        .route("/api/composite/{group}/{version}/{kind}/{name}", get(handlers::get_composite))
        .route("/api/composite/{group}/{version}/{kind}/{namespace}/{name}", get(handlers::get_composite_namespaced))
        .route("/api/compositions", get(handlers::list_compositions))
        .route("/api/compositions/{name}", get(handlers::get_composition))
        .route("/api/xrds", get(handlers::list_xrds))
        .route("/api/xrds/{name}", get(handlers::get_xrd))
        .route("/api/crds", get(handlers::list_managed_definitions))
        .route("/api/events/{name}", get(handlers::events))
        .route("/api/events/{namespace}/{name}", get(handlers::events_namespaced))
        .with_state(api);

    let routes = match &options.static_dir {
        Some(dir) => routes.fallback_service(ServeDir::new(dir)),
        None => routes,
    };
    let routes = routes.layer(TraceLayer::new_for_http());
    if options.cors_off {
        routes.layer(CorsLayer::permissive())
    } else {
        routes
    }
}
