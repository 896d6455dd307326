//! axum routes over a running [`DepWatch`].

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::error;

use depwatch_health::{DepWatch, EndpointStatus};

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared state for handlers.
#[derive(Clone)]
pub struct ApiState {
    pub depwatch: Arc<DepWatch>,
}

pub fn build_router(depwatch: Arc<DepWatch>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/health/details", get(health_details))
        .with_state(ApiState { depwatch })
}

pub async fn metrics(State(state): State<ApiState>) -> Response {
    match state.depwatch.render_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", METRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let status = if state.depwatch.critical_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body: BTreeMap<String, bool> = state.depwatch.health().into_iter().collect();
    (status, Json(body))
}

pub async fn health_details(State(state): State<ApiState>) -> Json<BTreeMap<String, EndpointStatus>> {
    Json(state.depwatch.health_details().into_iter().collect())
}
