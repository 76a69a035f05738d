//! Operational HTTP endpoints: Prometheus metrics and liveness.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;

use offerpack_engine::{PlacementEngine, render_prometheus};

#[derive(Clone)]
pub struct DaemonState {
    pub engine: Arc<PlacementEngine>,
}

pub fn build_router(engine: Arc<PlacementEngine>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/healthz", get(healthz))
        .with_state(DaemonState { engine })
}

async fn prometheus_metrics(State(state): State<DaemonState>) -> impl IntoResponse {
    let body = render_prometheus(&state.engine.metrics().snapshot());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// 200 while the round loop runs, 503 otherwise.
async fn healthz(State(state): State<DaemonState>) -> impl IntoResponse {
    if state.engine.is_running() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "stopped")
    }
}
