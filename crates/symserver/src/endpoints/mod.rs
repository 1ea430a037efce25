use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use serde_json::json;
use tower::ServiceBuilder;

use symserver_service::metric;

use crate::service::RequestService;

mod error;
mod metrics;
mod symbolicate;

pub use error::RequestError;
use metrics::ApiMetricsLayer;

use symbolicate::{symbolicate_v4, symbolicate_v5};

/// Liveness check: the process is up.
async fn lbheartbeat() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

/// Readiness check.
async fn heartbeat() -> Json<serde_json::Value> {
    metric!(counter("healthcheck") += 1);
    Json(json!({ "ok": true }))
}

/// Build metadata.
async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "commit": env!("SYMSERVER_GIT_VERSION"),
    }))
}

pub fn create_app(service: RequestService) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::with_transaction())
        .layer(ApiMetricsLayer)
        .layer(DefaultBodyLimit::max(5 * 1024 * 1024));

    Router::new()
        .route("/symbolicate/v4", post(symbolicate_v4))
        .route("/symbolicate/v5", post(symbolicate_v5))
        .with_state(service)
        .layer(layer)
        // the health endpoints are last, as they bypass all the middlewares
        .route("/__heartbeat__", get(heartbeat))
        .route("/__lbheartbeat__", get(lbheartbeat))
        .route("/__version__", get(version))
}
