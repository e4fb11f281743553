//! Operational HTTP surface: health and metrics.
//!
//! The platform's public CRUD API lives in the main application; this
//! service only exposes what operators need to probe and scrape.

mod health;
mod metrics;

use std::time::Instant;

use axum::routing::get;
use axum::Router;

use crate::metrics::AppMetrics;

#[derive(Clone)]
pub struct ApiState {
    pub metrics: AppMetrics,
    pub started_at: Instant,
}

pub fn router(metrics: AppMetrics) -> Router {
    let state = ApiState {
        metrics,
        started_at: Instant::now(),
    };
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::metrics))
        .with_state(state)
}
