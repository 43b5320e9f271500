pub mod handlers;

pub use handlers::*;

use axum::{
    routing::{get, post},
    Router,
};

/// All HTTP routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/bips", post(receive_scan))
        .route("/api/reconcile", post(reconcile))
        .route("/api/reconcile/last", get(last_report))
        .route("/api/scans/:id/verify", post(verify_scan))
        .route("/api/sells/:date", get(list_sells))
        .with_state(state)
}
