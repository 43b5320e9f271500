use crate::error::{EngineError, Rejection, StoreError};
use crate::service::{IngressOutcome, ReconciliationJob, RunReport, ScanIngress, ScanRequest};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<ScanIngress>,
    pub job: Arc<ReconciliationJob>,
}

/// Failure body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    #[serde(flatten)]
    pub rejection: Rejection,
}

/// Scan ingress response
#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(flatten)]
    pub outcome: IngressOutcome,
}

/// Request body: reconcile a day, optionally sending the unmatched batch
#[derive(Debug, Default, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub notify: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub success: bool,
    pub report: RunReport,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub receipt: Option<String>,
}

fn status_of(e: &EngineError) -> StatusCode {
    match e {
        EngineError::InvalidCodeLength(_) | EngineError::UnsupportedScheme(_) => StatusCode::BAD_REQUEST,
        EngineError::PriceUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
        EngineError::StoreUnavailable(StoreError::ScanNotFound(_)) => StatusCode::NOT_FOUND,
        EngineError::GuardUnavailable(_) | EngineError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::FeedUnavailable(_) | EngineError::DeliveryFailed(_) => StatusCode::BAD_GATEWAY,
        EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn error_response(e: &EngineError) -> Response {
    let body = ErrorResponse {
        success: false,
        rejection: Rejection::from(e),
    };
    (status_of(e), Json(body)).into_response()
}

/// Health check
pub async fn health_check() -> &'static str {
    "OK"
}

/// Scanner payload ingress
pub async fn receive_scan(State(state): State<AppState>, Json(req): Json<ScanRequest>) -> Response {
    match state.ingress.receive(req).await {
        Ok(outcome @ IngressOutcome::Cancelled { .. }) => {
            let body = ScanResponse {
                success: false,
                reason: Some("abuse_threshold"),
                outcome,
            };
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
        Ok(outcome) => {
            let body = ScanResponse {
                success: true,
                reason: None,
                outcome,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// On-demand reconciliation, also used for backfill
pub async fn reconcile(State(state): State<AppState>, body: Option<Json<ReconcileRequest>>) -> Response {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let date = req.date.unwrap_or_else(|| state.job.today());

    match state.job.try_run(date, req.notify.unwrap_or(false)).await {
        Some(Ok(report)) => (StatusCode::OK, Json(ReconcileResponse { success: true, report })).into_response(),
        Some(Err(e)) => error_response(&e),
        None => {
            let body = ErrorResponse {
                success: false,
                rejection: Rejection {
                    reason: "already_running",
                    message: "A reconciliation run is already in progress".to_string(),
                },
            };
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
    }
}

/// Report of the most recent run
pub async fn last_report(State(state): State<AppState>) -> Response {
    match state.job.last_report().await {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// Reconciled sales of a day
pub async fn list_sells(State(state): State<AppState>, Path(date): Path<NaiveDate>) -> Response {
    match state.job.sells_of(date).await {
        Ok(sells) => (StatusCode::OK, Json(sells)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Operator override
pub async fn verify_scan(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<VerifyRequest>>,
) -> Response {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    match state.job.verify_manually(id, req.receipt).await {
        Ok(scan) => (StatusCode::OK, Json(scan)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses() {
        assert_eq!(status_of(&EngineError::InvalidCodeLength(4)), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(&EngineError::StoreUnavailable(StoreError::ScanNotFound(1))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(&EngineError::GuardUnavailable(StoreError::CorruptRow("x".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn error_body_is_flat() {
        let body = ErrorResponse {
            success: false,
            rejection: Rejection::from(&EngineError::InvalidCodeLength(12)),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["reason"], "invalid_code");
    }
}
