use crate::models::ScanStatus;
use serde::Serialize;
use thiserror::Error;

/// Failures raised by a scan or sell store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Scan {0} does not exist")]
    ScanNotFound(i64),
    #[error("Scan {id} is already {status}")]
    TerminalStatus { id: i64, status: ScanStatus },
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Failures of the external collaborators: sales feed, product catalog and notifier
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} answered {status}")]
    Status {
        service: &'static str,
        status: reqwest::StatusCode,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error taxonomy of the reconciliation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid code length: expected 13 digits, got {0}")]
    InvalidCodeLength(usize),
    #[error("Code {0} uses an unsupported encoding scheme")]
    UnsupportedScheme(String),
    #[error("No unit price available for product {0}")]
    PriceUnavailable(String),
    #[error("Abuse guard unavailable: {0}")]
    GuardUnavailable(StoreError),
    #[error("Sales feed unavailable: {0}")]
    FeedUnavailable(#[source] CollaboratorError),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(StoreError),
    #[error("Notification delivery failed: {0}")]
    DeliveryFailed(#[source] CollaboratorError),
    #[error("Scan {id} is {from} and cannot become {to}")]
    InvalidTransition { id: i64, from: ScanStatus, to: ScanStatus },
    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl EngineError {
    /// Short machine-readable reason for ingress callers.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::InvalidCodeLength(_) => "invalid_code",
            EngineError::UnsupportedScheme(_) => "unsupported_scheme",
            EngineError::PriceUnavailable(_) => "price_unavailable",
            EngineError::GuardUnavailable(_) => "guard_unavailable",
            EngineError::FeedUnavailable(_) => "feed_unavailable",
            EngineError::StoreUnavailable(_) => "store_unavailable",
            EngineError::DeliveryFailed(_) => "delivery_failed",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Timeout(_) => "timeout",
        }
    }

    /// Lifts a store failure on the reconciliation path, keeping transition refusals distinct.
    pub fn from_store(e: StoreError, to: ScanStatus) -> Self {
        match e {
            StoreError::TerminalStatus { id, status } => EngineError::InvalidTransition { id, from: status, to },
            other => EngineError::StoreUnavailable(other),
        }
    }
}

/// Structured rejection returned to ingress callers
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub reason: &'static str,
    pub message: String,
}

impl From<&EngineError> for Rejection {
    fn from(e: &EngineError) -> Self {
        Self {
            reason: e.reason(),
            message: e.to_string(),
        }
    }
}
