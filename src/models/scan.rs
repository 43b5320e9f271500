use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle status of a scan event. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Verified,
    Cancelled,
}

#[derive(Debug, Clone, Error)]
#[error("Unknown scan status: {0}")]
pub struct UnknownScanStatus(pub String);

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Verified => "verified",
            ScanStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanStatus::Pending)
    }

    /// Applies a transition, returning the resulting status.
    ///
    /// Only `Pending` scans may move. Any transition out of a terminal state is refused.
    pub fn apply(self, transition: &ScanTransition) -> Result<ScanStatus, ScanStatus> {
        if self.is_terminal() {
            return Err(self);
        }
        Ok(transition.target())
    }
}

impl Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = UnknownScanStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "verified" => Ok(ScanStatus::Verified),
            "cancelled" => Ok(ScanStatus::Cancelled),
            other => Err(UnknownScanStatus(other.to_string())),
        }
    }
}

/// The only status writes the engine performs on a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTransition {
    /// Matched to a sale. Carries the fiscal receipt of that sale, when known.
    Verify { receipt: Option<String> },
    Cancel,
}

impl ScanTransition {
    pub fn target(&self) -> ScanStatus {
        match self {
            ScanTransition::Verify { .. } => ScanStatus::Verified,
            ScanTransition::Cancel => ScanStatus::Cancelled,
        }
    }

    pub fn receipt(&self) -> Option<&str> {
        match self {
            ScanTransition::Verify { receipt } => receipt.as_deref(),
            ScanTransition::Cancel => None,
        }
    }
}

/// A single scanner reading ("bip").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub id: i64,
    pub ean: String,
    pub product_id: String,
    pub price_cents: i64,
    pub weight: Option<BigDecimal>,
    pub description: Option<String>,
    pub full_price_cents_kg: Option<i64>,
    pub discount_price_cents_kg: Option<i64>,
    pub event_date: DateTime<Utc>,
    pub equipment_id: Option<i64>,
    pub employee_id: Option<String>,
    pub receipt: Option<String>,
    pub store_code: Option<i32>,
    pub status: ScanStatus,
    pub notified_at: Option<DateTime<Utc>>,
}

impl ScanEvent {
    /// Pending and never included in an unmatched-scan notification.
    pub fn is_open(&self) -> bool {
        self.status == ScanStatus::Pending && self.notified_at.is_none()
    }
}

/// A decoded, priced scan that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScan {
    pub ean: String,
    pub product_id: String,
    pub price_cents: i64,
    pub weight: Option<BigDecimal>,
    pub description: Option<String>,
    pub full_price_cents_kg: Option<i64>,
    pub discount_price_cents_kg: Option<i64>,
    pub event_date: DateTime<Utc>,
    pub equipment_id: Option<i64>,
    pub employee_id: Option<String>,
    pub store_code: Option<i32>,
}

impl NewScan {
    pub fn into_event(self, id: i64, status: ScanStatus) -> ScanEvent {
        ScanEvent {
            id,
            ean: self.ean,
            product_id: self.product_id,
            price_cents: self.price_cents,
            weight: self.weight,
            description: self.description,
            full_price_cents_kg: self.full_price_cents_kg,
            discount_price_cents_kg: self.discount_price_cents_kg,
            event_date: self.event_date,
            equipment_id: self.equipment_id,
            employee_id: self.employee_id,
            receipt: None,
            store_code: self.store_code,
            status,
            notified_at: None,
        }
    }
}

/// Row shape of the `bips` table
#[derive(Debug, Clone, FromRow)]
pub struct ScanRow {
    pub id: i64,
    pub ean: String,
    pub product_id: String,
    pub price_cents: i64,
    pub weight: Option<BigDecimal>,
    pub description: Option<String>,
    pub full_price_cents_kg: Option<i64>,
    pub discount_price_cents_kg: Option<i64>,
    pub event_date: DateTime<Utc>,
    pub equipment_id: Option<i64>,
    pub employee_id: Option<String>,
    pub receipt: Option<String>,
    pub store_code: Option<i32>,
    pub status: String,
    pub notified_at: Option<DateTime<Utc>>,
}

impl TryFrom<ScanRow> for ScanEvent {
    type Error = UnknownScanStatus;

    fn try_from(row: ScanRow) -> Result<Self, Self::Error> {
        Ok(ScanEvent {
            status: row.status.parse()?,
            id: row.id,
            ean: row.ean,
            product_id: row.product_id,
            price_cents: row.price_cents,
            weight: row.weight,
            description: row.description,
            full_price_cents_kg: row.full_price_cents_kg,
            discount_price_cents_kg: row.discount_price_cents_kg,
            event_date: row.event_date,
            equipment_id: row.equipment_id,
            employee_id: row.employee_id,
            receipt: row.receipt,
            store_code: row.store_code,
            notified_at: row.notified_at,
        })
    }
}
