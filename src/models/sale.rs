use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt::Display;

/// Converts a currency amount into minor units, rounding to the nearest cent.
pub fn to_cents(value: &BigDecimal) -> i64 {
    (value * BigDecimal::from(100)).round(0).to_i64().unwrap_or(0)
}

/// Canonical text for a quantity, so `1.500` and `1.5` compare equal as keys.
pub fn quantity_key(quantity: &BigDecimal) -> String {
    let normalized = quantity.normalized();
    if normalized.is_zero() {
        "0".to_string()
    } else {
        normalized.to_string()
    }
}

/// Strips leading zeros by integer parsing. Non-numeric codes are kept as-is.
pub fn normalize_product_code(code: &str) -> String {
    let trimmed = code.trim();
    match trimmed.parse::<u64>() {
        Ok(n) => n.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// A completed sale line reported by the POS/ERP feed. Read-only input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub product_code: String,
    #[serde(default)]
    pub description: String,
    /// Signed line total in currency units; negative for cancellations and returns.
    pub total_value: BigDecimal,
    pub quantity: BigDecimal,
    #[serde(default)]
    pub sold_at: Option<NaiveDateTime>,
    pub receipt: String,
    #[serde(default)]
    pub pos_code: Option<i32>,
    #[serde(default = "BigDecimal::zero")]
    pub discount: BigDecimal,
    #[serde(default)]
    pub operator_code: Option<i32>,
    #[serde(default)]
    pub operator_name: Option<String>,
}

impl SaleRecord {
    pub fn value_cents(&self) -> i64 {
        to_cents(&self.total_value)
    }

    pub fn discount_cents(&self) -> i64 {
        to_cents(&self.discount)
    }

    pub fn is_cancellation(&self) -> bool {
        self.value_cents() < 0
    }

    pub fn normalized_code(&self) -> String {
        normalize_product_code(&self.product_code)
    }
}

/// Reconciliation outcome of a sale line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellStatus {
    Verified,
    NotVerified,
    Cancelled,
}

impl SellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SellStatus::Verified => "verified",
            SellStatus::NotVerified => "not_verified",
            SellStatus::Cancelled => "cancelled",
        }
    }
}

impl Display for SellStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idempotency key of a reconciled sale: (product id, quantity, fiscal receipt).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SellKey {
    pub product_id: String,
    pub quantity: String,
    pub receipt: String,
}

/// Durable projection of a sale line plus the scan it was matched to ("sell").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledSale {
    pub product_id: String,
    pub description: String,
    pub sell_date: NaiveDateTime,
    pub value_cents: i64,
    pub quantity: BigDecimal,
    pub scan_id: Option<i64>,
    pub receipt: String,
    pub pos_code: Option<i32>,
    pub operator_code: Option<i32>,
    pub operator_name: Option<String>,
    pub status: SellStatus,
    pub discount_cents: i64,
}

impl ReconciledSale {
    pub fn key(&self) -> SellKey {
        SellKey {
            product_id: self.product_id.clone(),
            quantity: quantity_key(&self.quantity),
            receipt: self.receipt.clone(),
        }
    }
}

/// Row shape of the `sells` table
#[derive(Debug, Clone, FromRow)]
pub struct SellRow {
    pub product_id: String,
    pub description: String,
    pub sell_date: NaiveDateTime,
    pub value_cents: i64,
    pub quantity: BigDecimal,
    pub scan_id: Option<i64>,
    pub receipt: String,
    pub pos_code: Option<i32>,
    pub operator_code: Option<i32>,
    pub operator_name: Option<String>,
    pub status: String,
    pub discount_cents: i64,
}

impl From<SellRow> for ReconciledSale {
    fn from(row: SellRow) -> Self {
        let status = match row.status.as_str() {
            "verified" => SellStatus::Verified,
            "cancelled" => SellStatus::Cancelled,
            _ => SellStatus::NotVerified,
        };
        ReconciledSale {
            product_id: row.product_id,
            description: row.description,
            sell_date: row.sell_date,
            value_cents: row.value_cents,
            quantity: row.quantity,
            scan_id: row.scan_id,
            receipt: row.receipt,
            pos_code: row.pos_code,
            operator_code: row.operator_code,
            operator_name: row.operator_name,
            status,
            discount_cents: row.discount_cents,
        }
    }
}
