use crate::db::Admission;
use crate::error::EngineError;
use crate::models::{DayWindow, NewScan, ScanEvent};
use crate::service::catalog::{ProductCatalog, ProductPricing};
use crate::service::decoder::{decode, digits_of, BadgeRecognizer, DecodedCode, Scheme};
use crate::service::guard::AbuseGuard;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One payload from a handheld scanner
#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequest {
    pub raw: String,
    #[serde(default)]
    pub equipment_id: Option<i64>,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub store_code: Option<i32>,
    /// Reading time reported by the device. Defaults to arrival time, and is replaced by it
    /// when it falls outside the current business day.
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngressOutcome {
    /// Stored as a pending scan.
    Accepted { scan: ScanEvent },
    /// The abuse threshold was reached: the scan and the day's pending scans of its EAN were cancelled.
    Cancelled { ean: String, scan_id: i64, affected: u64 },
    /// Not a product: an operator badge, to be handled by the employee login flow.
    EmployeeBadge { code: String },
}

/// Synchronous, per-event entry point for scanner payloads
pub struct ScanIngress {
    badges: BadgeRecognizer,
    guard: AbuseGuard,
    catalog: Option<Arc<dyn ProductCatalog>>,
    offset: FixedOffset,
}

impl ScanIngress {
    pub fn new(
        badges: BadgeRecognizer,
        guard: AbuseGuard,
        catalog: Option<Arc<dyn ProductCatalog>>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            badges,
            guard,
            catalog,
            offset,
        }
    }

    pub async fn receive(&self, request: ScanRequest) -> Result<IngressOutcome, EngineError> {
        // 1. Badges short-circuit before any product decoding
        let digits = digits_of(&request.raw);
        if self.badges.is_employee_badge(&digits) {
            tracing::info!(code = %digits, "Employee badge scanned");
            return Ok(IngressOutcome::EmployeeBadge { code: digits });
        }

        // 2. Decode
        let code = decode(&digits).map_err(|e| {
            tracing::info!(raw = %request.raw, "Rejected scan: {e}");
            e
        })?;

        // 3. Price. The business day is the day of arrival, whatever the device reports.
        let arrived = Utc::now();
        let day = DayWindow::containing(arrived, self.offset);
        let event_date = match request.event_date {
            Some(reported) if day.contains(&reported) => reported,
            Some(reported) => {
                tracing::warn!(raw = %request.raw, %reported, "Reported event date outside the current day, using arrival time");
                arrived
            }
            None => arrived,
        };
        let pricing = self.pricing_for(&code).await;
        let scan = price_scan(&code, pricing.as_ref(), event_date, &request)?;

        // 4. Abuse guard and store
        let outcome = match self.guard.admit(scan, &day).await? {
            Admission::Admitted(scan) => {
                tracing::info!(scan_id = scan.id, ean = %scan.ean, price_cents = scan.price_cents, "Scan accepted");
                IngressOutcome::Accepted { scan }
            }
            Admission::Cancelled { scan, affected } => IngressOutcome::Cancelled {
                ean: scan.ean,
                scan_id: scan.id,
                affected,
            },
        };
        Ok(outcome)
    }

    async fn pricing_for(&self, code: &DecodedCode) -> Option<ProductPricing> {
        let catalog = self.catalog.as_ref()?;
        match catalog.lookup(&code.product_id).await {
            Ok(Some(pricing)) => Some(pricing),
            Ok(None) => {
                tracing::warn!(plu = %code.product_id, "Product not found in catalog");
                None
            }
            Err(e) => {
                tracing::warn!(plu = %code.product_id, "Catalog lookup failed: {e}");
                None
            }
        }
    }
}

/// Builds the storable scan, deriving whichever of price and weight the code does not carry.
pub fn price_scan(
    code: &DecodedCode,
    pricing: Option<&ProductPricing>,
    event_date: DateTime<Utc>,
    request: &ScanRequest,
) -> Result<NewScan, EngineError> {
    let per_kg = pricing.map(ProductPricing::effective_price_cents_kg).filter(|p| *p > 0);

    let (price_cents, weight) = match code.scheme {
        Scheme::PriceEmbedded => {
            let price_cents = code.price_cents().unwrap_or(0);
            let weight = per_kg.map(|per_kg| (BigDecimal::from(price_cents) / BigDecimal::from(per_kg)).round(3));
            (price_cents, weight)
        }
        Scheme::WeightEmbedded => {
            let weight = code.weight().unwrap_or_default();
            let per_kg = per_kg.ok_or_else(|| EngineError::PriceUnavailable(code.product_id.clone()))?;
            let price_cents = (&weight * BigDecimal::from(per_kg))
                .round(0)
                .to_i64()
                .ok_or_else(|| EngineError::PriceUnavailable(code.product_id.clone()))?;
            (price_cents, Some(weight))
        }
        Scheme::Unknown => return Err(EngineError::UnsupportedScheme(code.ean.clone())),
    };

    Ok(NewScan {
        ean: code.ean.clone(),
        product_id: code.product_id.clone(),
        price_cents,
        weight,
        description: pricing.map(|p| p.description.clone()),
        full_price_cents_kg: pricing.map(|p| p.full_price_cents_kg),
        discount_price_cents_kg: pricing.map(|p| p.discount_price_cents_kg),
        event_date,
        equipment_id: request.equipment_id,
        employee_id: request.employee_id.clone(),
        store_code: request.store_code,
    })
}
