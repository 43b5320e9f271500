//! Scan-to-sale matching.
//!
//! Two passes over the same inputs:
//! - [`verify_scans`] decides which open scans are backed by a sale (scan lifecycle).
//! - [`build_sells`] projects every sale of the day into a [`ReconciledSale`], correlating
//!   cancellation sales with the positive sale they revert.
//!
//! Both are pure. Sales and scans are walked in input order, the first candidate within
//! tolerance wins, and nothing is ever assigned twice.

use crate::models::{
    normalize_product_code, quantity_key, ReconciledSale, SaleRecord, ScanEvent, ScanStatus, SellKey, SellStatus,
};
use chrono::{NaiveDate, NaiveTime};
use indexmap::map::Entry;
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};

pub fn within_tolerance(scan_cents: i64, sale_cents: i64, tolerance_cents: i64) -> bool {
    (scan_cents - sale_cents).abs() <= tolerance_cents
}

/// Outcome of the verification pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationResult {
    pub verified: Vec<(ScanEvent, SaleRecord)>,
    pub unmatched: Vec<ScanEvent>,
}

/// Matches open scans (pending, never notified) against the day's sales.
///
/// Each sale backs at most one scan, across runs as well: sales already claimed by scans
/// verified earlier are consumed first, preferring the one whose receipt the scan carries.
/// Other scans that are not open are ignored.
pub fn verify_scans(scans: &[ScanEvent], sales: &[SaleRecord], tolerance_cents: i64) -> VerificationResult {
    let candidates: Vec<(String, i64, &SaleRecord)> = sales
        .iter()
        .filter(|s| !s.is_cancellation())
        .map(|s| (s.normalized_code(), s.value_cents(), s))
        .collect();
    let mut used = vec![false; candidates.len()];
    let mut result = VerificationResult::default();

    for scan in scans.iter().filter(|s| s.status == ScanStatus::Verified) {
        let product = normalize_product_code(&scan.product_id);
        let fits = |i: usize, (code, cents, _): &(String, i64, &SaleRecord)| {
            !used[i] && *code == product && within_tolerance(scan.price_cents, *cents, tolerance_cents)
        };
        let claimed = candidates
            .iter()
            .enumerate()
            .position(|(i, c)| fits(i, c) && scan.receipt.as_deref() == Some(c.2.receipt.as_str()))
            .or_else(|| candidates.iter().enumerate().position(|(i, c)| fits(i, c)));
        if let Some(i) = claimed {
            used[i] = true;
        }
    }

    for scan in scans.iter().filter(|s| s.is_open()) {
        let product = normalize_product_code(&scan.product_id);
        let hit = candidates.iter().enumerate().position(|(i, (code, cents, _))| {
            !used[i] && *code == product && within_tolerance(scan.price_cents, *cents, tolerance_cents)
        });
        match hit {
            Some(i) => {
                used[i] = true;
                result.verified.push((scan.clone(), candidates[i].2.clone()));
            }
            None => result.unmatched.push(scan.clone()),
        }
    }
    result
}

/// Sells to persist for one day plus the scans whose sale was cancelled at the register
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SellPlan {
    /// One record per [`SellKey`], in first-seen order.
    pub sells: Vec<ReconciledSale>,
    pub scans_to_cancel: Vec<i64>,
    pub verified: usize,
    pub not_verified: usize,
    pub cancelled: usize,
}

/// Correlates a cancellation with an earlier positive sale: (product, |value|, |quantity|).
type CorrelationKey = (String, i64, String);

/// Builds the reconciled-sale projection of the day.
///
/// Positive sales take the first not-yet-used scan of the same product within tolerance. A
/// cancellation sale is recorded as `cancelled`; when it reverts a positive sale seen earlier in
/// `sales` that had a scan, it carries that scan and the scan is scheduled for cancellation.
/// Cancelled scans never back a sale.
pub fn build_sells(scans: &[ScanEvent], sales: &[SaleRecord], tolerance_cents: i64, date: NaiveDate) -> SellPlan {
    let mut queues: IndexMap<String, VecDeque<&ScanEvent>> = IndexMap::new();
    for scan in scans.iter().filter(|s| s.status != ScanStatus::Cancelled) {
        queues
            .entry(normalize_product_code(&scan.product_id))
            .or_default()
            .push_back(scan);
    }

    let mut positives: HashMap<CorrelationKey, VecDeque<Option<i64>>> = HashMap::new();
    let mut plan = SellPlan::default();
    let mut records: Vec<ReconciledSale> = Vec::with_capacity(sales.len());

    for sale in sales {
        let cents = sale.value_cents();
        let key = (sale.product_code.clone(), cents.abs(), quantity_key(&sale.quantity.abs()));

        let (scan_id, status) = if sale.is_cancellation() {
            plan.cancelled += 1;
            let original = positives.get_mut(&key).and_then(VecDeque::pop_front).flatten();
            if let Some(id) = original {
                plan.scans_to_cancel.push(id);
            }
            (original, SellStatus::Cancelled)
        } else {
            let matched = queues.get_mut(&sale.normalized_code()).and_then(|queue| {
                let pos = queue
                    .iter()
                    .position(|scan| within_tolerance(scan.price_cents, cents, tolerance_cents))?;
                queue.remove(pos).map(|scan| scan.id)
            });
            if matched.is_some() {
                plan.verified += 1;
            } else {
                plan.not_verified += 1;
            }
            positives.entry(key).or_default().push_back(matched);
            let status = if matched.is_some() {
                SellStatus::Verified
            } else {
                SellStatus::NotVerified
            };
            (matched, status)
        };

        records.push(ReconciledSale {
            product_id: sale.product_code.clone(),
            description: sale.description.clone(),
            sell_date: sale.sold_at.unwrap_or_else(|| date.and_time(NaiveTime::MIN)),
            value_cents: cents,
            quantity: sale.quantity.clone(),
            scan_id,
            receipt: sale.receipt.clone(),
            pos_code: sale.pos_code,
            operator_code: sale.operator_code,
            operator_name: sale.operator_name.clone(),
            status,
            discount_cents: sale.discount_cents(),
        });
    }

    plan.sells = dedupe(records);
    plan
}

/// Keeps one record per key; a record with a matched scan replaces one without.
fn dedupe(records: Vec<ReconciledSale>) -> Vec<ReconciledSale> {
    let mut unique: IndexMap<SellKey, ReconciledSale> = IndexMap::with_capacity(records.len());
    for record in records {
        match unique.entry(record.key()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                if record.scan_id.is_some() && slot.get().scan_id.is_none() {
                    slot.insert(record);
                }
            }
        }
    }
    unique.into_values().collect()
}
