//! Storage contracts of the engine.
//!
//! Both the ingress path and the reconciliation job go through these traits. Every write to
//! `ScanEvent.status` goes through [`ScanStore::update_status`], [`ScanStore::bulk_cancel`] or
//! [`ScanStore::admit`], and all three only ever touch rows that are still `pending`.

use crate::error::StoreError;
use crate::models::{DayWindow, NewScan, ReconciledSale, ScanEvent, ScanTransition};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Result of the atomic abuse check performed while storing a new scan.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Below threshold: the scan was stored as `pending`.
    Admitted(ScanEvent),
    /// Threshold reached: `affected` earlier pending scans were cancelled, and the incoming scan
    /// was stored already `cancelled`.
    Cancelled { scan: ScanEvent, affected: u64 },
}

#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Stores a new `pending` scan without any abuse check.
    async fn create_pending(&self, scan: NewScan) -> Result<ScanEvent, StoreError>;

    /// Counts `pending` scans of `ean` inside the day window.
    async fn count_pending(&self, ean: &str, day: &DayWindow) -> Result<i64, StoreError>;

    /// Cancels every `pending` scan of `ean` inside the day window. Returns the number cancelled.
    async fn bulk_cancel(&self, ean: &str, day: &DayWindow) -> Result<u64, StoreError>;

    /// Counts, decides and writes as one atomic unit, serialised per `(ean, day)`.
    ///
    /// `should_cancel` receives the number of pending scans already stored for the EAN that day.
    /// When it returns true, those scans are cancelled and the incoming one is stored `cancelled`;
    /// otherwise the incoming one is stored `pending`.
    async fn admit(
        &self,
        scan: NewScan,
        day: &DayWindow,
        should_cancel: &(dyn Fn(i64) -> bool + Send + Sync),
    ) -> Result<Admission, StoreError>;

    /// All scans of the day, in event order.
    async fn find_by_date(&self, day: &DayWindow) -> Result<Vec<ScanEvent>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<ScanEvent>, StoreError>;

    /// Moves one `pending` scan to the transition's target status.
    ///
    /// Fails with [`StoreError::TerminalStatus`] if the scan has already left `pending`; the
    /// stored status is left untouched in that case.
    async fn update_status(&self, id: i64, transition: &ScanTransition) -> Result<ScanEvent, StoreError>;

    /// Stamps `notified_at` on every listed scan that has not been notified yet, in one write.
    async fn mark_notified(&self, ids: &[i64], at: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait SellStore: Send + Sync {
    /// Inserts reconciled sales keyed by `(product_id, quantity, receipt)`.
    ///
    /// On conflict the existing row is kept, except that a row without a matched scan adopts the
    /// incoming scan reference and status. Null operator / point-of-sale fields never overwrite
    /// known values. Callers pass at most one record per key.
    async fn upsert_sells(&self, sells: &[ReconciledSale]) -> Result<u64, StoreError>;

    /// Reconciled sales whose sale date falls on `date`.
    async fn find_sells(&self, date: NaiveDate) -> Result<Vec<ReconciledSale>, StoreError>;
}
