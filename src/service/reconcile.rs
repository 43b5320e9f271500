use crate::db::{ScanStore, SellStore};
use crate::error::EngineError;
use crate::models::{DayWindow, ReconciledSale, ScanEvent, ScanTransition};
use crate::service::feed::SalesFeed;
use crate::service::matcher::{build_sells, verify_scans};
use crate::service::notifier::Notifier;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    FetchingSales,
    FetchingScans,
    Matching,
    PersistingSells,
    PersistingScanStatus,
    Notifying,
    Done,
    Failed,
}

/// Statistics of one reconciliation run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub date: NaiveDate,
    pub notify: bool,
    pub phase: RunPhase,
    pub total_sales: usize,
    pub total_scans: usize,
    pub sells_verified: usize,
    pub sells_not_verified: usize,
    pub sells_cancelled: usize,
    pub scans_verified: usize,
    pub scans_cancelled: usize,
    pub scans_unmatched: usize,
    pub scans_notified: u64,
    /// Status writes refused because the scan had already left `pending`.
    pub refused_transitions: usize,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunReport {
    fn new(date: NaiveDate, notify: bool) -> Self {
        Self {
            date,
            notify,
            phase: RunPhase::FetchingSales,
            total_sales: 0,
            total_scans: 0,
            sells_verified: 0,
            sells_not_verified: 0,
            sells_cancelled: 0,
            scans_verified: 0,
            scans_cancelled: 0,
            scans_unmatched: 0,
            scans_notified: 0,
            refused_transitions: 0,
            error: None,
            started_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        tracing::debug!(date = %self.date, ?phase, "Reconciliation phase");
        self.phase = phase;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JobSettings {
    pub tolerance_cents: i64,
    pub offset: FixedOffset,
    pub feed_timeout: Duration,
    pub notify_timeout: Duration,
}

/// Single status write path shared by the job and operator overrides.
pub async fn transition_scan(
    store: &dyn ScanStore,
    id: i64,
    transition: ScanTransition,
) -> Result<ScanEvent, EngineError> {
    let target = transition.target();
    store
        .update_status(id, &transition)
        .await
        .map_err(|e| EngineError::from_store(e, target))
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic scan/sale reconciliation.
///
/// At most one run executes per instance; a trigger arriving while a run is in flight is dropped.
pub struct ReconciliationJob {
    scans: Arc<dyn ScanStore>,
    sells: Arc<dyn SellStore>,
    feed: Arc<dyn SalesFeed>,
    notifier: Arc<dyn Notifier>,
    settings: JobSettings,
    running: AtomicBool,
    last_report: Mutex<Option<RunReport>>,
}

impl ReconciliationJob {
    pub fn new(
        scans: Arc<dyn ScanStore>,
        sells: Arc<dyn SellStore>,
        feed: Arc<dyn SalesFeed>,
        notifier: Arc<dyn Notifier>,
        settings: JobSettings,
    ) -> Self {
        Self {
            scans,
            sells,
            feed,
            notifier,
            settings,
            running: AtomicBool::new(false),
            last_report: Mutex::new(None),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.settings.offset
    }

    /// Current business date.
    pub fn today(&self) -> NaiveDate {
        DayWindow::today(self.settings.offset).date
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn last_report(&self) -> Option<RunReport> {
        self.last_report.lock().await.clone()
    }

    /// Reconciles `date`, delivering the unmatched-scan batch when `notify` is set.
    ///
    /// Returns `None` without doing anything if another run is in progress.
    pub async fn try_run(&self, date: NaiveDate, notify: bool) -> Option<Result<RunReport, EngineError>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!(%date, notify, "Reconciliation already running, trigger skipped");
            return None;
        }
        let _running = RunningGuard(&self.running);

        let started = Instant::now();
        let mut report = RunReport::new(date, notify);
        let result = self.execute(&mut report).await;
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => {
                report.enter(RunPhase::Done);
                tracing::info!(
                    date = %date,
                    sales = report.total_sales,
                    scans = report.total_scans,
                    sells_verified = report.sells_verified,
                    sells_not_verified = report.sells_not_verified,
                    sells_cancelled = report.sells_cancelled,
                    scans_verified = report.scans_verified,
                    scans_cancelled = report.scans_cancelled,
                    scans_unmatched = report.scans_unmatched,
                    scans_notified = report.scans_notified,
                    elapsed_ms = report.elapsed_ms,
                    "Reconciliation finished"
                );
            }
            Err(e) => {
                tracing::error!(date = %date, phase = ?report.phase, "Reconciliation aborted: {e}");
                report.error = Some(e.to_string());
                report.enter(RunPhase::Failed);
            }
        }

        *self.last_report.lock().await = Some(report.clone());
        Some(result.map(|()| report))
    }

    async fn execute(&self, report: &mut RunReport) -> Result<(), EngineError> {
        let day = DayWindow::new(report.date, self.settings.offset);

        // 1. Sales
        report.enter(RunPhase::FetchingSales);
        let sales = match timeout(self.settings.feed_timeout, self.feed.fetch_sales(day.date)).await {
            Ok(Ok(sales)) => sales,
            Ok(Err(e)) => return Err(EngineError::FeedUnavailable(e)),
            Err(_) => return Err(EngineError::Timeout("sales feed")),
        };
        report.total_sales = sales.len();
        if sales.is_empty() {
            tracing::info!(date = %day.date, "No sales for the day, nothing to reconcile");
            return Ok(());
        }

        // 2. Scans
        report.enter(RunPhase::FetchingScans);
        let scans = self
            .scans
            .find_by_date(&day)
            .await
            .map_err(EngineError::StoreUnavailable)?;
        report.total_scans = scans.len();

        // 3. Matching: the verification pass skips scans whose sale was cancelled at the register
        report.enter(RunPhase::Matching);
        let plan = build_sells(&scans, &sales, self.settings.tolerance_cents, day.date);
        report.sells_verified = plan.verified;
        report.sells_not_verified = plan.not_verified;
        report.sells_cancelled = plan.cancelled;

        let reverted: HashSet<i64> = plan.scans_to_cancel.iter().copied().collect();
        let candidates: Vec<ScanEvent> = scans.into_iter().filter(|s| !reverted.contains(&s.id)).collect();
        let verification = verify_scans(&candidates, &sales, self.settings.tolerance_cents);

        // 4. Sells
        report.enter(RunPhase::PersistingSells);
        if !plan.sells.is_empty() {
            self.sells
                .upsert_sells(&plan.sells)
                .await
                .map_err(EngineError::StoreUnavailable)?;
        }

        // 5. Scan status
        report.enter(RunPhase::PersistingScanStatus);
        for &id in &plan.scans_to_cancel {
            if self.apply(report, id, ScanTransition::Cancel).await? {
                report.scans_cancelled += 1;
            }
        }
        for (scan, sale) in &verification.verified {
            let transition = ScanTransition::Verify {
                receipt: Some(sale.receipt.clone()),
            };
            if self.apply(report, scan.id, transition).await? {
                report.scans_verified += 1;
            }
        }
        report.scans_unmatched = verification.unmatched.len();

        // 6. Notification
        if report.notify && !verification.unmatched.is_empty() {
            report.enter(RunPhase::Notifying);
            report.scans_notified = self.notify(&verification.unmatched, day.date).await?;
        }

        Ok(())
    }

    /// Applies one status write. A refused transition is counted and skipped, not fatal.
    async fn apply(&self, report: &mut RunReport, id: i64, transition: ScanTransition) -> Result<bool, EngineError> {
        match transition_scan(self.scans.as_ref(), id, transition).await {
            Ok(_) => Ok(true),
            Err(e @ EngineError::InvalidTransition { .. }) => {
                tracing::warn!(scan_id = id, "Status write refused: {e}");
                report.refused_transitions += 1;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn notify(&self, unmatched: &[ScanEvent], date: NaiveDate) -> Result<u64, EngineError> {
        let delivery = timeout(
            self.settings.notify_timeout,
            self.notifier.send_unmatched_batch(unmatched, date),
        )
        .await;
        match delivery {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(EngineError::DeliveryFailed(e)),
            Err(_) => return Err(EngineError::Timeout("notification delivery")),
        }

        let ids: Vec<i64> = unmatched.iter().map(|s| s.id).collect();
        let notified = self
            .scans
            .mark_notified(&ids, Utc::now())
            .await
            .map_err(EngineError::StoreUnavailable)?;
        tracing::info!(date = %date, notified, "Unmatched scans notified");
        Ok(notified)
    }

    /// Reconciled sales stored for `date`.
    pub async fn sells_of(&self, date: NaiveDate) -> Result<Vec<ReconciledSale>, EngineError> {
        self.sells.find_sells(date).await.map_err(EngineError::StoreUnavailable)
    }

    /// Operator override: verifies a pending scan by hand.
    pub async fn verify_manually(&self, id: i64, receipt: Option<String>) -> Result<ScanEvent, EngineError> {
        let scan = transition_scan(self.scans.as_ref(), id, ScanTransition::Verify { receipt }).await?;
        tracing::info!(scan_id = id, "Scan verified by operator");
        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::error::CollaboratorError;
    use crate::models::SaleRecord;
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use tokio::sync::Notify;

    /// Feed that blocks until released
    struct GatedFeed {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl SalesFeed for GatedFeed {
        async fn fetch_sales(&self, _date: NaiveDate) -> Result<Vec<SaleRecord>, CollaboratorError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Vec::new())
        }
    }

    struct StaticFeed(Vec<SaleRecord>);

    #[async_trait]
    impl SalesFeed for StaticFeed {
        async fn fetch_sales(&self, _date: NaiveDate) -> Result<Vec<SaleRecord>, CollaboratorError> {
            Ok(self.0.clone())
        }
    }

    struct NeverNotifier;

    #[async_trait]
    impl Notifier for NeverNotifier {
        async fn send_unmatched_batch(&self, _scans: &[ScanEvent], _date: NaiveDate) -> Result<(), CollaboratorError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn settings() -> JobSettings {
        JobSettings {
            tolerance_cents: 3,
            offset: FixedOffset::west_opt(3 * 3600).unwrap(),
            feed_timeout: Duration::from_secs(5),
            notify_timeout: Duration::from_millis(50),
        }
    }

    fn job(store: Arc<MemoryStore>, feed: Arc<dyn SalesFeed>) -> ReconciliationJob {
        ReconciliationJob::new(store.clone(), store, feed, Arc::new(NeverNotifier), settings())
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[tokio::test]
    async fn overlapping_trigger_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let feed = Arc::new(GatedFeed {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let job = Arc::new(job(store, feed.clone()));

        let first = tokio::spawn({
            let job = job.clone();
            async move { job.try_run(date(), false).await }
        });
        feed.entered.notified().await;
        assert!(job.is_running());
        assert!(job.try_run(date(), false).await.is_none());

        feed.release.notify_one();
        let report = first.await.unwrap().unwrap().unwrap();
        assert_eq!(report.phase, RunPhase::Done);
        assert!(!job.is_running());
        assert_eq!(job.last_report().await.map(|r| r.phase), Some(RunPhase::Done));
    }

    #[tokio::test]
    async fn delivery_timeout_fails_the_run_without_marking() {
        let store = Arc::new(MemoryStore::new());
        let sale = SaleRecord {
            product_code: "99999".into(),
            description: String::new(),
            total_value: BigDecimal::from_str("1.00").unwrap(),
            quantity: BigDecimal::from(1),
            sold_at: None,
            receipt: "Z1".into(),
            pos_code: None,
            discount: BigDecimal::from(0),
            operator_code: None,
            operator_name: None,
        };
        let day = DayWindow::new(date(), settings().offset);
        let scan = store
            .create_pending(crate::models::NewScan {
                ean: "2046880020003".into(),
                product_id: "04688".into(),
                price_cents: 2000,
                weight: None,
                description: None,
                full_price_cents_kg: None,
                discount_price_cents_kg: None,
                event_date: day.start + chrono::Duration::hours(12),
                equipment_id: None,
                employee_id: None,
                store_code: None,
            })
            .await
            .unwrap();
        let job = job(store.clone(), Arc::new(StaticFeed(vec![sale])));

        let err = job.try_run(date(), true).await.unwrap().unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
        let stored = store.find_by_id(scan.id).await.unwrap().unwrap();
        assert_eq!(stored.notified_at, None);

        let report = job.last_report().await.unwrap();
        assert_eq!(report.phase, RunPhase::Failed);
        assert_eq!(report.scans_unmatched, 1);
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn operator_cannot_verify_a_cancelled_scan() {
        let store = Arc::new(MemoryStore::new());
        let job = job(store.clone(), Arc::new(StaticFeed(Vec::new())));
        let scan = store
            .create_pending(crate::models::NewScan {
                ean: "2046880020003".into(),
                product_id: "04688".into(),
                price_cents: 2000,
                weight: None,
                description: None,
                full_price_cents_kg: None,
                discount_price_cents_kg: None,
                event_date: Utc::now(),
                equipment_id: None,
                employee_id: None,
                store_code: None,
            })
            .await
            .unwrap();
        store.update_status(scan.id, &ScanTransition::Cancel).await.unwrap();

        let err = job.verify_manually(scan.id, None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }
}
