use async_trait::async_trait;
use bigdecimal::BigDecimal;
use bip_reconcile::db::{MemoryStore, ScanStore};
use bip_reconcile::models::{DayWindow, NewScan, SaleRecord, ScanEvent, ScanStatus, SellStatus};
use bip_reconcile::service::{JobSettings, Notifier, ReconciliationJob, RunPhase, SalesFeed};
use bip_reconcile::{CollaboratorError, EngineError};
use chrono::{Duration as ChronoDuration, FixedOffset, NaiveDate};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FakeFeed {
    sales: Mutex<Vec<SaleRecord>>,
    fail: AtomicBool,
}

impl FakeFeed {
    fn new(sales: Vec<SaleRecord>) -> Arc<Self> {
        Arc::new(Self {
            sales: Mutex::new(sales),
            fail: AtomicBool::new(false),
        })
    }

    fn set_sales(&self, sales: Vec<SaleRecord>) {
        *self.sales.lock().unwrap() = sales;
    }
}

#[async_trait]
impl SalesFeed for FakeFeed {
    async fn fetch_sales(&self, _date: NaiveDate) -> Result<Vec<SaleRecord>, CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into());
        }
        Ok(self.sales.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    batches: Mutex<Vec<(NaiveDate, Vec<i64>)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    fn batches(&self) -> Vec<(NaiveDate, Vec<i64>)> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_unmatched_batch(&self, scans: &[ScanEvent], date: NaiveDate) -> Result<(), CollaboratorError> {
        assert!(!scans.is_empty(), "notifier called with an empty batch");
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Status {
                service: "webhook",
                status: reqwest::StatusCode::BAD_GATEWAY,
            });
        }
        self.batches
            .lock()
            .unwrap()
            .push((date, scans.iter().map(|s| s.id).collect()));
        Ok(())
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    feed: Arc<FakeFeed>,
    notifier: Arc<RecordingNotifier>,
    job: ReconciliationJob,
}

fn offset() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

fn harness(sales: Vec<SaleRecord>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let feed = FakeFeed::new(sales);
    let notifier = Arc::new(RecordingNotifier::default());
    let job = ReconciliationJob::new(
        store.clone(),
        store.clone(),
        feed.clone(),
        notifier.clone(),
        JobSettings {
            tolerance_cents: 3,
            offset: offset(),
            feed_timeout: Duration::from_secs(5),
            notify_timeout: Duration::from_secs(5),
        },
    );
    Harness {
        store,
        feed,
        notifier,
        job,
    }
}

fn sale(product: &str, value: &str, quantity: &str, receipt: &str) -> SaleRecord {
    SaleRecord {
        product_code: product.to_string(),
        description: "Presunto".to_string(),
        total_value: BigDecimal::from_str(value).unwrap(),
        quantity: BigDecimal::from_str(quantity).unwrap(),
        sold_at: None,
        receipt: receipt.to_string(),
        pos_code: Some(2),
        discount: BigDecimal::from(0),
        operator_code: Some(11),
        operator_name: Some("Ana".to_string()),
    }
}

async fn scan(store: &MemoryStore, product: &str, price_cents: i64, hour: i64) -> ScanEvent {
    let day = DayWindow::new(date(), offset());
    store
        .create_pending(NewScan {
            ean: format!("2{product}{price_cents:06}0"),
            product_id: product.to_string(),
            price_cents,
            weight: None,
            description: None,
            full_price_cents_kg: None,
            discount_price_cents_kg: None,
            event_date: day.start + ChronoDuration::hours(hour),
            equipment_id: Some(1),
            employee_id: None,
            store_code: Some(1),
        })
        .await
        .unwrap()
}

async fn stored(store: &MemoryStore, id: i64) -> ScanEvent {
    store.find_by_id(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn matched_scan_is_verified_and_linked() {
    let h = harness(vec![sale("04688", "19.99", "1", "A1")]);
    let bip = scan(&h.store, "04688", 2000, 9).await;

    let report = h.job.try_run(date(), true).await.unwrap().unwrap();

    let bip = stored(&h.store, bip.id).await;
    assert_eq!(bip.status, ScanStatus::Verified);
    assert_eq!(bip.receipt.as_deref(), Some("A1"));

    let sells = h.store.all_sells().await;
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].status, SellStatus::Verified);
    assert_eq!(sells[0].scan_id, Some(bip.id));
    assert_eq!(sells[0].value_cents, 1999);

    assert!(h.notifier.batches().is_empty());
    assert_eq!(report.phase, RunPhase::Done);
    assert_eq!((report.scans_verified, report.scans_unmatched), (1, 0));
}

#[tokio::test]
async fn rerun_creates_no_duplicates() {
    let h = harness(vec![sale("04688", "19.99", "1", "A1"), sale("01234", "7.50", "0.350", "A1")]);
    scan(&h.store, "04688", 2000, 9).await;

    h.job.try_run(date(), false).await.unwrap().unwrap();
    let first = h.store.all_sells().await;
    let report = h.job.try_run(date(), false).await.unwrap().unwrap();
    let second = h.store.all_sells().await;

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert_eq!(h.job.sells_of(date()).await.unwrap(), second);
    assert_eq!(report.scans_verified, 0);
}

#[tokio::test]
async fn a_sale_verifies_only_one_scan_across_runs() {
    let h = harness(vec![sale("04688", "10.00", "1", "A1")]);
    let first = scan(&h.store, "04688", 1000, 10).await;
    h.job.try_run(date(), false).await.unwrap().unwrap();

    let second = scan(&h.store, "04688", 1000, 11).await;
    let report = h.job.try_run(date(), true).await.unwrap().unwrap();

    let first = stored(&h.store, first.id).await;
    assert_eq!(first.status, ScanStatus::Verified);
    assert_eq!(first.receipt.as_deref(), Some("A1"));
    let second = stored(&h.store, second.id).await;
    assert_eq!(second.status, ScanStatus::Pending);
    assert_eq!(second.receipt, None);

    assert_eq!((report.scans_verified, report.scans_unmatched), (0, 1));
    assert_eq!(h.notifier.batches(), vec![(date(), vec![second.id])]);
    let sells = h.store.all_sells().await;
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].scan_id, Some(first.id));
}

#[tokio::test]
async fn late_match_upgrades_an_unverified_sell() {
    let h = harness(vec![sale("04688", "19.99", "1", "A1")]);
    h.job.try_run(date(), false).await.unwrap().unwrap();
    assert_eq!(h.store.all_sells().await[0].status, SellStatus::NotVerified);

    let bip = scan(&h.store, "04688", 1999, 10).await;
    h.job.try_run(date(), false).await.unwrap().unwrap();

    let sells = h.store.all_sells().await;
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].status, SellStatus::Verified);
    assert_eq!(sells[0].scan_id, Some(bip.id));
}

#[tokio::test]
async fn unmatched_scans_are_notified_once() {
    let h = harness(vec![sale("04688", "19.99", "1", "A1")]);
    let lonely = scan(&h.store, "05555", 1200, 10).await;
    let other = scan(&h.store, "06666", 800, 11).await;

    let report = h.job.try_run(date(), true).await.unwrap().unwrap();
    assert_eq!(report.scans_notified, 2);
    assert_eq!(h.notifier.batches(), vec![(date(), vec![lonely.id, other.id])]);
    assert!(stored(&h.store, lonely.id).await.notified_at.is_some());
    assert_eq!(stored(&h.store, lonely.id).await.status, ScanStatus::Pending);

    let report = h.job.try_run(date(), true).await.unwrap().unwrap();
    assert_eq!(report.scans_notified, 0);
    assert_eq!(h.notifier.batches().len(), 1);
}

#[tokio::test]
async fn incremental_runs_do_not_notify() {
    let h = harness(vec![sale("04688", "19.99", "1", "A1")]);
    let lonely = scan(&h.store, "05555", 1200, 10).await;

    let report = h.job.try_run(date(), false).await.unwrap().unwrap();
    assert_eq!(report.scans_unmatched, 1);
    assert!(h.notifier.batches().is_empty());
    assert!(stored(&h.store, lonely.id).await.notified_at.is_none());
}

#[tokio::test]
async fn failed_delivery_is_retried_on_next_run() {
    let h = harness(vec![sale("04688", "19.99", "1", "A1")]);
    let lonely = scan(&h.store, "05555", 1200, 10).await;
    h.notifier.fail.store(true, Ordering::SeqCst);

    let err = h.job.try_run(date(), true).await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::DeliveryFailed(CollaboratorError::Status { .. })));
    assert!(stored(&h.store, lonely.id).await.notified_at.is_none());
    assert_eq!(h.job.last_report().await.unwrap().phase, RunPhase::Failed);

    h.notifier.fail.store(false, Ordering::SeqCst);
    h.job.try_run(date(), true).await.unwrap().unwrap();
    assert_eq!(h.notifier.batches(), vec![(date(), vec![lonely.id])]);
    assert!(stored(&h.store, lonely.id).await.notified_at.is_some());
}

#[tokio::test]
async fn feed_failure_aborts_without_writes() {
    let h = harness(vec![sale("04688", "19.99", "1", "A1")]);
    let bip = scan(&h.store, "04688", 2000, 9).await;
    h.feed.fail.store(true, Ordering::SeqCst);

    let err = h.job.try_run(date(), true).await.unwrap().unwrap_err();

    assert!(matches!(err, EngineError::FeedUnavailable(CollaboratorError::Io(_))));
    assert!(h.store.all_sells().await.is_empty());
    assert_eq!(stored(&h.store, bip.id).await.status, ScanStatus::Pending);
    assert!(h.notifier.batches().is_empty());
}

#[tokio::test]
async fn store_failure_aborts_the_run() {
    let h = harness(vec![sale("04688", "19.99", "1", "A1")]);
    scan(&h.store, "04688", 2000, 9).await;
    h.store.set_fail_writes(true);

    let err = h.job.try_run(date(), true).await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::StoreUnavailable(_)));
    assert!(h.notifier.batches().is_empty());
}

#[tokio::test]
async fn day_without_sales_has_no_side_effects() {
    let h = harness(Vec::new());
    let bip = scan(&h.store, "05555", 1200, 10).await;

    let report = h.job.try_run(date(), true).await.unwrap().unwrap();

    assert_eq!(report.phase, RunPhase::Done);
    assert_eq!(report.total_sales, 0);
    assert_eq!(report.total_scans, 0);
    assert!(h.store.all_sells().await.is_empty());
    assert!(h.notifier.batches().is_empty());
    assert_eq!(stored(&h.store, bip.id).await, bip);
}

#[tokio::test]
async fn register_cancellation_cancels_the_scan() {
    let h = harness(vec![sale("04688", "5.00", "2", "A1"), sale("04688", "-5.00", "-2", "A1")]);
    let bip = scan(&h.store, "04688", 500, 9).await;

    let report = h.job.try_run(date(), true).await.unwrap().unwrap();

    assert_eq!(stored(&h.store, bip.id).await.status, ScanStatus::Cancelled);
    assert_eq!((report.scans_cancelled, report.scans_verified), (1, 0));
    let sells = h.store.all_sells().await;
    let cancellation = sells.iter().find(|s| s.value_cents < 0).unwrap();
    assert_eq!(cancellation.status, SellStatus::Cancelled);
    assert_eq!(cancellation.scan_id, Some(bip.id));
    assert!(h.notifier.batches().is_empty());
}

#[tokio::test]
async fn cancellation_of_a_verified_scan_is_refused_and_skipped() {
    let h = harness(vec![sale("04688", "5.00", "2", "A1")]);
    let bip = scan(&h.store, "04688", 500, 9).await;
    h.job.try_run(date(), false).await.unwrap().unwrap();
    assert_eq!(stored(&h.store, bip.id).await.status, ScanStatus::Verified);

    h.feed
        .set_sales(vec![sale("04688", "5.00", "2", "A1"), sale("04688", "-5.00", "-2", "A1")]);
    let report = h.job.try_run(date(), false).await.unwrap().unwrap();

    assert_eq!(report.phase, RunPhase::Done);
    assert_eq!(report.refused_transitions, 1);
    assert_eq!(report.scans_cancelled, 0);
    assert_eq!(stored(&h.store, bip.id).await.status, ScanStatus::Verified);
}

#[tokio::test]
async fn scans_outside_the_day_are_ignored() {
    let h = harness(vec![sale("04688", "19.99", "1", "A1")]);
    // 25h after local midnight is the next business day
    let tomorrow = scan(&h.store, "04688", 2000, 25).await;

    let report = h.job.try_run(date(), true).await.unwrap().unwrap();
    assert_eq!(report.total_scans, 0);
    assert_eq!(stored(&h.store, tomorrow.id).await.status, ScanStatus::Pending);
    assert_eq!(h.store.all_sells().await[0].status, SellStatus::NotVerified);
}
