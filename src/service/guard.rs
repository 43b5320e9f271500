use crate::db::{Admission, ScanStore};
use crate::error::EngineError;
use crate::models::{DayWindow, NewScan};
use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// True when storing one more pending scan would bring the EAN's daily count to the threshold.
pub fn threshold_reached(existing_pending: i64, threshold: u32) -> bool {
    existing_pending + 1 >= i64::from(threshold)
}

/// Stops a single EAN from being scanned without limit while no sale shows up for it.
pub struct AbuseGuard {
    store: Arc<dyn ScanStore>,
    threshold: u32,
    locks: DashMap<(String, NaiveDate), Arc<Mutex<()>>>,
}

impl AbuseGuard {
    pub fn new(store: Arc<dyn ScanStore>, threshold: u32) -> Self {
        Self {
            store,
            threshold,
            locks: DashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Stores `scan`, cancelling the whole day's pending scans of its EAN once the threshold is hit.
    ///
    /// Fails closed: any storage error is reported as `GuardUnavailable` and nothing is accepted.
    pub async fn admit(&self, scan: NewScan, day: &DayWindow) -> Result<Admission, EngineError> {
        let ean = scan.ean.clone();
        let lock = self.lock_for(&ean, day.date);
        let _held = lock.lock().await;

        let threshold = self.threshold;
        let should_cancel = move |existing: i64| threshold_reached(existing, threshold);

        let admission = self
            .store
            .admit(scan, day, &should_cancel)
            .await
            .map_err(EngineError::GuardUnavailable)?;

        match &admission {
            Admission::Admitted(scan) => {
                tracing::debug!(ean = %ean, scan_id = scan.id, "EAN within daily limit");
            }
            Admission::Cancelled { scan, affected } => {
                tracing::warn!(
                    ean = %ean,
                    scan_id = scan.id,
                    affected,
                    threshold,
                    "Abuse threshold reached, pending scans of the day cancelled"
                );
            }
        }
        Ok(admission)
    }

    /// In-process lock per (EAN, day). The store's own atomic admit covers other processes.
    fn lock_for(&self, ean: &str, date: NaiveDate) -> Arc<Mutex<()>> {
        let key = (ean.to_string(), date);
        let existing = self.locks.get(&key).map(|lock| lock.clone());
        if let Some(lock) = existing {
            return lock;
        }
        self.locks.retain(|(_, day), _| *day >= date);
        self.locks.entry(key).or_default().clone()
    }
}
