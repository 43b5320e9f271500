use crate::db::store::{Admission, ScanStore, SellStore};
use crate::error::StoreError;
use crate::models::{DayWindow, NewScan, ReconciledSale, ScanEvent, ScanStatus, ScanTransition, SellKey};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::map::Entry;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    scans: Vec<ScanEvent>,
    sells: IndexMap<SellKey, ReconciledSale>,
    next_id: i64,
}

impl State {
    fn insert(&mut self, scan: NewScan, status: ScanStatus) -> ScanEvent {
        self.next_id += 1;
        let event = scan.into_event(self.next_id, status);
        self.scans.push(event.clone());
        event
    }

    fn pending_of<'a>(&'a mut self, ean: &'a str, day: &'a DayWindow) -> impl Iterator<Item = &'a mut ScanEvent> + 'a {
        self.scans
            .iter_mut()
            .filter(move |s| s.ean == ean && s.status == ScanStatus::Pending && day.contains(&s.event_date))
    }
}

/// In-process scan and sell store.
///
/// A single lock covers all data, so [`ScanStore::admit`] is trivially atomic. Failure toggles
/// let callers simulate an unavailable backend.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Inserts a scan exactly as given, bypassing every check. For seeding fixtures.
    pub async fn insert_raw(&self, scan: ScanEvent) -> ScanEvent {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(scan.id);
        state.scans.push(scan.clone());
        scan
    }

    pub async fn all_scans(&self) -> Vec<ScanEvent> {
        self.state.lock().await.scans.clone()
    }

    pub async fn all_sells(&self) -> Vec<ReconciledSale> {
        self.state.lock().await.sells.values().cloned().collect()
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn create_pending(&self, scan: NewScan) -> Result<ScanEvent, StoreError> {
        self.check_writes()?;
        Ok(self.state.lock().await.insert(scan, ScanStatus::Pending))
    }

    async fn count_pending(&self, ean: &str, day: &DayWindow) -> Result<i64, StoreError> {
        self.check_reads()?;
        let mut state = self.state.lock().await;
        Ok(state.pending_of(ean, day).count() as i64)
    }

    async fn bulk_cancel(&self, ean: &str, day: &DayWindow) -> Result<u64, StoreError> {
        self.check_writes()?;
        let mut state = self.state.lock().await;
        let mut affected = 0;
        for scan in state.pending_of(ean, day) {
            scan.status = ScanStatus::Cancelled;
            affected += 1;
        }
        Ok(affected)
    }

    async fn admit(
        &self,
        scan: NewScan,
        day: &DayWindow,
        should_cancel: &(dyn Fn(i64) -> bool + Send + Sync),
    ) -> Result<Admission, StoreError> {
        self.check_reads()?;
        self.check_writes()?;
        let mut state = self.state.lock().await;
        let ean = scan.ean.clone();
        let existing = state.pending_of(&ean, day).count() as i64;
        if should_cancel(existing) {
            let mut affected = 0;
            for pending in state.pending_of(&ean, day) {
                pending.status = ScanStatus::Cancelled;
                affected += 1;
            }
            let scan = state.insert(scan, ScanStatus::Cancelled);
            Ok(Admission::Cancelled { scan, affected })
        } else {
            Ok(Admission::Admitted(state.insert(scan, ScanStatus::Pending)))
        }
    }

    async fn find_by_date(&self, day: &DayWindow) -> Result<Vec<ScanEvent>, StoreError> {
        self.check_reads()?;
        let state = self.state.lock().await;
        let mut scans: Vec<ScanEvent> = state.scans.iter().filter(|s| day.contains(&s.event_date)).cloned().collect();
        scans.sort_by(|a, b| a.event_date.cmp(&b.event_date).then(a.id.cmp(&b.id)));
        Ok(scans)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ScanEvent>, StoreError> {
        self.check_reads()?;
        Ok(self.state.lock().await.scans.iter().find(|s| s.id == id).cloned())
    }

    async fn update_status(&self, id: i64, transition: &ScanTransition) -> Result<ScanEvent, StoreError> {
        self.check_writes()?;
        let mut state = self.state.lock().await;
        let scan = state.scans.iter_mut().find(|s| s.id == id).ok_or(StoreError::ScanNotFound(id))?;
        scan.status = scan
            .status
            .apply(transition)
            .map_err(|status| StoreError::TerminalStatus { id, status })?;
        if let Some(receipt) = transition.receipt() {
            scan.receipt = Some(receipt.to_string());
        }
        Ok(scan.clone())
    }

    async fn mark_notified(&self, ids: &[i64], at: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_writes()?;
        let mut state = self.state.lock().await;
        let mut affected = 0;
        for scan in state.scans.iter_mut().filter(|s| ids.contains(&s.id) && s.notified_at.is_none()) {
            scan.notified_at = Some(at);
            affected += 1;
        }
        Ok(affected)
    }
}

#[async_trait]
impl SellStore for MemoryStore {
    async fn upsert_sells(&self, sells: &[ReconciledSale]) -> Result<u64, StoreError> {
        self.check_writes()?;
        let mut state = self.state.lock().await;
        let mut affected = 0;
        for sell in sells {
            match state.sells.entry(sell.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(sell.clone());
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    existing.operator_code = sell.operator_code.or(existing.operator_code);
                    existing.operator_name = sell.operator_name.clone().or(existing.operator_name.take());
                    existing.pos_code = sell.pos_code.or(existing.pos_code);
                    if existing.scan_id.is_none() && sell.scan_id.is_some() {
                        existing.scan_id = sell.scan_id;
                        existing.status = sell.status;
                    }
                }
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn find_sells(&self, date: NaiveDate) -> Result<Vec<ReconciledSale>, StoreError> {
        self.check_reads()?;
        let state = self.state.lock().await;
        Ok(state.sells.values().filter(|s| s.sell_date.date() == date).cloned().collect())
    }
}
