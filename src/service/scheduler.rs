use crate::config::ScheduleConfig;
use crate::models::DayWindow;
use crate::service::reconcile::ReconciliationJob;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// The business day whose notification pass is due at `now`, if any.
///
/// The pass covers yesterday and becomes due once local time reaches `notify_at`. A day stays
/// due until a run for it completes.
pub fn due_notify_day(
    now: DateTime<Utc>,
    offset: FixedOffset,
    notify_at: NaiveTime,
    last_done: Option<NaiveDate>,
) -> Option<NaiveDate> {
    if now.with_timezone(&offset).time() < notify_at {
        return None;
    }
    let yesterday = DayWindow::containing(now, offset).previous(offset).date;
    match last_done {
        Some(done) if done >= yesterday => None,
        _ => Some(yesterday),
    }
}

/// Incremental sync of today, without notification. Do not await the returned handle.
pub fn start_sync_worker(job: Arc<ReconciliationJob>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(every_secs = every.as_secs(), "Incremental sync worker started");
        loop {
            timer.tick().await;
            let today = job.today();
            // Failures are logged by the job; the next tick retries.
            let _ = job.try_run(today, false).await;
        }
    })
}

/// Daily notification pass for the previous business day. Do not await the returned handle.
pub fn start_daily_notify_worker(job: Arc<ReconciliationJob>, notify_at: NaiveTime, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_done: Option<NaiveDate> = None;
        tracing::info!(%notify_at, "Daily notification worker started");
        loop {
            timer.tick().await;
            let Some(day) = due_notify_day(Utc::now(), job.offset(), notify_at, last_done) else {
                continue;
            };
            match job.try_run(day, true).await {
                Some(Ok(_)) => {
                    tracing::info!(date = %day, "Daily notification pass completed");
                    last_done = Some(day);
                }
                Some(Err(_)) => tracing::warn!(date = %day, "Daily notification pass failed, will retry"),
                None => tracing::debug!(date = %day, "Daily notification pass deferred, job busy"),
            }
        }
    })
}

/// Starts both workers per the schedule configuration.
pub fn start(job: Arc<ReconciliationJob>, schedule: &ScheduleConfig) -> Vec<JoinHandle<()>> {
    if !schedule.enabled {
        tracing::info!("Scheduling disabled, reconciliation runs on demand only");
        return Vec::new();
    }

    let every = schedule.sync_interval();
    let mut handles = vec![start_sync_worker(job.clone(), every)];
    match schedule.notify_time() {
        Some(notify_at) => handles.push(start_daily_notify_worker(job, notify_at, every)),
        None => tracing::error!(
            value = %schedule.daily_notify_time,
            "Invalid daily_notify_time, expected HH:MM; daily notification disabled"
        ),
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn offset() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn may(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    #[test]
    fn not_due_before_the_configured_local_time() {
        // 10:30 UTC is 07:30 in the store
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 10, 30, 0).unwrap();
        assert_eq!(due_notify_day(now, offset(), at(8, 0), None), None);
    }

    #[test]
    fn due_for_yesterday_after_the_configured_time() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 11, 0, 0).unwrap();
        assert_eq!(due_notify_day(now, offset(), at(8, 0), None), Some(may(1)));
        assert_eq!(due_notify_day(now, offset(), at(8, 0), may(1).pred_opt()), Some(may(1)));
    }

    #[test]
    fn not_due_again_once_done() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 20, 0, 0).unwrap();
        assert_eq!(due_notify_day(now, offset(), at(8, 0), Some(may(1))), None);
    }

    #[test]
    fn local_date_decides_yesterday() {
        // 01:00 UTC on the 3rd is still the 2nd in the store
        let now = Utc.with_ymd_and_hms(2024, 5, 3, 1, 0, 0).unwrap();
        assert_eq!(due_notify_day(now, offset(), at(8, 0), None), Some(may(1)));
    }
}
