use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

/// One store-local calendar day expressed as a half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayWindow {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn new(date: NaiveDate, offset: FixedOffset) -> Self {
        let local_midnight = date.and_time(NaiveTime::MIN);
        let start = (local_midnight - offset).and_utc();
        let next = date.checked_add_days(Days::new(1)).unwrap_or(date);
        let end = (next.and_time(NaiveTime::MIN) - offset).and_utc();
        Self { date, start, end }
    }

    /// The business day containing `now`.
    pub fn containing(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self::new(now.with_timezone(&offset).date_naive(), offset)
    }

    pub fn today(offset: FixedOffset) -> Self {
        Self::containing(Utc::now(), offset)
    }

    pub fn previous(&self, offset: FixedOffset) -> Self {
        let date = self.date.checked_sub_days(Days::new(1)).unwrap_or(self.date);
        Self::new(date, offset)
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts < self.end
    }
}
