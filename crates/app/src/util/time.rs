use chrono::{DateTime, Duration, NaiveDate, Utc};

use overuse_db::date_epoch;

/// Clock used for day-boundary detection and stats windows.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar day, truncated in UTC.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn day_start_secs(date: NaiveDate) -> i64 {
    date_epoch(date)
}

/// First day that is kept when `retention_days` days of history are retained.
pub fn retention_cutoff(today: NaiveDate, retention_days: u32) -> NaiveDate {
    today - Duration::days(i64::from(retention_days))
}
