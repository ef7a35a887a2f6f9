//! GB settlement periods
//!
//! Half-hourly buckets numbered from 1 at local (Europe/London) midnight.
//! Clock-change days have 46 or 50 periods.

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};
use chrono_tz::Europe::London;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SettlementPeriod {
    pub date: NaiveDate,
    pub period: u8,
}

impl SettlementPeriod {
    pub const MINUTES: i64 = 30;

    pub fn new(date: NaiveDate, period: u8) -> Self {
        Self { date, period }
    }

    /// Settlement period containing `ts`
    pub fn containing(ts: DateTime<Utc>) -> Self {
        let date = ts.with_timezone(&London).date_naive();
        let start_of_day = local_midnight_utc(date).unwrap_or(ts);
        let minutes = (ts - start_of_day).num_minutes().max(0);
        Self {
            date,
            period: (minutes / Self::MINUTES + 1) as u8,
        }
    }

    /// UTC start of this period
    pub fn start(&self) -> Option<DateTime<Utc>> {
        let midnight = local_midnight_utc(self.date)?;
        Some(midnight + TimeDelta::minutes(Self::MINUTES * (i64::from(self.period) - 1)))
    }
}

impl fmt::Display for SettlementPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} SP{:02}", self.date, self.period)
    }
}

fn local_midnight_utc(date: NaiveDate) -> Option<DateTime<Utc>> {
    London
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
