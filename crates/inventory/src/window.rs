use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{DomainError, DomainResult};

/// Inclusive time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> DomainResult<Self> {
        if start > end {
            return Err(DomainError::validation(format!(
                "window start {start} is after window end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Whole local days from the start of `first_day` to the last instant of
    /// `last_day`, in the given UTC offset.
    pub fn local_days(first_day: NaiveDate, last_day: NaiveDate, offset: FixedOffset) -> DomainResult<Self> {
        if first_day > last_day {
            return Err(DomainError::validation(format!(
                "first day {first_day} is after last day {last_day}"
            )));
        }
        let start = local_midnight(first_day, offset)?;
        let next = last_day
            .succ_opt()
            .ok_or_else(|| DomainError::validation(format!("day out of range: {last_day}")))?;
        let end = local_midnight(next, offset)? - Duration::nanoseconds(1);
        Self::new(start, end)
    }

    /// A single local day.
    pub fn local_day(day: NaiveDate, offset: FixedOffset) -> DomainResult<Self> {
        Self::local_days(day, day, offset)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

fn local_midnight(day: NaiveDate, offset: FixedOffset) -> DomainResult<DateTime<Utc>> {
    offset
        .from_local_datetime(&day.and_time(NaiveTime::MIN))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| DomainError::validation(format!("cannot place {day} in offset {offset}")))
}
