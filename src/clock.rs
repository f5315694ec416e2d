//! Calendar and scheduling arithmetic in the fixed wrapped timezone.
//!
//! Every daily key (`YYYY-MM-DD`) and every generation instant is computed here,
//! so the rest of the crate never touches timezone rules directly.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// America/Los_Angeles, DST-aware.
pub const FIXED_ZONE: Tz = chrono_tz::America::Los_Angeles;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClockError {
    #[error("invalid wall-clock time {hour:02}:{minute:02}")]
    InvalidTime { hour: u32, minute: u32 },
    #[error("local time {local} cannot be resolved in zone {zone}")]
    Unresolvable { local: NaiveDateTime, zone: String },
    #[error("invalid calendar date: {0}")]
    InvalidDate(String),
}

/// Source of "now". Production code reads the system clock; tests pin an instant.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource(pub DateTime<Utc>);

impl TimeSource for FixedTimeSource {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    zone: Tz,
}

impl Default for Clock {
    fn default() -> Self {
        Self::pacific()
    }
}

impl Clock {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn pacific() -> Self {
        Self::new(FIXED_ZONE)
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.zone).date_naive()
    }

    /// Local calendar date of `instant`, formatted `YYYY-MM-DD`.
    pub fn calendar_date(&self, instant: DateTime<Utc>) -> String {
        self.local_date(instant).format(DATE_FORMAT).to_string()
    }

    /// Next local occurrence of `hour:minute` strictly after `instant`.
    ///
    /// The UTC offset is taken from the candidate instant itself, so a run
    /// scheduled across a DST switch still lands on the requested wall time.
    pub fn next_daily_run_after(
        &self,
        instant: DateTime<Utc>,
        hour: u32,
        minute: u32,
    ) -> Result<DateTime<Utc>, ClockError> {
        let wall = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or(ClockError::InvalidTime { hour, minute })?;

        let mut day = self.local_date(instant);
        // today, then tomorrow; a third day only when a gap resolution lands on `instant`
        for _ in 0..3 {
            let candidate = self.resolve_local(day.and_time(wall))?;
            if candidate > instant {
                return Ok(candidate);
            }
            day = day
                .succ_opt()
                .ok_or_else(|| ClockError::InvalidDate(day.to_string()))?;
        }

        Err(ClockError::Unresolvable {
            local: day.and_time(wall),
            zone: self.zone.name().to_string(),
        })
    }

    /// Map a local wall time to an instant. Fall-back ambiguity picks the
    /// earlier instant; a spring-forward gap moves one hour later.
    fn resolve_local(&self, local: NaiveDateTime) -> Result<DateTime<Utc>, ClockError> {
        match self.zone.from_local_datetime(&local) {
            LocalResult::Single(t) => Ok(t.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
            LocalResult::None => match self.zone.from_local_datetime(&(local + Duration::hours(1)))
            {
                LocalResult::Single(t) => Ok(t.with_timezone(&Utc)),
                LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
                LocalResult::None => Err(ClockError::Unresolvable {
                    local,
                    zone: self.zone.name().to_string(),
                }),
            },
        }
    }
}

/// Parse a `YYYY-MM-DD` calendar key.
pub fn parse_calendar_date(date: &str) -> Result<NaiveDate, ClockError> {
    NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| ClockError::InvalidDate(date.into()))
}
