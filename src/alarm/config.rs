use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Time-of-day range the alarm may fire in. An end earlier than the start
/// means the window crosses midnight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WakeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// A wake window pinned to concrete instants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ResolvedWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

impl WakeWindow {
    pub fn validate(&self) -> Result<()> {
        if self.start == self.end {
            return Err(ValidationError::InvalidWakeWindow {
                start: self.start,
                end: self.end,
            }
            .into());
        }
        Ok(())
    }

    /// Pin the window to `date` in `tz`, rolling the end to the next day
    /// when it is earlier than the start.
    pub fn resolve(&self, date: NaiveDate, tz: Tz) -> Result<ResolvedWindow> {
        self.validate()?;

        let end_date = if self.end < self.start {
            date.succ_opt()
                .ok_or_else(|| anyhow!("no day after {date}"))?
        } else {
            date
        };

        let start = local_to_utc(date.and_time(self.start), tz)?;
        let end = local_to_utc(end_date.and_time(self.end), tz)?;
        Ok(ResolvedWindow { start, end })
    }

    /// The first resolved window that has not ended by `now`.
    pub fn next_after(&self, now: DateTime<Utc>, tz: Tz) -> Result<ResolvedWindow> {
        let today = now.with_timezone(&tz).date_naive();
        let previous = today.pred_opt().unwrap_or(today);
        // a window that crosses midnight may have started yesterday
        for date in [previous, today] {
            let window = self.resolve(date, tz)?;
            if window.end > now {
                return Ok(window);
            }
        }
        let tomorrow = today
            .succ_opt()
            .ok_or_else(|| anyhow!("no day after {today}"))?;
        self.resolve(tomorrow, tz)
    }
}

/// Ambiguous local times take the earlier instant; times skipped by a DST
/// jump move forward by the gap.
fn local_to_utc(local: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| anyhow!("local time {local} does not exist in {tz}")),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlarmConfig {
    pub id: String,
    pub window: WakeWindow,
    /// Days the alarm repeats on; empty means every day.
    #[serde(default)]
    pub days_of_week: Vec<Weekday>,
    #[serde(default)]
    pub gentle_wake: bool,
    pub enabled: bool,
}

impl AlarmConfig {
    pub fn fires_on(&self, weekday: Weekday) -> bool {
        self.days_of_week.is_empty() || self.days_of_week.contains(&weekday)
    }
}

/// Planning and prediction knobs for the smart alarm.
#[derive(Debug, Clone)]
pub struct AlarmPolicy {
    pub look_ahead_days: u32,
    /// Planned instants this far in the past are still handed out.
    pub past_tolerance: Duration,
    /// Predicted night length when no profile goal is readable.
    pub default_sleep_hours: f64,
    /// How often the foreground monitor re-checks alarms.
    pub monitor_tick: std::time::Duration,
}

impl Default for AlarmPolicy {
    fn default() -> Self {
        Self {
            look_ahead_days: 14,
            past_tolerance: Duration::minutes(1),
            default_sleep_hours: 8.0,
            monitor_tick: std::time::Duration::from_secs(5),
        }
    }
}
