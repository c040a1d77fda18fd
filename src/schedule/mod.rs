//! In-process daily trigger
//!
//! External cron remains the primary trigger source. When enabled, this
//! fires a scheduled request at a wall-clock time in a named timezone, and
//! relies on the gate to turn away duplicate fires.

use crate::config::{parse_fire_time, parse_timezone, ScheduleConfig};
use crate::gate::Admission;
use crate::runner::Dispatcher;
use crate::state::TriggerSource;
use crate::ConfigResult;
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;

/// Longest daylight-saving gap searched for a valid local time
const MAX_GAP_MINUTES: i64 = 180;

/// A fire time repeated every day in one timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub fire_time: NaiveTime,
    pub timezone: Tz,
}

impl DailySchedule {
    pub fn new(fire_time: NaiveTime, timezone: Tz) -> Self {
        Self {
            fire_time,
            timezone,
        }
    }

    pub fn from_config(config: &ScheduleConfig) -> ConfigResult<Self> {
        Ok(Self::new(
            parse_fire_time(&config.fire_time)?,
            parse_timezone(&config.timezone)?,
        ))
    }

    /// First fire instant strictly after `now`
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(&self.timezone).date_naive();
        today
            .iter_days()
            .take(3)
            .filter_map(|date| self.fire_on(date))
            .find(|at| *at > now)
    }

    /// Fire instant on a local date
    ///
    /// A fire time that falls in a daylight-saving gap moves to the first
    /// valid local time after it; one that occurs twice fires at the
    /// earlier instant.
    fn fire_on(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let local = date.and_time(self.fire_time);
        (0..=MAX_GAP_MINUTES).find_map(|minutes| {
            match self
                .timezone
                .from_local_datetime(&(local + Duration::minutes(minutes)))
            {
                LocalResult::Single(at) => Some(at.with_timezone(&Utc)),
                LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
                LocalResult::None => None,
            }
        })
    }
}

/// Fires a scheduled run request at every occurrence of `schedule`
pub fn spawn_daily_trigger(dispatcher: Dispatcher, schedule: DailySchedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_fire = Utc::now();
        loop {
            let now = Utc::now().max(last_fire);
            let Some(next) = schedule.next_fire_after(now) else {
                tracing::error!("No upcoming fire time for {:?}, daily trigger stopped", schedule);
                return;
            };
            tracing::info!("Next scheduled run at {}", next.to_rfc3339());

            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            last_fire = next;

            match dispatcher.trigger(TriggerSource::Scheduled) {
                Ok(Admission::Admitted(run_id)) => {
                    tracing::info!("Scheduled trigger started run {}", run_id)
                }
                Ok(Admission::Rejected { reason, detail, .. }) => {
                    tracing::info!("Scheduled trigger skipped ({}): {}", reason, detail)
                }
                Err(e) => tracing::error!("Scheduled trigger failed: {}", e),
            }
        }
    })
}
