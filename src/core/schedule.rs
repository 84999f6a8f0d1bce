//! Counter reset schedules.
//!
//! Deciding whether a reset boundary was crossed is delegated to a
//! [`ScheduleWindow`]; [`CalendarWindow`] is the calendar-based
//! implementation used by the service.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// How often a filter's counters are reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetSchedule {
    #[default]
    Never,
    Daily,
    Weekly,
    Monthly,
}

/// Decides whether a reset boundary lies between two points in time
#[cfg_attr(test, mockall::automock)]
pub trait ScheduleWindow {
    fn boundary_crossed(
        &self,
        schedule: ResetSchedule,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool;
}

/// Calendar boundaries: midnight, ISO week start and first day of month
#[derive(Debug, Clone, Copy, Default)]
pub struct CalendarWindow;

impl ScheduleWindow for CalendarWindow {
    fn boundary_crossed(
        &self,
        schedule: ResetSchedule,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if now <= since {
            return false;
        }

        match schedule {
            ResetSchedule::Never => false,
            ResetSchedule::Daily => since.date_naive() != now.date_naive(),
            ResetSchedule::Weekly => since.iso_week() != now.iso_week(),
            ResetSchedule::Monthly => (since.year(), since.month()) != (now.year(), now.month()),
        }
    }
}
