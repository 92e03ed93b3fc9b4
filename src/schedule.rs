// Weekly activity schedules for recording and motion tracking
//
// A schedule is a 7x24 matrix indexed by local weekday (0 = Sunday) and hour.
// An empty schedule means the feature is governed manually.

use chrono::{DateTime, Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};

pub const DAYS_PER_WEEK: usize = 7;
pub const HOURS_PER_DAY: usize = 24;

/// Error type for schedule validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid {name} schedule shape: expected 7x24, found {days} day(s) with {detail}")]
    InvalidScheduleShape {
        name: String,
        days: usize,
        detail: String,
    },
}

/// Day-of-week by hour-of-day activity matrix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule(Vec<Vec<bool>>);

impl Schedule {
    /// An empty schedule (feature governed manually)
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// A 7x24 schedule with every hour set to `active`
    pub fn uniform(active: bool) -> Self {
        Self(vec![vec![active; HOURS_PER_DAY]; DAYS_PER_WEEK])
    }

    /// Wrap a raw matrix without validating it
    pub fn from_rows(rows: Vec<Vec<bool>>) -> Self {
        Self(rows)
    }

    pub fn rows(&self) -> &[Vec<bool>] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Set a single cell. Out-of-range indices are ignored.
    pub fn set(&mut self, weekday: usize, hour: usize, active: bool) {
        if let Some(cell) = self.0.get_mut(weekday).and_then(|day| day.get_mut(hour)) {
            *cell = active;
        }
    }
}

/// True iff any cell in the matrix is set. An empty schedule is never enabled.
pub fn is_schedule_enabled(schedule: &Schedule) -> bool {
    schedule.0.iter().any(|day| day.iter().any(|hour| *hour))
}

/// Validate the shape of a schedule and report whether it is enabled.
///
/// Empty schedules are accepted and report `false`. Non-empty schedules must be
/// exactly 7 rows of exactly 24 columns.
pub fn verify_schedule(name: &str, schedule: &Schedule) -> Result<bool, ScheduleError> {
    if schedule.is_empty() {
        log::warn!("[Schedule] {} schedule is empty, feature governed manually", name);
        return Ok(false);
    }

    if schedule.0.len() != DAYS_PER_WEEK {
        return Err(ScheduleError::InvalidScheduleShape {
            name: name.to_string(),
            days: schedule.0.len(),
            detail: "wrong number of days".to_string(),
        });
    }

    if let Some((day, row)) = schedule
        .0
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != HOURS_PER_DAY)
    {
        return Err(ScheduleError::InvalidScheduleShape {
            name: name.to_string(),
            days: schedule.0.len(),
            detail: format!("{} hour(s) on day {}", row.len(), day),
        });
    }

    let enabled = is_schedule_enabled(schedule);
    if enabled {
        log::info!("[Schedule] {} schedule is enabled", name);
    } else {
        log::warn!("[Schedule] {} schedule is disabled, no days/hours are active", name);
    }
    Ok(enabled)
}

/// Look up `schedule[weekday][hour]`. Empty or out-of-range lookups are false.
pub fn is_active_now(schedule: &Schedule, weekday: usize, hour: usize) -> bool {
    schedule
        .0
        .get(weekday)
        .and_then(|day| day.get(hour))
        .copied()
        .unwrap_or(false)
}

/// Weekday (0 = Sunday) and hour of a local timestamp
pub fn weekday_and_hour(now: &DateTime<Local>) -> (usize, usize) {
    (
        now.weekday().num_days_from_sunday() as usize,
        now.hour() as usize,
    )
}

/// `is_active_now` evaluated at a local timestamp
pub fn is_active_at(schedule: &Schedule, now: &DateTime<Local>) -> bool {
    let (weekday, hour) = weekday_and_hour(now);
    is_active_now(schedule, weekday, hour)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_schedule_is_valid_but_disabled() {
        let schedule = Schedule::empty();
        assert_eq!(verify_schedule("Recording", &schedule), Ok(false));
        assert!(!is_schedule_enabled(&schedule));
        assert!(!is_active_now(&schedule, 0, 0));
    }

    #[test]
    fn all_false_schedule_is_not_enabled() {
        let schedule = Schedule::uniform(false);
        assert!(!is_schedule_enabled(&schedule));
        assert_eq!(verify_schedule("Motion", &schedule), Ok(false));
    }

    #[test]
    fn single_true_cell_enables_schedule() {
        let mut schedule = Schedule::uniform(false);
        schedule.set(3, 17, true);
        assert!(is_schedule_enabled(&schedule));
        assert_eq!(verify_schedule("Motion", &schedule), Ok(true));
        assert!(is_active_now(&schedule, 3, 17));
        assert!(!is_active_now(&schedule, 3, 16));
        assert!(!is_active_now(&schedule, 4, 17));
    }

    #[test]
    fn wrong_day_count_is_rejected() {
        for days in [1usize, 6, 8] {
            let schedule = Schedule::from_rows(vec![vec![true; HOURS_PER_DAY]; days]);
            let err = verify_schedule("Recording", &schedule).unwrap_err();
            assert!(matches!(err, ScheduleError::InvalidScheduleShape { days: d, .. } if d == days));
        }
    }

    #[test]
    fn wrong_hour_count_in_any_row_is_rejected() {
        let mut rows = vec![vec![true; HOURS_PER_DAY]; DAYS_PER_WEEK];
        rows[5] = vec![true; 23];
        let schedule = Schedule::from_rows(rows);
        assert!(verify_schedule("Recording", &schedule).is_err());
    }

    #[test]
    fn out_of_range_lookup_is_inactive() {
        let schedule = Schedule::uniform(true);
        assert!(!is_active_now(&schedule, 7, 0));
        assert!(!is_active_now(&schedule, 0, 24));
    }

    #[test]
    fn local_time_maps_sunday_to_zero() {
        // 2024-01-07 was a Sunday
        let now = Local.with_ymd_and_hms(2024, 1, 7, 13, 30, 0).unwrap();
        assert_eq!(weekday_and_hour(&now), (0, 13));

        let mut schedule = Schedule::uniform(false);
        schedule.set(0, 13, true);
        assert!(is_active_at(&schedule, &now));
    }

    #[test]
    fn schedule_serializes_as_plain_matrix() {
        let schedule = Schedule::uniform(true);
        let json = serde_json::to_string(&schedule).unwrap();
        assert!(json.starts_with("[[true"));
        let back: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schedule);
    }
}
