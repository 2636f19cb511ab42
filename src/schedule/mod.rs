//! Opening-hours evaluation.
//!
//! A café publishes a weekly schedule of at most one window per weekday.
//! [`evaluate`] answers whether the café is open at a given wall-clock
//! moment and which window applies. Malformed or missing schedules never
//! fail: they evaluate to [`OpenStatus::Unknown`].

use serde::Serialize;
use time::OffsetDateTime;

pub mod ingest;

pub use ingest::{parse_opening_hours, schedule_or_unknown};

pub const MINUTES_PER_DAY: u16 = 24 * 60;
pub const ALL_DAY_LABEL: &str = "24 hours";

/// One opening window. Weekdays count from Sunday = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub weekday: u8,
    pub open_minute: u16,
    pub close_minute: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpeningSchedule {
    windows: Vec<ScheduleWindow>,
}

impl OpeningSchedule {
    /// Builds a schedule keeping the first window for each weekday.
    pub fn new(windows: impl IntoIterator<Item = ScheduleWindow>) -> Self {
        let mut kept: Vec<ScheduleWindow> = Vec::new();
        for window in windows {
            if kept.iter().all(|existing| existing.weekday != window.weekday) {
                kept.push(window);
            }
        }
        Self { windows: kept }
    }

    pub fn windows(&self) -> &[ScheduleWindow] {
        &self.windows
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Resolves the window for `weekday`. A schedule made of a single
    /// Sunday window is treated as applying to every day.
    pub fn window_for(&self, weekday: u8) -> Option<&ScheduleWindow> {
        if let Some(window) = self.windows.iter().find(|w| w.weekday == weekday) {
            return Some(window);
        }
        match self.windows.as_slice() {
            [only] if only.weekday == 0 => Some(only),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenStatus {
    Open,
    Closed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenStatusReport {
    pub status: OpenStatus,
    pub window_label: Option<String>,
}

impl OpenStatusReport {
    pub fn unknown() -> Self {
        Self {
            status: OpenStatus::Unknown,
            window_label: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == OpenStatus::Open
    }
}

pub fn evaluate(schedule: Option<&OpeningSchedule>, now: OffsetDateTime) -> OpenStatusReport {
    let Some(schedule) = schedule.filter(|s| !s.is_empty()) else {
        return OpenStatusReport::unknown();
    };

    let weekday = now.weekday().number_days_from_sunday();
    let Some(window) = schedule.window_for(weekday) else {
        return OpenStatusReport::unknown();
    };

    let open = window.open_minute;
    let Some(close) = window.close_minute else {
        if open == 0 {
            return OpenStatusReport {
                status: OpenStatus::Open,
                window_label: Some(ALL_DAY_LABEL.to_string()),
            };
        }
        return OpenStatusReport::unknown();
    };

    let now_minutes = u16::from(now.hour()) * 60 + u16::from(now.minute());
    let is_open = if close <= open {
        // window crosses midnight
        now_minutes >= open || now_minutes < close
    } else {
        open <= now_minutes && now_minutes < close
    };

    OpenStatusReport {
        status: if is_open {
            OpenStatus::Open
        } else {
            OpenStatus::Closed
        },
        window_label: Some(window_label(open, close)),
    }
}

pub fn window_label(open_minute: u16, close_minute: u16) -> String {
    format!(
        "{} ~ {}",
        format_minute_of_day(open_minute),
        format_minute_of_day(close_minute)
    )
}

fn format_minute_of_day(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    // 2026-10-16 is a Friday (weekday 5).
    const FRIDAY: u8 = 5;

    fn window(weekday: u8, open: u16, close: Option<u16>) -> ScheduleWindow {
        ScheduleWindow {
            weekday,
            open_minute: open,
            close_minute: close,
        }
    }

    #[test]
    fn missing_or_empty_schedule_is_unknown() {
        let now = datetime!(2026-10-16 12:00 UTC);

        assert_eq!(evaluate(None, now), OpenStatusReport::unknown());
        assert_eq!(
            evaluate(Some(&OpeningSchedule::default()), now),
            OpenStatusReport::unknown()
        );
    }

    #[test]
    fn midnight_crossing_window() {
        let schedule = OpeningSchedule::new([window(FRIDAY, 22 * 60, Some(6 * 60))]);

        let late = evaluate(Some(&schedule), datetime!(2026-10-16 23:00 UTC));
        let early = evaluate(Some(&schedule), datetime!(2026-10-16 02:00 UTC));
        let noon = evaluate(Some(&schedule), datetime!(2026-10-16 12:00 UTC));

        assert_eq!(late.status, OpenStatus::Open);
        assert_eq!(early.status, OpenStatus::Open);
        assert_eq!(noon.status, OpenStatus::Closed);
        assert_eq!(noon.window_label.as_deref(), Some("22:00 ~ 06:00"));
    }

    #[test]
    fn all_day_window_is_always_open() {
        let schedule = OpeningSchedule::new([window(FRIDAY, 0, None)]);

        for hour in 0..24u8 {
            let now = datetime!(2026-10-16 00:00 UTC)
                .replace_hour(hour)
                .expect("valid hour");
            let report = evaluate(Some(&schedule), now);
            assert_eq!(report.status, OpenStatus::Open);
            assert_eq!(report.window_label.as_deref(), Some(ALL_DAY_LABEL));
        }
    }

    #[test]
    fn missing_close_with_nonzero_open_is_unknown() {
        let schedule = OpeningSchedule::new([window(FRIDAY, 9 * 60, None)]);

        let report = evaluate(Some(&schedule), datetime!(2026-10-16 10:00 UTC));

        assert_eq!(report, OpenStatusReport::unknown());
    }

    #[test]
    fn regular_window_bounds_are_half_open() {
        let schedule = OpeningSchedule::new([window(FRIDAY, 9 * 60, Some(18 * 60))]);

        let at_open = evaluate(Some(&schedule), datetime!(2026-10-16 09:00 UTC));
        let at_close = evaluate(Some(&schedule), datetime!(2026-10-16 18:00 UTC));

        assert_eq!(at_open.status, OpenStatus::Open);
        assert_eq!(at_open.window_label.as_deref(), Some("09:00 ~ 18:00"));
        assert_eq!(at_close.status, OpenStatus::Closed);
    }

    #[test]
    fn single_sunday_window_applies_to_every_day() {
        let schedule = OpeningSchedule::new([window(0, 8 * 60, Some(20 * 60))]);

        let report = evaluate(Some(&schedule), datetime!(2026-10-16 10:30 UTC));

        assert_eq!(report.status, OpenStatus::Open);
    }

    #[test]
    fn other_day_without_window_is_unknown() {
        let schedule = OpeningSchedule::new([
            window(1, 8 * 60, Some(20 * 60)),
            window(2, 8 * 60, Some(20 * 60)),
        ]);

        let report = evaluate(Some(&schedule), datetime!(2026-10-16 10:30 UTC));

        assert_eq!(report, OpenStatusReport::unknown());
    }

    #[test]
    fn duplicate_weekday_keeps_first_window() {
        let schedule = OpeningSchedule::new([
            window(FRIDAY, 9 * 60, Some(10 * 60)),
            window(FRIDAY, 0, None),
        ]);

        assert_eq!(schedule.windows().len(), 1);
        let report = evaluate(Some(&schedule), datetime!(2026-10-16 12:00 UTC));
        assert_eq!(report.status, OpenStatus::Closed);
    }
}
