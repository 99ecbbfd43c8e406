//! Weekly schedule coverage.
//!
//! Rules are evaluated in UTC with `day_of_week` 0 = Monday. An interval is
//! inside the schedule when every instant of it falls in the union of the
//! active windows of that instant's weekday. Intervals crossing midnight are
//! checked one calendar day at a time, so a 22:00-00:00 Monday window followed
//! by a 00:00-02:00 Tuesday window covers Monday 23:00 to Tuesday 01:00.

use chrono::{DateTime, Datelike, Days, Timelike, Utc};

use super::interval::TimeInterval;
use crate::db::models::availability_rules::{RuleWindow, SECONDS_PER_DAY};
use crate::errors::{Error, Result};

/// Reject windows with an unknown weekday or with `end <= start`.
pub fn validate_windows(windows: &[RuleWindow]) -> Result<()> {
    for (index, window) in windows.iter().enumerate() {
        if window.day_of_week > 6 {
            return Err(Error::InvalidInterval {
                message: format!("rule {index}: day_of_week {} is not in 0..=6", window.day_of_week),
            });
        }
        if window.end_secs() <= window.start_secs() {
            return Err(Error::InvalidInterval {
                message: format!("rule {index}: window end {} must be after start {}", window.end, window.start),
            });
        }
    }
    Ok(())
}

/// Whether the active windows in `rules` cover all of `interval`
pub fn covers(rules: &[RuleWindow], interval: &TimeInterval) -> bool {
    let mut cursor = interval.start();
    while cursor < interval.end() {
        let day = cursor.date_naive();
        let Some(next_midnight) = day.checked_add_days(Days::new(1)).and_then(|d| d.and_hms_opt(0, 0, 0)) else {
            return false;
        };
        let next_midnight = next_midnight.and_utc();
        let segment_end = interval.end().min(next_midnight);

        let weekday = day.weekday().num_days_from_monday() as u8;
        let from = cursor.num_seconds_from_midnight();
        let to = if segment_end == next_midnight {
            SECONDS_PER_DAY
        } else {
            seconds_ceil(segment_end)
        };

        if !day_covers(rules, weekday, from, to) {
            return false;
        }
        cursor = segment_end;
    }
    true
}

/// Seconds since midnight, rounded up so a partial second still needs covering
fn seconds_ceil(instant: DateTime<Utc>) -> u32 {
    let secs = instant.num_seconds_from_midnight();
    if instant.nanosecond() > 0 { secs + 1 } else { secs }
}

/// Sweep the weekday's active windows in start order looking for a gap in `[from, to)`
fn day_covers(rules: &[RuleWindow], weekday: u8, from: u32, to: u32) -> bool {
    let mut windows: Vec<(u32, u32)> = rules
        .iter()
        .filter(|rule| rule.active && rule.day_of_week == weekday)
        .map(|rule| (rule.start_secs(), rule.end_secs()))
        .collect();
    windows.sort_unstable();

    let mut reached = from;
    for (start, end) in windows {
        if reached >= to {
            break;
        }
        if start > reached {
            return false;
        }
        reached = reached.max(end);
    }
    reached >= to
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::utils::{at, hm};

    fn interval(start: &str, end: &str) -> TimeInterval {
        TimeInterval::new(at(start), at(end)).unwrap()
    }

    // 2024-01-01 is a Monday
    fn monday_nine_to_five() -> Vec<RuleWindow> {
        vec![RuleWindow::new(0, hm(9, 0), hm(17, 0))]
    }

    #[test]
    fn test_inside_single_window() {
        let rules = monday_nine_to_five();
        assert!(covers(&rules, &interval("2024-01-01T10:00:00Z", "2024-01-01T11:00:00Z")));
        assert!(covers(&rules, &interval("2024-01-01T09:00:00Z", "2024-01-01T17:00:00Z")));
    }

    #[test]
    fn test_outside_or_straddling_window() {
        let rules = monday_nine_to_five();
        assert!(!covers(&rules, &interval("2024-01-01T08:30:00Z", "2024-01-01T09:30:00Z")));
        assert!(!covers(&rules, &interval("2024-01-01T16:30:00Z", "2024-01-01T17:30:00Z")));
        // Sunday
        assert!(!covers(&rules, &interval("2024-01-07T10:00:00Z", "2024-01-07T11:00:00Z")));
        // Tuesday, same clock time
        assert!(!covers(&rules, &interval("2024-01-02T10:00:00Z", "2024-01-02T11:00:00Z")));
    }

    #[test]
    fn test_union_of_adjacent_and_overlapping_windows() {
        let rules = vec![
            RuleWindow::new(0, hm(9, 0), hm(12, 0)),
            RuleWindow::new(0, hm(11, 0), hm(13, 0)),
            RuleWindow::new(0, hm(13, 0), hm(15, 0)),
        ];
        assert!(covers(&rules, &interval("2024-01-01T09:00:00Z", "2024-01-01T15:00:00Z")));

        let gappy = vec![RuleWindow::new(0, hm(9, 0), hm(12, 0)), RuleWindow::new(0, hm(12, 30), hm(15, 0))];
        assert!(!covers(&gappy, &interval("2024-01-01T11:00:00Z", "2024-01-01T13:00:00Z")));
        assert!(covers(&gappy, &interval("2024-01-01T12:30:00Z", "2024-01-01T13:00:00Z")));
    }

    #[test]
    fn test_inactive_rules_are_ignored() {
        let mut rules = monday_nine_to_five();
        rules[0].active = false;
        assert!(!covers(&rules, &interval("2024-01-01T10:00:00Z", "2024-01-01T11:00:00Z")));
    }

    #[test]
    fn test_interval_across_midnight() {
        let rules = vec![RuleWindow::new(0, hm(22, 0), hm(0, 0)), RuleWindow::new(1, hm(0, 0), hm(2, 0))];
        assert!(covers(&rules, &interval("2024-01-01T23:00:00Z", "2024-01-02T01:00:00Z")));
        assert!(covers(&rules, &interval("2024-01-01T22:00:00Z", "2024-01-02T00:00:00Z")));
        assert!(!covers(&rules, &interval("2024-01-01T23:00:00Z", "2024-01-02T03:00:00Z")));

        // Without the Tuesday window the second half is uncovered
        assert!(!covers(&rules[..1], &interval("2024-01-01T23:00:00Z", "2024-01-02T01:00:00Z")));
    }

    #[test]
    fn test_sub_second_edges() {
        let rules = monday_nine_to_five();
        let end = at("2024-01-01T17:00:00Z") + chrono::Duration::milliseconds(1);
        let past_close = TimeInterval::new(at("2024-01-01T16:00:00Z"), end).unwrap();
        assert!(!covers(&rules, &past_close));

        let start = at("2024-01-01T09:00:00Z") + chrono::Duration::milliseconds(500);
        let mid_second = TimeInterval::new(start, at("2024-01-01T10:00:00Z")).unwrap();
        assert!(covers(&rules, &mid_second));
    }

    #[test]
    fn test_validate_windows() {
        assert!(validate_windows(&monday_nine_to_five()).is_ok());
        assert!(validate_windows(&[RuleWindow::new(6, hm(0, 0), hm(0, 0))]).is_ok());

        assert!(matches!(
            validate_windows(&[RuleWindow::new(7, hm(9, 0), hm(17, 0))]),
            Err(Error::InvalidInterval { .. })
        ));
        assert!(matches!(
            validate_windows(&[RuleWindow::new(0, hm(17, 0), hm(9, 0))]),
            Err(Error::InvalidInterval { .. })
        ));
        assert!(matches!(
            validate_windows(&[RuleWindow::new(0, hm(9, 0), hm(9, 0))]),
            Err(Error::InvalidInterval { .. })
        ));
    }
}
