//! Five-field cron evaluation for task schedules.
//!
//! Fields are minute, hour, day-of-month, month and weekday (0 = Monday).
//! Evaluation is pure and minute-granular; `compute_next_run` scans forward
//! one minute at a time and falls back to `time + lookahead` when nothing in
//! the window matches, so a schedule that never fires cannot stall the
//! scheduler.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

pub const DEFAULT_LOOKAHEAD_MINUTES: u32 = 24 * 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 whitespace-separated fields, got {0}")]
    FieldCount(usize),
    #[error("invalid cron value '{0}'")]
    InvalidValue(String),
    #[error("step in '{0}' must be a positive integer")]
    InvalidStep(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days: Vec<u32>,
    months: Vec<u32>,
    weekdays: Vec<u32>,
}

impl std::str::FromStr for CronExpr {
    type Err = CronError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }
        Ok(CronExpr {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)?,
            days: parse_field(fields[2], 1, 31)?,
            months: parse_field(fields[3], 1, 12)?,
            weekdays: parse_field(fields[4], 0, 6)?,
        })
    }
}

impl CronExpr {
    pub fn matches(&self, dt: DateTime<Utc>) -> bool {
        self.minutes.binary_search(&dt.minute()).is_ok()
            && self.hours.binary_search(&dt.hour()).is_ok()
            && self.days.binary_search(&dt.day()).is_ok()
            && self.months.binary_search(&dt.month()).is_ok()
            && self
                .weekdays
                .binary_search(&dt.weekday().num_days_from_monday())
                .is_ok()
    }

    /// First matching minute strictly after `now`, capped at
    /// `now + lookahead_minutes`.
    pub fn next_run(&self, now: DateTime<Utc>, lookahead_minutes: u32) -> DateTime<Utc> {
        let mut check_time = now + Duration::minutes(1);
        for _ in 0..lookahead_minutes {
            if self.matches(check_time) {
                return check_time;
            }
            check_time += Duration::minutes(1);
        }
        now + Duration::minutes(i64::from(lookahead_minutes))
    }
}

/// Resolves one field into a sorted, de-duplicated value set. Out-of-range
/// values are dropped rather than rejected.
fn parse_field(value: &str, minimum: u32, maximum: u32) -> Result<Vec<u32>, CronError> {
    if value == "*" {
        return Ok((minimum..=maximum).collect());
    }

    let mut values = Vec::new();
    for part in value.split(',') {
        let part = part.trim();
        if let Some(step_s) = part.strip_prefix("*/") {
            let step: u32 = step_s
                .parse()
                .map_err(|_| CronError::InvalidStep(part.to_string()))?;
            if step == 0 {
                return Err(CronError::InvalidStep(part.to_string()));
            }
            values.extend((minimum..=maximum).step_by(step as usize));
        } else if let Some((start_s, end_s)) = part.split_once('-') {
            let start: u32 = start_s
                .parse()
                .map_err(|_| CronError::InvalidValue(part.to_string()))?;
            let end: u32 = end_s
                .parse()
                .map_err(|_| CronError::InvalidValue(part.to_string()))?;
            values.extend(start..=end);
        } else {
            values.push(
                part.parse()
                    .map_err(|_| CronError::InvalidValue(part.to_string()))?,
            );
        }
    }

    values.retain(|v| (minimum..=maximum).contains(v));
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

pub fn cron_matches(dt: DateTime<Utc>, expression: &str) -> Result<bool, CronError> {
    let expr: CronExpr = expression.parse()?;
    Ok(expr.matches(dt))
}

pub fn compute_next_run(
    now: DateTime<Utc>,
    expression: &str,
    lookahead_minutes: u32,
) -> Result<DateTime<Utc>, CronError> {
    let expr: CronExpr = expression.parse()?;
    Ok(expr.next_run(now, lookahead_minutes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn wildcard_matches_any_minute() {
        assert!(cron_matches(at(2025, 6, 2, 14, 37), "* * * * *").unwrap());
    }

    #[test]
    fn five_fields_are_required() {
        assert_eq!(
            "* * * *".parse::<CronExpr>().unwrap_err(),
            CronError::FieldCount(4)
        );
    }

    #[test]
    fn parses_steps_ranges_and_lists() {
        let expr: CronExpr = "*/15 8-10 1,15 * 0,4-5".parse().unwrap();
        // 2025-09-01 is a Monday (weekday 0).
        assert!(expr.matches(at(2025, 9, 1, 8, 0)));
        assert!(expr.matches(at(2025, 9, 1, 9, 45)));
        assert!(!expr.matches(at(2025, 9, 1, 9, 44)));
        assert!(!expr.matches(at(2025, 9, 1, 11, 0)));
        // 2025-09-02 is a Tuesday (weekday 1), not in the weekday list.
        assert!(!expr.matches(at(2025, 9, 2, 9, 0)));
    }

    #[test]
    fn weekday_zero_is_monday() {
        // 2025-06-02 is a Monday.
        assert!(cron_matches(at(2025, 6, 2, 0, 0), "0 0 * * 0").unwrap());
        assert!(!cron_matches(at(2025, 6, 3, 0, 0), "0 0 * * 0").unwrap());
    }

    #[test]
    fn out_of_range_values_are_dropped() {
        // Minute 70 is clamped away, leaving only minute 5.
        let expr: CronExpr = "5,70 * * * *".parse().unwrap();
        assert!(expr.matches(at(2025, 6, 2, 10, 5)));
        assert!(!expr.matches(at(2025, 6, 2, 10, 10)));
    }

    #[test]
    fn duplicate_values_are_deduplicated() {
        let a: CronExpr = "5,5,5 * * * *".parse().unwrap();
        let b: CronExpr = "5 * * * *".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_step_is_rejected() {
        assert_eq!(
            "*/0 * * * *".parse::<CronExpr>().unwrap_err(),
            CronError::InvalidStep("*/0".to_string())
        );
    }

    #[test]
    fn garbage_value_is_rejected() {
        assert!(matches!(
            "x * * * *".parse::<CronExpr>(),
            Err(CronError::InvalidValue(_))
        ));
    }

    #[test]
    fn next_run_is_strictly_in_the_future_and_matches() {
        let now = at(2025, 6, 2, 10, 30);
        for expression in ["* * * * *", "*/5 * * * *", "0 12 * * *", "30 10 * * *"] {
            let next = compute_next_run(now, expression, DEFAULT_LOOKAHEAD_MINUTES).unwrap();
            assert!(next > now, "{expression}");
            assert!(cron_matches(next, expression).unwrap(), "{expression}");
            assert!(next <= now + Duration::minutes(i64::from(DEFAULT_LOOKAHEAD_MINUTES)));
        }
    }

    #[test]
    fn next_run_skips_the_current_minute() {
        let now = at(2025, 6, 2, 10, 30);
        let next = compute_next_run(now, "30 10 * * *", DEFAULT_LOOKAHEAD_MINUTES).unwrap();
        assert_eq!(next, at(2025, 6, 3, 10, 30));
    }

    #[test]
    fn unmatchable_expression_falls_back_to_window_end() {
        let now = at(2025, 6, 2, 10, 0);
        // Minute 70 never matches once clamped away entirely.
        let next = compute_next_run(now, "70 * * * *", 60).unwrap();
        assert_eq!(next, now + Duration::minutes(60));
    }

    #[test]
    fn next_run_honours_small_windows() {
        let now = at(2025, 6, 2, 10, 0);
        // Next noon is beyond a 30-minute window.
        let next = compute_next_run(now, "0 12 * * *", 30).unwrap();
        assert_eq!(next, now + Duration::minutes(30));
    }
}
