//! Cron handling for schedule triggers.

use super::delay::resolve_timezone;
use chrono::DateTime;
use cron::Schedule;
use std::str::FromStr;

/// Occurrences inspected when catching up on missed slots.
const MAX_CATCH_UP: usize = 10_000;

/// Parse a cron expression, accepting standard 5-field expressions by prepending seconds.
pub fn parse_schedule(expression: &str) -> Result<Schedule, cron::error::Error> {
    let normalized = expression.trim();
    if normalized.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {}", normalized)).or_else(|_| Schedule::from_str(normalized))
    } else {
        Schedule::from_str(normalized)
    }
}

/// First occurrence strictly after `after_ms`, evaluated in `timezone` (UTC by default).
pub fn next_fire_after(schedule: &Schedule, timezone: Option<&str>, after_ms: i64) -> Option<i64> {
    let tz = resolve_timezone([timezone]);
    let from = DateTime::from_timestamp_millis(after_ms)?.with_timezone(&tz);
    schedule
        .after(&from)
        .next()
        .map(|next| next.timestamp_millis())
}

/// Latest occurrence in `(after_ms, now_ms]`, if any slot became due.
pub fn latest_fire_between(
    schedule: &Schedule,
    timezone: Option<&str>,
    after_ms: i64,
    now_ms: i64,
) -> Option<i64> {
    let tz = resolve_timezone([timezone]);
    let from = DateTime::from_timestamp_millis(after_ms)?.with_timezone(&tz);
    schedule
        .after(&from)
        .take(MAX_CATCH_UP)
        .map(|slot| slot.timestamp_millis())
        .take_while(|slot| *slot <= now_ms)
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ms(hour: u32, minute: u32) -> i64 {
        Utc.with_ymd_and_hms(2030, 1, 15, hour, minute, 0)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_five_field_expression() {
        let schedule = parse_schedule("0 9 * * *").unwrap();
        assert_eq!(next_fire_after(&schedule, None, ms(8, 0)), Some(ms(9, 0)));
    }

    #[test]
    fn test_invalid_expression() {
        assert!(parse_schedule("not a cron").is_err());
    }

    #[test]
    fn test_timezone_applies() {
        let schedule = parse_schedule("0 9 * * *").unwrap();
        // 09:00 in Berlin (UTC+1 in January) is 08:00 UTC
        assert_eq!(
            next_fire_after(&schedule, Some("Europe/Berlin"), ms(0, 0)),
            Some(ms(8, 0))
        );
    }

    #[test]
    fn test_latest_fire_between() {
        let schedule = parse_schedule("*/15 * * * *").unwrap();

        assert_eq!(
            latest_fire_between(&schedule, None, ms(9, 0), ms(9, 50)),
            Some(ms(9, 45))
        );
        assert_eq!(
            latest_fire_between(&schedule, None, ms(9, 0), ms(9, 10)),
            None
        );
    }
}
