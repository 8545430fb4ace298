//! Wake-time computation for delay nodes.
//!
//! Delays never hold a timer: they resolve to a timestamp stored on the
//! enrollment, re-checked by later scheduler passes.

use crate::models::{DelayConfig, UserProfile};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Weekday};
use chrono_tz::Tz;
use nurture_storage::time_utils::{HOUR_MS, minutes_to_ms};
use serde_json::Value;
use tracing::warn;

/// Days searched ahead for a matching weekday before giving up.
const SEARCH_DAYS: u32 = 8;

/// What a delay node waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayPlan {
    WakeAt(i64),
    AwaitEvent { timeout_at: Option<i64> },
}

/// Inputs a delay may depend on besides its own config.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayContext<'a> {
    pub user: Option<&'a UserProfile>,
    pub flow_timezone: Option<&'a str>,
}

/// Resolve the wait of a delay node first reached at `started_at`.
pub fn plan_delay(config: &DelayConfig, started_at: i64, ctx: &DelayContext<'_>) -> DelayPlan {
    match config {
        DelayConfig::FixedDuration { duration_minutes } => {
            DelayPlan::WakeAt(started_at.saturating_add(minutes_to_ms(*duration_minutes)))
        }
        DelayConfig::UntilEvent {
            timeout_minutes, ..
        } => DelayPlan::AwaitEvent {
            timeout_at: timeout_minutes.map(|minutes| started_at.saturating_add(minutes_to_ms(minutes))),
        },
        DelayConfig::UntilDate {
            until_date,
            date_property,
        } => {
            let from_config = until_date.as_deref().and_then(parse_date_string);
            let from_profile = || {
                let property = date_property.as_deref()?;
                let value = ctx.user?.properties.get(property)?;
                parse_timestamp(value)
            };
            match from_config.or_else(from_profile) {
                Some(at) => DelayPlan::WakeAt(at),
                None => {
                    warn!(?date_property, "Delay date could not be resolved, continuing immediately");
                    DelayPlan::WakeAt(started_at)
                }
            }
        }
        DelayConfig::UntilTimeOfDay {
            time_of_day,
            timezone,
            days_of_week,
        } => {
            let tz = resolve_timezone([timezone.as_deref(), ctx.flow_timezone]);
            let Some(time) = parse_time_of_day(time_of_day) else {
                warn!(time_of_day = %time_of_day, "Invalid time of day, continuing immediately");
                return DelayPlan::WakeAt(started_at);
            };
            let days: Vec<Weekday> = days_of_week.iter().filter_map(|d| parse_weekday(d)).collect();
            DelayPlan::WakeAt(next_time_of_day(started_at, time, &days, tz))
        }
        DelayConfig::SmartSendTime {
            window_start_hour,
            window_end_hour,
            timezone,
            preferred_hour_property,
        } => {
            let user_timezone = ctx.user.and_then(UserProfile::timezone);
            let tz = resolve_timezone([user_timezone, timezone.as_deref(), ctx.flow_timezone]);
            let preferred = preferred_hour_property.as_deref().and_then(|property| {
                let value = ctx.user?.properties.get(property)?;
                value
                    .as_u64()
                    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                    .and_then(|hour| u32::try_from(hour).ok())
            });
            DelayPlan::WakeAt(next_send_window(
                started_at,
                *window_start_hour,
                *window_end_hour,
                preferred,
                tz,
            ))
        }
    }
}

/// First zone in precedence order that parses, else UTC.
pub fn resolve_timezone<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Tz {
    candidates
        .into_iter()
        .flatten()
        .find_map(parse_timezone)
        .unwrap_or(Tz::UTC)
}

pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.trim().parse::<Tz>().ok()
}

/// `HH:MM` wall-clock time.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// Accepts `mon`, `Monday`, `TUE`, ...
pub fn parse_weekday(value: &str) -> Option<Weekday> {
    value.trim().parse::<Weekday>().ok()
}

/// Millisecond timestamp from a JSON number, an RFC 3339 string or a `YYYY-MM-DD` date.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => parse_date_string(text),
        _ => None,
    }
}

pub fn parse_date_string(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.timestamp_millis());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc().timestamp_millis())
}

/// Next instant at or after `from_ms` whose local time in `tz` is `time`,
/// restricted to `days` when non-empty.
pub fn next_time_of_day(from_ms: i64, time: NaiveTime, days: &[Weekday], tz: Tz) -> i64 {
    let Some(from) = DateTime::from_timestamp_millis(from_ms) else {
        return from_ms;
    };
    let mut date = from.with_timezone(&tz).date_naive();

    for _ in 0..SEARCH_DAYS {
        if days.is_empty() || days.contains(&date.weekday()) {
            if let Some(candidate) = localize(tz, date.and_time(time)) {
                if candidate >= from_ms {
                    return candidate;
                }
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    from_ms
}

/// Next instant inside the local `[start_hour, end_hour)` window, preferring
/// `preferred_hour` when it falls inside the window.
pub fn next_send_window(
    from_ms: i64,
    start_hour: u32,
    end_hour: u32,
    preferred_hour: Option<u32>,
    tz: Tz,
) -> i64 {
    let end_hour = end_hour.min(24);
    if start_hour >= end_hour {
        return from_ms;
    }
    let Some(from) = DateTime::from_timestamp_millis(from_ms) else {
        return from_ms;
    };
    let local_hour = from.with_timezone(&tz).hour();

    if let Some(hour) = preferred_hour.filter(|h| (start_hour..end_hour).contains(h)) {
        if local_hour == hour {
            return from_ms;
        }
        return match NaiveTime::from_hms_opt(hour, 0, 0) {
            Some(time) => next_time_of_day(from_ms, time, &[], tz),
            None => from_ms,
        };
    }

    if (start_hour..end_hour).contains(&local_hour) {
        return from_ms;
    }
    match NaiveTime::from_hms_opt(start_hour, 0, 0) {
        Some(time) => next_time_of_day(from_ms, time, &[], tz),
        None => from_ms,
    }
}

/// Local wall time to a UTC timestamp. Times skipped by a DST jump move forward an hour.
fn localize(tz: Tz, naive: NaiveDateTime) -> Option<i64> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            let shifted = naive + chrono::Duration::milliseconds(HOUR_MS);
            tz.from_local_datetime(&shifted).earliest()
        })
        .map(|datetime| datetime.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn ms(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> i64 {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_fixed_duration() {
        let plan = plan_delay(
            &DelayConfig::FixedDuration {
                duration_minutes: 1440,
            },
            1_000,
            &DelayContext::default(),
        );
        assert_eq!(plan, DelayPlan::WakeAt(1_000 + 86_400_000));
    }

    #[test]
    fn test_until_event_timeout() {
        let plan = plan_delay(
            &DelayConfig::UntilEvent {
                wait_for_event: "purchase".to_string(),
                timeout_minutes: Some(30),
            },
            0,
            &DelayContext::default(),
        );
        assert_eq!(
            plan,
            DelayPlan::AwaitEvent {
                timeout_at: Some(1_800_000)
            }
        );
    }

    #[test]
    fn test_until_date_from_profile() {
        let mut user = UserProfile::new("u1");
        user.properties
            .insert("renewal".to_string(), json!("2030-01-15"));
        let ctx = DelayContext {
            user: Some(&user),
            flow_timezone: None,
        };

        let plan = plan_delay(
            &DelayConfig::UntilDate {
                until_date: None,
                date_property: Some("renewal".to_string()),
            },
            0,
            &ctx,
        );
        assert_eq!(plan, DelayPlan::WakeAt(ms(2030, 1, 15, 0, 0)));
    }

    #[test]
    fn test_time_of_day_today_or_tomorrow() {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

        let early = ms(2030, 1, 15, 7, 30);
        assert_eq!(next_time_of_day(early, nine, &[], Tz::UTC), ms(2030, 1, 15, 9, 0));

        let late = ms(2030, 1, 15, 10, 0);
        assert_eq!(next_time_of_day(late, nine, &[], Tz::UTC), ms(2030, 1, 16, 9, 0));
    }

    #[test]
    fn test_time_of_day_respects_weekdays_and_zone() {
        // 2030-01-15 is a Tuesday
        let from = ms(2030, 1, 15, 12, 0);
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

        let next = next_time_of_day(from, nine, &[Weekday::Fri], Tz::UTC);
        assert_eq!(next, ms(2030, 1, 18, 9, 0));

        // 09:00 in New York (UTC-5 in January) is 14:00 UTC
        let ny = next_time_of_day(from, nine, &[], chrono_tz::America::New_York);
        assert_eq!(ny, ms(2030, 1, 15, 14, 0));
    }

    #[test]
    fn test_smart_send_window() {
        let inside = ms(2030, 1, 15, 10, 0);
        assert_eq!(next_send_window(inside, 9, 17, None, Tz::UTC), inside);

        let before = ms(2030, 1, 15, 6, 0);
        assert_eq!(
            next_send_window(before, 9, 17, None, Tz::UTC),
            ms(2030, 1, 15, 9, 0)
        );

        let after = ms(2030, 1, 15, 18, 0);
        assert_eq!(
            next_send_window(after, 9, 17, None, Tz::UTC),
            ms(2030, 1, 16, 9, 0)
        );

        assert_eq!(
            next_send_window(inside, 9, 17, Some(14), Tz::UTC),
            ms(2030, 1, 15, 14, 0)
        );
        // Preferred hour outside the window is ignored
        assert_eq!(next_send_window(inside, 9, 17, Some(22), Tz::UTC), inside);
    }

    #[test]
    fn test_smart_send_uses_user_zone() {
        let mut user = UserProfile::new("u1");
        user.properties
            .insert("timezone".to_string(), json!("Asia/Tokyo"));
        let ctx = DelayContext {
            user: Some(&user),
            flow_timezone: Some("America/New_York"),
        };

        // 00:00 UTC is 09:00 in Tokyo, inside the window
        let from = ms(2030, 1, 15, 0, 0);
        let plan = plan_delay(
            &DelayConfig::SmartSendTime {
                window_start_hour: 9,
                window_end_hour: 12,
                timezone: None,
                preferred_hour_property: None,
            },
            from,
            &ctx,
        );
        assert_eq!(plan, DelayPlan::WakeAt(from));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_weekday("mon"), Some(Weekday::Mon));
        assert_eq!(parse_weekday("Friday"), Some(Weekday::Fri));
        assert!(parse_weekday("someday").is_none());
        assert!(parse_time_of_day("25:00").is_none());
        assert_eq!(parse_timestamp(&json!(1234)), Some(1234));
        assert_eq!(
            parse_timestamp(&json!("2030-01-15T09:00:00Z")),
            Some(ms(2030, 1, 15, 9, 0))
        );
        assert!(parse_timezone("Mars/Base").is_none());
    }
}
