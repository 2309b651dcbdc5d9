use std::fmt::Display;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

/// Human label for an alarm time, relative to `now` in the viewer's zone.
pub fn format_alarm_time<Tz>(fire_at: Option<DateTime<Utc>>, now: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let Some(fire_at) = fire_at else {
        return "Not set".to_string();
    };
    let local = fire_at.with_timezone(tz);
    let today = now.with_timezone(tz).date_naive();
    let time = local.format("%H:%M");

    if local.date_naive() == today {
        format!("Today at {time}")
    } else if Some(local.date_naive()) == today.succ_opt() {
        format!("Tomorrow at {time}")
    } else if local.year() != today.year() {
        format!("{} at {time}", local.format("%b %-d, %Y"))
    } else {
        format!("{} at {time}", local.format("%b %-d"))
    }
}

/// Whole minutes until `fire_at`, rounded toward negative infinity.
pub fn minutes_until(fire_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (fire_at - now).num_milliseconds().div_euclid(Duration::minutes(1).num_milliseconds())
}

pub fn is_valid_alarm_time(fire_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    fire_at.is_some_and(|at| at > now)
}
