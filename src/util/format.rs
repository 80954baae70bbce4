use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use thiserror::Error;

/// Describes `then` relative to `now` in whole calendar days.
///
/// The distance is symmetric, so dates in the future read the same as dates
/// in the past. Months are counted with calendar arithmetic rather than a
/// fixed number of days.
pub fn time_relative_to(now: NaiveDate, then: NaiveDate) -> String {
    let days = (then - now).num_days().abs();

    match days {
        0 => return "Today".to_string(),
        1 => return "Yesterday".to_string(),
        _ => {}
    }

    for month in 1..12u32 {
        let interval = days_since(now, month);

        if days < interval {
            return match month {
                1 => format!("{days} days ago"),
                2 => "over a month ago".to_string(),
                _ => format!("over {} months ago", month - 1),
            };
        }

        if days == interval {
            return if month == 1 {
                "a month ago".to_string()
            } else {
                format!("{month} months ago")
            };
        }
    }

    let a_year_ago = now.checked_sub_months(Months::new(12)).unwrap_or(now);
    let interval = (now - a_year_ago).num_days();

    if days < interval {
        "over 11 months ago".to_string()
    } else if days == interval {
        "a year ago".to_string()
    } else if then.year() == a_year_ago.year() {
        "over a year ago".to_string()
    } else {
        format!("in {}", then.year())
    }
}

fn days_since(now: NaiveDate, months: u32) -> i64 {
    now.checked_sub_months(Months::new(months))
        .map(|earlier| (now - earlier).num_days())
        .unwrap_or(i64::MAX)
}

/// Formats a duration in seconds as `42s`, `17m` or `1h5m`.
///
/// Durations of a minute or more drop the seconds, rounding to the nearest
/// minute.
pub fn format_seconds(secs: i64) -> String {
    if secs < 60 {
        return format!("{secs}s");
    }

    let hours = secs / 3600;
    let rem = secs % 3600;
    let mut minutes = rem / 60;
    if rem % 60 >= 30 {
        minutes += 1;
    }

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinceError {
    #[error("invalid date '{0}': valid values are today | mon...sun | jan...dec | Nd | Nm | Ny")]
    Invalid(String),

    #[error("invalid date '{0}': number must be greater than zero")]
    NotPositive(String),
}

/// Parses a `--since` value into the first day it covers.
///
/// Accepted forms, all case-insensitive:
/// - `today` or `0d`
/// - a weekday (`mon`..`sun`): the most recent such day, today included
/// - a month (`jan`..`dec`): the 1st of the most recent such month
/// - `Nd`, `Nm`, `Ny`: N days, months or years before today
pub fn parse_since(value: &str, today: NaiveDate) -> Result<NaiveDate, SinceError> {
    let val = value.trim().to_lowercase();

    if val == "today" || val == "0d" {
        return Ok(today);
    }

    if let Ok(weekday) = val.parse::<Weekday>() {
        if val.len() == 3 {
            let back = (7 + today.weekday().num_days_from_monday()
                - weekday.num_days_from_monday())
                % 7;
            return Ok(today - Duration::days(i64::from(back)));
        }
    }

    if let Some(month) = month_number(&val) {
        let this_year = NaiveDate::from_ymd_opt(today.year(), month, 1)
            .ok_or_else(|| SinceError::Invalid(value.to_string()))?;
        if this_year > today {
            return this_year
                .checked_sub_months(Months::new(12))
                .ok_or_else(|| SinceError::Invalid(value.to_string()));
        }
        return Ok(this_year);
    }

    parse_offset(&val, today).ok_or_else(|| {
        let non_positive = val.len() > 1
            && val.is_ascii()
            && val[..val.len() - 1].parse::<i64>().is_ok_and(|n| n <= 0);
        if non_positive {
            SinceError::NotPositive(value.to_string())
        } else {
            SinceError::Invalid(value.to_string())
        }
    })
}

fn month_number(val: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    MONTHS
        .iter()
        .position(|m| *m == val)
        .map(|i| i as u32 + 1)
}

fn parse_offset(val: &str, today: NaiveDate) -> Option<NaiveDate> {
    if val.len() < 2 || !val.is_ascii() {
        return None;
    }

    let (number, unit) = val.split_at(val.len() - 1);
    let n: u32 = number.parse().ok()?;
    if n == 0 {
        return None;
    }

    match unit {
        "d" => today.checked_sub_signed(Duration::days(i64::from(n))),
        "m" => today.checked_sub_months(Months::new(n)),
        "y" => today.checked_sub_months(Months::new(n.checked_mul(12)?)),
        _ => None,
    }
}
