//! Wall-clock ⇄ absolute-instant conversion.
//!
//! All booking arithmetic happens on UTC milliseconds ([`Ms`]); timezones only
//! matter at the edges: parsing a client's wall-clock string, anchoring a
//! schedule's time-of-day onto a date, and rendering stored instants back.

use chrono::{
    DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;

use crate::model::Ms;

/// Literal wire format for wall-clock instants: `DD-MM-YYYY HH:MM`.
pub const WALL_CLOCK_FORMAT: &str = "%d-%m-%Y %H:%M";

/// No IANA zone has a transition gap longer than this.
const MAX_GAP_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("invalid timezone: {0:?}")]
    InvalidTimezone(String),
    #[error("invalid time format {0:?}: expected DD-MM-YYYY HH:MM")]
    InvalidTimeFormat(String),
    #[error("instant out of range: {0}")]
    OutOfRange(Ms),
    #[error("local time {0} does not exist in {1}")]
    Unresolvable(NaiveDateTime, Tz),
}

pub fn parse_timezone(name: &str) -> Result<Tz, TimeError> {
    name.parse::<Tz>()
        .map_err(|_| TimeError::InvalidTimezone(name.to_string()))
}

/// Parse `DD-MM-YYYY HH:MM` as a wall-clock time in `tz`.
pub fn parse_wall_clock(text: &str, tz: Tz) -> Result<DateTime<Tz>, TimeError> {
    if !has_wall_clock_shape(text) {
        return Err(TimeError::InvalidTimeFormat(text.to_string()));
    }
    let naive = NaiveDateTime::parse_from_str(text, WALL_CLOCK_FORMAT)
        .map_err(|_| TimeError::InvalidTimeFormat(text.to_string()))?;
    localize(tz, truncate_to_minute(naive))
}

/// Render an absolute instant as `DD-MM-YYYY HH:MM` in `tz`.
pub fn format_wall_clock(ms: Ms, tz: Tz) -> Result<String, TimeError> {
    Ok(to_zoned(ms, tz)?.format(WALL_CLOCK_FORMAT).to_string())
}

pub fn to_zoned(ms: Ms, tz: Tz) -> Result<DateTime<Tz>, TimeError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|utc| utc.with_timezone(&tz))
        .ok_or(TimeError::OutOfRange(ms))
}

/// Place a time-of-day onto `date` in `tz`, yielding a comparable instant.
pub fn anchor_time_of_day(date: NaiveDate, time: NaiveTime, tz: Tz) -> Result<Ms, TimeError> {
    let local = truncate_to_minute(date.and_time(time));
    Ok(localize(tz, local)?.timestamp_millis())
}

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Exactly `DD-MM-YYYY HH:MM`: chrono alone accepts single digits, padding,
/// signed years and a missing separator.
fn has_wall_clock_shape(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() == 16
        && bytes.iter().enumerate().all(|(i, &b)| match i {
            2 | 5 => b == b'-',
            10 => b == b' ',
            13 => b == b':',
            _ => b.is_ascii_digit(),
        })
}

fn truncate_to_minute(naive: NaiveDateTime) -> NaiveDateTime {
    naive
        .with_second(0)
        .and_then(|n| n.with_nanosecond(0))
        .unwrap_or(naive)
}

/// Resolve a local time in `tz`.
///
/// Ambiguous times (autumn fold) take the earlier instant. Times inside a
/// spring-forward gap keep the offset in force before the jump, which lands
/// them the length of the gap past the transition (02:30 → 03:30).
fn localize(tz: Tz, naive: NaiveDateTime) -> Result<DateTime<Tz>, TimeError> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest),
        LocalResult::None => {
            let mut earlier = naive;
            for _ in 0..MAX_GAP_MINUTES {
                earlier -= TimeDelta::minutes(1);
                if let Some(before) = tz.from_local_datetime(&earlier).earliest() {
                    let offset = before.offset().fix().local_minus_utc();
                    let utc = naive - TimeDelta::seconds(i64::from(offset));
                    return Ok(tz.from_utc_datetime(&utc));
                }
            }
            Err(TimeError::Unresolvable(naive, tz))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn parse_wall_clock_in_zone() {
        let tz = parse_timezone("Europe/Berlin").unwrap();
        let dt = parse_wall_clock("15-01-2025 10:00", tz).unwrap();
        // CET is UTC+1 in January
        assert_eq!(dt.with_timezone(&Utc).format("%H:%M").to_string(), "09:00");
        assert_eq!(dt.timestamp_millis() % 60_000, 0);
    }

    #[test]
    fn rejects_unknown_timezone() {
        assert_eq!(
            parse_timezone("Mars/Olympus"),
            Err(TimeError::InvalidTimezone("Mars/Olympus".into()))
        );
        assert!(parse_timezone("").is_err());
    }

    #[test]
    fn rejects_other_formats() {
        let tz = Tz::UTC;
        for bad in [
            "2025-01-15 10:00",
            "15-01-2025T10:00",
            "15-01-2025 10:00:30",
            "15-01-2025",
            "32-01-2025 10:00",
            "15-01-2025 24:00",
            "",
            "5-1-2099 9:00",
            "15-01-209910:00",
            " 15-01-2099 10:00",
            "15-01-2099 10:00 ",
            "15-01-2099   10:00",
            "15-01-+2099 10:00",
            "15/01/2099 10:00",
            "15-01-2099 1O:00",
            "１5-01-2099 10:00",
        ] {
            assert!(
                matches!(parse_wall_clock(bad, tz), Err(TimeError::InvalidTimeFormat(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn format_roundtrip() {
        let tz = parse_timezone("America/New_York").unwrap();
        let dt = parse_wall_clock("01-07-2099 23:45", tz).unwrap();
        assert_eq!(
            format_wall_clock(dt.timestamp_millis(), tz).unwrap(),
            "01-07-2099 23:45"
        );
    }

    #[test]
    fn anchor_uses_target_zone() {
        let tokyo = parse_timezone("Asia/Tokyo").unwrap();
        let ms = anchor_time_of_day(date(2025, 1, 15), hm(9, 0), tokyo).unwrap();
        let utc = anchor_time_of_day(date(2025, 1, 15), hm(0, 0), Tz::UTC).unwrap();
        // 09:00 JST == 00:00 UTC
        assert_eq!(ms, utc);
    }

    #[test]
    fn anchor_drops_sub_minute_precision() {
        let with_secs = NaiveTime::from_hms_nano_opt(9, 30, 59, 999).unwrap();
        let a = anchor_time_of_day(date(2025, 1, 15), with_secs, Tz::UTC).unwrap();
        let b = anchor_time_of_day(date(2025, 1, 15), hm(9, 30), Tz::UTC).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn spring_forward_gap_shifts_forward() {
        // 2025-03-30 02:30 does not exist in Berlin (clocks jump 02:00 → 03:00)
        let berlin = parse_timezone("Europe/Berlin").unwrap();
        let ms = anchor_time_of_day(date(2025, 3, 30), hm(2, 30), berlin).unwrap();
        assert_eq!(format_wall_clock(ms, berlin).unwrap(), "30-03-2025 03:30");
    }

    #[test]
    fn autumn_fold_takes_earliest() {
        // 2025-10-26 02:30 happens twice in Berlin; the first is CEST (UTC+2)
        let berlin = parse_timezone("Europe/Berlin").unwrap();
        let ms = anchor_time_of_day(date(2025, 10, 26), hm(2, 30), berlin).unwrap();
        assert_eq!(format_wall_clock(ms, Tz::UTC).unwrap(), "26-10-2025 00:30");
    }
}
