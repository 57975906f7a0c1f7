use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// return second
pub(crate) fn get_now_as_u64() -> u64 {
    let now = SystemTime::now();
    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    since_epoch.as_secs()
}

/// Reaper tag for a moment `from_now` in the future, e.g.
/// `2026-08-25T18:30+0000`.
pub(crate) fn expiration_stamp(from_now: Duration) -> String {
    format_utc_minute(get_now_as_u64() + from_now.as_secs())
}

/// Formats epoch seconds as `%Y-%m-%dT%H:%M+0000` (minute precision).
pub(crate) fn format_utc_minute(epoch_secs: u64) -> String {
    let days = (epoch_secs / 86_400) as i64;
    let secs_of_day = epoch_secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}+0000",
        year,
        month,
        day,
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60
    )
}

/// Proleptic Gregorian date from days since the epoch
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if month <= 2 { year + 1 } else { year }, month, day)
}
