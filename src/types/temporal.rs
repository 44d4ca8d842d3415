//! Conversions between chrono values and ClickHouse's epoch-based storage.
//!
//! Sub-unit precision is always dropped with floor semantics, so instants
//! before the epoch round toward negative infinity.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// `NaiveDate::from_ymd(1970, 1, 1).num_days_from_ce()`
const EPOCH_DAYS_FROM_CE: i64 = 719_163;

const NANOS_PER_SEC: i64 = 1_000_000_000;

pub fn days_since_epoch(date: NaiveDate) -> i64 {
    date.num_days_from_ce() as i64 - EPOCH_DAYS_FROM_CE
}

pub fn date_from_days(days: i64) -> Option<NaiveDate> {
    let ce = days.checked_add(EPOCH_DAYS_FROM_CE)?;
    NaiveDate::from_num_days_from_ce_opt(i32::try_from(ce).ok()?)
}

/// Whole seconds since the epoch, flooring any fractional part.
pub fn seconds_since_epoch(dt: &DateTime<Utc>) -> i64 {
    // `timestamp()` already floors: the nanosecond part is always positive.
    dt.timestamp()
}

/// Ticks of `10^-precision` seconds since the epoch, floored.
pub fn ticks_since_epoch(dt: &DateTime<Utc>, precision: u8) -> Option<i64> {
    let precision = u32::from(precision.min(9));
    let per_sec = 10i64.pow(precision);
    let sub = i64::from(dt.timestamp_subsec_nanos()) / 10i64.pow(9 - precision);
    dt.timestamp().checked_mul(per_sec)?.checked_add(sub)
}

pub fn datetime_from_ticks(ticks: i64, precision: u8) -> Option<DateTime<Utc>> {
    let precision = u32::from(precision.min(9));
    let per_sec = 10i64.pow(precision);
    let secs = ticks.div_euclid(per_sec);
    let nanos = ticks.rem_euclid(per_sec) * (NANOS_PER_SEC / per_sec);
    DateTime::from_timestamp(secs, nanos as u32)
}

pub fn datetime_from_seconds(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_days() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(days_since_epoch(epoch), 0);
        let before = NaiveDate::from_ymd_opt(1969, 12, 31).unwrap();
        assert_eq!(days_since_epoch(before), -1);
        assert_eq!(date_from_days(-1), Some(before));
        assert_eq!(date_from_days(19_723), NaiveDate::from_ymd_opt(2024, 1, 1));
    }

    #[test]
    fn test_ticks_floor() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        assert_eq!(ticks_since_epoch(&dt, 3), Some(1_704_067_200_123));
        assert_eq!(ticks_since_epoch(&dt, 0), Some(1_704_067_200));

        // 1969-12-31 23:59:59.9996 floors to ...59.999 at millisecond scale.
        let pre_epoch = DateTime::from_timestamp(-1, 999_600_000).unwrap();
        assert_eq!(ticks_since_epoch(&pre_epoch, 3), Some(-1));
        let back = datetime_from_ticks(-1, 3).unwrap();
        assert_eq!(back.timestamp(), -1);
        assert_eq!(back.nanosecond(), 999_000_000);
    }

    #[test]
    fn test_seconds() {
        let dt = DateTime::from_timestamp(-1, 500_000_000).unwrap();
        assert_eq!(seconds_since_epoch(&dt), -1);
        assert_eq!(datetime_from_seconds(0).unwrap().timestamp(), 0);
    }
}
