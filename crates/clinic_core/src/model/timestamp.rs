//! Millisecond timestamp helpers.
//!
//! Timestamps are stored as INTEGER epoch milliseconds, so anything finer is
//! dropped before it reaches the store or an audit snapshot.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};

/// Truncates `value` to whole milliseconds.
pub fn truncate_to_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    from_epoch_millis(value.timestamp_millis()).unwrap_or(value)
}

pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Half-open `[start, end)` millisecond bounds covering `start` 00:00 through
/// the last millisecond of `end`, in UTC.
pub fn day_range_millis(start: NaiveDate, end: NaiveDate) -> (i64, i64) {
    let lower = start.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    let upper = end
        .and_time(NaiveTime::MIN)
        .and_utc()
        .checked_add_signed(TimeDelta::days(1))
        .map_or(i64::MAX, |next_day| next_day.timestamp_millis());
    (lower, upper)
}

/// Serializes timestamps as RFC 3339 with millisecond precision.
pub(crate) mod millis_serde {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|value| value.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{day_range_millis, truncate_to_millis};
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn day_range_covers_whole_end_day() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let (lower, upper) = day_range_millis(day, day);
        assert_eq!(upper - lower, 24 * 60 * 60 * 1000);

        let last_ms = Utc.with_ymd_and_hms(2025, 3, 10, 23, 59, 59).unwrap().timestamp_millis() + 999;
        assert!(last_ms < upper);
        assert!(last_ms >= lower);
    }

    #[test]
    fn truncation_drops_sub_millisecond_digits() {
        let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let truncated = truncate_to_millis(precise);
        assert_eq!(truncated.timestamp_subsec_nanos(), 123_000_000);
    }
}
