//! Timestamp parsing and formatting.
//!
//! The source reports ISO-8601 (`2020-01-01T00:00:00Z`) in API output and the
//! legacy 14-digit form (`20200101000000`) inside some log parameters. Both
//! are accepted; output is always ISO-8601 UTC with second precision, which
//! also orders correctly as text.

use crate::TypesError;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

const LEGACY_FORMAT: &str = "%Y%m%d%H%M%S";

/// Parse a source timestamp.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TypesError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, LEGACY_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| TypesError::InvalidTimestamp {
            value: value.to_string(),
        })
}

/// Format a timestamp the way the source and the replica expect it.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Serde adapter for timestamp fields in source payloads.
pub mod api_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as ISO-8601 UTC.
    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(value))
    }

    /// Deserialize from either accepted form.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_timestamp(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_iso_timestamps() {
        let ts = parse_timestamp("2021-03-04T05:06:07Z").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap());
    }

    #[test]
    fn parses_legacy_timestamps() {
        let ts = parse_timestamp("20210304050607").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            parse_timestamp("yesterday"),
            Err(TypesError::InvalidTimestamp {
                value: "yesterday".into()
            })
        );
    }

    #[test]
    fn formats_with_second_precision() {
        let ts = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_timestamp(&ts), "2021-03-04T05:06:07Z");
    }
}
