//! Wall-clock timestamp encoding shared by every payload.
//!
//! The backend stores operator-entered times without timezone information, so
//! values travel as naive local date-times. Outgoing values always carry
//! milliseconds and a literal `Z`, which the backend's movement pattern
//! requires and reads back unshifted. Incoming values may omit seconds or
//! fractions and may end in a `Z` that is ignored.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

const OUTGOING_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const INCOMING_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

pub fn format(value: &NaiveDateTime) -> String {
    value.format(OUTGOING_FORMAT).to_string()
}

pub fn parse(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    let raw = raw.strip_suffix('Z').unwrap_or(raw);
    // Offsets like `+00:00` are dropped as well; the wall clock is taken as-is.
    let raw = match raw.rfind('+') {
        Some(idx) if idx > 10 => &raw[..idx],
        _ => raw,
    };

    INCOMING_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(value))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'")))
}

pub mod option {
    use chrono::NaiveDateTime;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_str(&super::format(value)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => super::parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .expect("date")
            .and_hms_opt(h, m, 0)
            .expect("time")
    }

    #[test]
    fn accepts_backend_utc_suffix_without_shifting() {
        assert_eq!(parse("2026-03-14T08:30:00.000Z"), Some(at(8, 30)));
    }

    #[test]
    fn accepts_minute_precision_form_values() {
        assert_eq!(parse("2026-03-14T17:05"), Some(at(17, 5)));
        assert_eq!(parse("2026-03-14 17:05"), Some(at(17, 5)));
    }

    #[test]
    fn ignores_numeric_offsets() {
        assert_eq!(parse("2026-03-14T08:30:00+00:00"), Some(at(8, 30)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse("yesterday"), None);
    }

    #[test]
    fn formats_with_milliseconds_and_utc_marker() {
        assert_eq!(format(&at(8, 30)), "2026-03-14T08:30:00.000Z");
        assert_eq!(parse(&format(&at(17, 5))), Some(at(17, 5)));
    }
}
