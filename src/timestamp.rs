//! RFC 3339 handling for timestamps that arrive as strings.
//!
//! Browsers send `Date#toISOString` output such as
//! `2024-01-01T09:30:00.000Z`. Fractional seconds are dropped and `Z` is
//! read as `+00:00`; every parsed value is converted to UTC.

use time::{Format, OffsetDateTime, UtcOffset};

use crate::errors::BackendError;

/// Parses an RFC 3339 timestamp into UTC.
///
/// ```
/// use intern_tracker::timestamp;
///
/// let parsed = timestamp::parse("2024-01-01T12:00:00.250Z").unwrap();
/// assert_eq!(parsed.unix_timestamp(), 1_704_110_400);
/// ```
pub fn parse(raw: &str) -> Result<OffsetDateTime, time::ParseError> {
    let canonical = canonicalize(raw.trim());

    OffsetDateTime::parse(&canonical, Format::Rfc3339).map(|t| t.to_offset(UtcOffset::UTC))
}

/// Parses a form field holding a timestamp, reporting failures against
/// that field.
pub fn parse_field(field: &'static str, raw: &str) -> Result<OffsetDateTime, BackendError> {
    parse(raw).map_err(|e| BackendError::invalid(field, format!("{} is not an RFC 3339 timestamp ({})", raw, e)))
}

pub fn format(t: OffsetDateTime) -> String {
    t.to_offset(UtcOffset::UTC).format(Format::Rfc3339)
}

/// Unix seconds, rounded up so that a client waiting until the returned
/// second never arrives early.
pub fn ceil_unix_timestamp(t: OffsetDateTime) -> i64 {
    let seconds = t.unix_timestamp();

    if t.nanosecond() > 0 {
        seconds + 1
    } else {
        seconds
    }
}

/// IMF-fixdate as used by `retry-after`, rounded up to the whole second.
pub fn http_date(t: OffsetDateTime) -> String {
    OffsetDateTime::from_unix_timestamp(ceil_unix_timestamp(t)).format("%a, %d %b %Y %H:%M:%S GMT")
}

fn canonicalize(raw: &str) -> String {
    let without_zulu = match raw.strip_suffix(|c| c == 'Z' || c == 'z') {
        Some(rest) => format!("{}+00:00", rest),
        None => raw.to_owned(),
    };

    // drop `.fff` between the seconds and the offset
    match without_zulu.find('.') {
        Some(start) => {
            let end = without_zulu[start + 1..]
                .find(|c: char| !c.is_ascii_digit())
                .map(|offset| start + 1 + offset)
                .unwrap_or_else(|| without_zulu.len());

            format!("{}{}", &without_zulu[..start], &without_zulu[end..])
        }
        None => without_zulu,
    }
}
