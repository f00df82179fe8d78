//! Field checks shared by the request forms.

use std::convert::TryFrom;
use std::ops::RangeInclusive;

use time::OffsetDateTime;

use crate::errors::BackendError;
use crate::timestamp;

/// Returns the trimmed value, or `MissingField` if it is absent or blank.
pub(crate) fn required_text(field: &'static str, value: Option<String>) -> Result<String, BackendError> {
    let value = value.map(|v| v.trim().to_owned()).unwrap_or_default();

    if value.is_empty() {
        Err(BackendError::MissingField { field })
    } else {
        Ok(value)
    }
}

pub(crate) fn required_timestamp(
    field: &'static str,
    value: Option<String>,
) -> Result<OffsetDateTime, BackendError> {
    let raw = required_text(field, value)?;

    timestamp::parse_field(field, &raw)
}

pub(crate) fn in_range(
    field: &'static str,
    value: i64,
    range: RangeInclusive<i16>,
) -> Result<i16, BackendError> {
    i16::try_from(value)
        .ok()
        .filter(|v| range.contains(v))
        .ok_or_else(|| {
            BackendError::invalid(
                field,
                format!("{} is outside {}..={}", value, range.start(), range.end()),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_missing() {
        let error = required_text("branch", Some("   ".to_owned())).unwrap_err();
        assert!(matches!(error, BackendError::MissingField { field: "branch" }));

        assert!(required_text("branch", None).is_err());
        assert_eq!(required_text("branch", Some(" CSE ".to_owned())).unwrap(), "CSE");
    }

    #[test]
    fn ranges_are_inclusive() {
        assert_eq!(in_range("progress", 0, 0..=100).unwrap(), 0);
        assert_eq!(in_range("progress", 100, 0..=100).unwrap(), 100);
        assert!(in_range("progress", 101, 0..=100).is_err());
        assert!(in_range("progress", i64::from(i16::MAX) + 1, 0..=100).is_err());
    }
}
