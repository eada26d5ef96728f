//! Expiry expressions.
//!
//! Accepted forms:
//! - relative: `+1 week`, `+3 days 12 hours`, `+90d` (optionally without `+`)
//! - absolute: RFC 3339, `YYYY-MM-DD HH:MM[:SS]` or `YYYY-MM-DD` (UTC)
//! - epoch seconds: `@1700000000`

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::CoreError;

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse an expiry expression relative to `now`.
///
/// The result must lie strictly after `now`.
pub fn parse_expiry(expr: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidExpiry {
            expr: expr.to_string(),
            reason: "empty expression".to_string(),
        });
    }

    let at = match parse_absolute(trimmed) {
        Some(at) => at,
        None => now
            .checked_add_signed(parse_relative(trimmed)?)
            .ok_or_else(|| CoreError::InvalidExpiry {
                expr: expr.to_string(),
                reason: "out of range".to_string(),
            })?,
    };

    if at <= now {
        return Err(CoreError::ExpiryInPast {
            expr: expr.to_string(),
            at,
        });
    }

    tracing::debug!(expr = %expr, expire = %at, "Parsed expiry expression");
    Ok(at)
}

fn parse_absolute(expr: &str) -> Option<DateTime<Utc>> {
    if let Some(epoch) = expr.strip_prefix('@') {
        return epoch
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
    }

    if let Ok(at) = DateTime::parse_from_rfc3339(expr) {
        return Some(at.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(expr, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(expr, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_relative(expr: &str) -> Result<chrono::Duration, CoreError> {
    let body = expr.strip_prefix('+').unwrap_or(expr);
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();

    let std_duration =
        humantime::parse_duration(&compact).map_err(|e| CoreError::InvalidExpiry {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;

    chrono::Duration::from_std(std_duration).map_err(|_| CoreError::InvalidExpiry {
        expr: expr.to_string(),
        reason: "duration out of range".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_relative_week() {
        let at = parse_expiry("+1 week", now()).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_relative_compound() {
        let at = parse_expiry("+2 days 6 hours", now()).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 3, 3, 18, 0, 0).unwrap());

        let short = parse_expiry("90d", now()).unwrap();
        assert_eq!(short, now() + chrono::Duration::days(90));
    }

    #[test]
    fn test_absolute_forms() {
        let expected = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_expiry("2030-01-02T03:04:05Z", now()).unwrap(), expected);
        assert_eq!(parse_expiry("2030-01-02 03:04:05", now()).unwrap(), expected);
        assert_eq!(
            parse_expiry("2030-01-02T05:04:05+02:00", now()).unwrap(),
            expected
        );
        assert_eq!(
            parse_expiry("2030-01-02", now()).unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 2, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_expiry("@1900000000", now()).unwrap(),
            Utc.timestamp_opt(1_900_000_000, 0).unwrap()
        );
    }

    #[test]
    fn test_minutes_without_seconds() {
        let expected = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 0).unwrap();
        assert_eq!(parse_expiry("2030-01-02 03:04", now()).unwrap(), expected);
        assert_eq!(parse_expiry("2030-01-02T03:04", now()).unwrap(), expected);
    }

    #[test]
    fn test_relative_beyond_calendar_range_is_error() {
        let err = parse_expiry("+1000000 years", now()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidExpiry { ref reason, .. } if reason.contains("out of range")
        ));
    }

    #[test]
    fn test_past_expiry_rejected() {
        let err = parse_expiry("2020-01-01", now()).unwrap_err();
        assert!(matches!(err, CoreError::ExpiryInPast { .. }));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            parse_expiry("next tuesday-ish", now()),
            Err(CoreError::InvalidExpiry { .. })
        ));
        assert!(matches!(
            parse_expiry("   ", now()),
            Err(CoreError::InvalidExpiry { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_relative_days_add_exactly(days in 1i64..3650) {
            let at = parse_expiry(&format!("+{} days", days), now()).unwrap();
            prop_assert_eq!(at - now(), chrono::Duration::days(days));
        }
    }
}
