//! Image naming.
//!
//! Generated names are derived from the instance's display name and the run
//! timestamp, then restricted to the character set `[A-Za-z0-9()./_-]`.
//! Disallowed characters are stripped, never substituted, so two display
//! names that differ only in punctuation or whitespace map to the same name.
//! The fixed prefix is applied after sanitization and is not filtered.

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::InstancePlacement;

/// Prefix applied to every generated image name.
pub const DEFAULT_NAME_PREFIX: &str = "backup-ami@";

lazy_static! {
    /// Anything outside the allowed image-name alphabet.
    static ref DISALLOWED_NAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9()./_-]").unwrap();
}

/// Strip every character outside `[A-Za-z0-9()./_-]`.
pub fn sanitize_name(raw: &str) -> String {
    DISALLOWED_NAME_CHARS.replace_all(raw, "").into_owned()
}

/// Returns true if `name` only contains allowed characters.
pub fn is_valid_name(name: &str) -> bool {
    !DISALLOWED_NAME_CHARS.is_match(name)
}

/// Generate an image name with the default prefix.
///
/// ```
/// use ami_backup_core::naming::image_name;
///
/// assert_eq!(
///     image_name("web server #1", 1_700_000_000),
///     "backup-ami@webserver1-1700000000"
/// );
/// ```
pub fn image_name(display_name: &str, timestamp: i64) -> String {
    image_name_with_prefix(DEFAULT_NAME_PREFIX, display_name, timestamp)
}

/// Generate an image name with a caller-chosen prefix.
pub fn image_name_with_prefix(prefix: &str, display_name: &str, timestamp: i64) -> String {
    let body = sanitize_name(&format!("{}-{}", display_name, timestamp));
    format!("{}{}", prefix, body)
}

/// Human-readable image description, shared by the source image and its
/// cross-region copy.
pub fn image_description(placement: &InstancePlacement, timestamp: i64) -> String {
    format!(
        "Backup of {} ({}) in {} at {}",
        placement.display_name, placement.instance_id, placement.availability_zone, timestamp
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strips_disallowed_characters() {
        assert_eq!(
            image_name("web server #1", 1_700_000_000),
            "backup-ami@webserver1-1700000000"
        );
    }

    #[test]
    fn test_keeps_allowed_punctuation() {
        assert_eq!(sanitize_name("db(primary)/v1.2_a-b"), "db(primary)/v1.2_a-b");
    }

    #[test]
    fn test_strips_non_ascii() {
        assert_eq!(sanitize_name("caf\u{e9} \u{1f680}"), "caf");
    }

    #[test]
    fn test_custom_prefix_is_not_sanitized() {
        assert_eq!(
            image_name_with_prefix("nightly@", "api", 42),
            "nightly@api-42"
        );
    }

    #[test]
    fn test_description_mentions_instance() {
        let placement = InstancePlacement::new("i-0abc", "us-east-1", "us-east-1a", Some("web"));
        let description = image_description(&placement, 7);
        assert!(description.contains("i-0abc"));
        assert!(description.contains("web"));
    }

    proptest! {
        #[test]
        fn prop_sanitized_body_is_always_valid(display in ".*", ts in any::<i64>()) {
            let name = image_name_with_prefix("", &display, ts);
            prop_assert!(is_valid_name(&name));
        }

        #[test]
        fn prop_naming_is_deterministic(display in ".*", ts in 0i64..4_000_000_000) {
            prop_assert_eq!(image_name(&display, ts), image_name(&display, ts));
        }

        #[test]
        fn prop_timestamp_survives(display in "[a-z ]{0,12}", ts in 0i64..4_000_000_000) {
            let name = image_name(&display, ts);
            let suffix = format!("-{}", ts);
            prop_assert!(name.ends_with(&suffix));
        }
    }
}
