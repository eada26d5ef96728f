//! Provenance and expiry tags applied to every created resource.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::types::InstancePlacement;

pub const TAG_NAME: &str = "Name";
pub const TAG_INSTANCE: &str = "Instance";
pub const TAG_DATE: &str = "Date";
pub const TAG_CREATOR: &str = "Creator";
pub const TAG_AVAILABILITY_ZONE: &str = "AvailabilityZone";
pub const TAG_EXPIRE: &str = "Expire";

/// Keys owned by the backup workflow; configured extra tags may not use them.
pub const RESERVED_KEYS: [&str; 6] = [
    TAG_NAME,
    TAG_INSTANCE,
    TAG_DATE,
    TAG_CREATOR,
    TAG_AVAILABILITY_ZONE,
    TAG_EXPIRE,
];

/// Default value of the `Creator` tag.
pub const DEFAULT_CREATOR: &str = "ami-backup";

const MAX_KEY_LEN: usize = 128;
const MAX_VALUE_LEN: usize = 256;

/// Render a timestamp the way tag values carry it.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Key/value tags. Ordered so the batched tagging call is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    tags: BTreeMap<String, String>,
}

impl TagSet {
    /// Build the tag-set for one backup run.
    ///
    /// `Expire` is present only when `expire` is set.
    pub fn for_backup(
        image_name: &str,
        placement: &InstancePlacement,
        created_at: &DateTime<Utc>,
        creator: &str,
        expire: Option<&DateTime<Utc>>,
    ) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(TAG_NAME.to_string(), image_name.to_string());
        tags.insert(TAG_INSTANCE.to_string(), placement.instance_id.clone());
        tags.insert(TAG_DATE.to_string(), format_timestamp(created_at));
        tags.insert(TAG_CREATOR.to_string(), creator.to_string());
        tags.insert(
            TAG_AVAILABILITY_ZONE.to_string(),
            placement.availability_zone.clone(),
        );
        if let Some(expire) = expire {
            tags.insert(TAG_EXPIRE.to_string(), format_timestamp(expire));
        }
        Self { tags }
    }

    /// Merge configured static tags. Reserved keys and over-long keys or
    /// values are rejected.
    pub fn with_extra(mut self, extra: &BTreeMap<String, String>) -> Result<Self, CoreError> {
        for (key, value) in extra {
            validate_extra_tag(key, value)?;
            self.tags.insert(key.clone(), value.clone());
        }
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }
}

impl FromIterator<(String, String)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}

fn validate_extra_tag(key: &str, value: &str) -> Result<(), CoreError> {
    if RESERVED_KEYS.contains(&key) {
        return Err(CoreError::ReservedTag(key.to_string()));
    }
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(CoreError::InvalidTag(format!(
            "key '{}' must be 1-{} characters",
            key, MAX_KEY_LEN
        )));
    }
    if key.starts_with("aws:") {
        return Err(CoreError::InvalidTag(format!(
            "key '{}' uses the provider-reserved 'aws:' prefix",
            key
        )));
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(CoreError::InvalidTag(format!(
            "value for '{}' exceeds {} characters",
            key, MAX_VALUE_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn placement() -> InstancePlacement {
        InstancePlacement::new("i-0abc", "us-east-1", "us-east-1a", Some("web"))
    }

    #[test]
    fn test_base_tags_without_expiry() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let tags = TagSet::for_backup("backup-ami@web-1700000000", &placement(), &at, "me", None);

        let keys: Vec<&str> = tags.keys().collect();
        assert_eq!(
            keys,
            vec!["AvailabilityZone", "Creator", "Date", "Instance", "Name"]
        );
        assert_eq!(tags.get(TAG_DATE), Some("2023-11-14T22:13:20Z"));
        assert_eq!(tags.get(TAG_INSTANCE), Some("i-0abc"));
        assert!(!tags.contains_key(TAG_EXPIRE));
    }

    #[test]
    fn test_expire_tag_only_when_requested() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let expire = Utc.with_ymd_and_hms(2023, 11, 21, 22, 13, 20).unwrap();
        let tags = TagSet::for_backup("n", &placement(), &at, "me", Some(&expire));
        assert_eq!(tags.get(TAG_EXPIRE), Some("2023-11-21T22:13:20Z"));
        assert_eq!(tags.len(), 6);
    }

    #[test]
    fn test_extra_tags_cannot_override_reserved() {
        let at = Utc.timestamp_opt(0, 0).unwrap();
        let base = TagSet::for_backup("n", &placement(), &at, "me", None);

        let mut extra = BTreeMap::new();
        extra.insert("Team".to_string(), "infra".to_string());
        let merged = base.clone().with_extra(&extra).unwrap();
        assert_eq!(merged.get("Team"), Some("infra"));

        extra.insert("Name".to_string(), "spoofed".to_string());
        let err = base.with_extra(&extra).unwrap_err();
        assert!(matches!(err, CoreError::ReservedTag(k) if k == "Name"));
    }

    #[test]
    fn test_extra_tags_reject_provider_prefix() {
        let mut extra = BTreeMap::new();
        extra.insert("aws:owner".to_string(), "x".to_string());
        assert!(TagSet::default().with_extra(&extra).is_err());
    }
}
