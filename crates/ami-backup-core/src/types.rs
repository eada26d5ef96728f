//! Data model for a single backup run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default ceiling for every bounded wait (8 hours).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(28_800);

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// What the caller asked for. Created once per invocation, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRequest {
    /// Instance to back up; resolved from instance metadata when absent
    pub instance_id: Option<String>,

    /// Region of the instance; resolved from instance metadata when absent
    pub region: Option<String>,

    /// Region to replicate the image into
    pub destination_region: Option<String>,

    /// When the created resources may be garbage-collected
    pub expire: Option<DateTime<Utc>>,

    /// Ceiling for each bounded wait
    pub timeout: Duration,

    /// Credential profile handed to the provider client
    pub profile: Option<String>,
}

impl Default for BackupRequest {
    fn default() -> Self {
        Self {
            instance_id: None,
            region: None,
            destination_region: None,
            expire: None,
            timeout: DEFAULT_TIMEOUT,
            profile: None,
        }
    }
}

impl BackupRequest {
    /// Request a backup of a specific instance.
    pub fn for_instance(instance_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
            region: Some(region.into()),
            ..Default::default()
        }
    }

    /// Replicate the image into `region` once it is available.
    pub fn with_destination(mut self, region: impl Into<String>) -> Self {
        self.destination_region = Some(region.into());
        self
    }

    /// Tag every created resource with an expiry.
    pub fn with_expire(mut self, expire: DateTime<Utc>) -> Self {
        self.expire = Some(expire);
        self
    }

    /// Override the wait ceiling. Zero falls back to the default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = effective_timeout(Some(timeout));
        self
    }

    /// Use a named credential profile.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }
}

/// Resolve a caller-supplied timeout: unset or zero means the default,
/// never "no wait" and never unbounded.
pub fn effective_timeout(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(t) if !t.is_zero() => t,
        _ => DEFAULT_TIMEOUT,
    }
}

/// Where the instance lives. Resolved once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePlacement {
    pub instance_id: String,
    pub region: String,
    pub availability_zone: String,

    /// The instance's `Name` tag, or the instance id when untagged
    pub display_name: String,
}

impl InstancePlacement {
    pub fn new(
        instance_id: impl Into<String>,
        region: impl Into<String>,
        availability_zone: impl Into<String>,
        display_name: Option<&str>,
    ) -> Self {
        let instance_id = instance_id.into();
        let display_name = match display_name.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => instance_id.clone(),
        };

        Self {
            instance_id,
            region: region.into(),
            availability_zone: availability_zone.into(),
            display_name,
        }
    }
}

/// Placement as reported by the local instance-metadata endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPlacement {
    pub instance_id: String,
    pub region: String,
    pub availability_zone: String,
}

/// What the provider knows about an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDetails {
    pub availability_zone: String,
    pub display_name: Option<String>,

    /// Number of block-device mappings, i.e. volumes that will be snapshotted
    pub volume_count: usize,
}

/// Provider-reported image state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageState {
    Pending,
    Available,
    Failed,
    /// Any other provider-defined state (e.g. `invalid`, `deregistered`)
    Other(String),
}

impl ImageState {
    pub fn as_str(&self) -> &str {
        match self {
            ImageState::Pending => "pending",
            ImageState::Available => "available",
            ImageState::Failed => "failed",
            ImageState::Other(s) => s,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ImageState::Pending)
    }
}

impl From<&str> for ImageState {
    fn from(s: &str) -> Self {
        match s {
            "pending" => ImageState::Pending,
            "available" => ImageState::Available,
            "failed" => ImageState::Failed,
            other => ImageState::Other(other.to_string()),
        }
    }
}

impl From<String> for ImageState {
    fn from(s: String) -> Self {
        ImageState::from(s.as_str())
    }
}

impl From<ImageState> for String {
    fn from(state: ImageState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `describeImage` observation.
///
/// A block-device slot may exist before its snapshot has an identifier, so
/// entries are optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescription {
    pub state: ImageState,
    pub snapshot_ids: Vec<Option<String>>,
}

impl ImageDescription {
    /// Snapshot identifiers that have materialized, in slot order.
    pub fn realized_snapshots(&self) -> Vec<String> {
        self.snapshot_ids
            .iter()
            .flatten()
            .filter(|id| !id.is_empty())
            .cloned()
            .collect()
    }
}

/// An image created (or copied) during this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: String,
    pub region: String,
    pub name: String,

    /// Volume count captured from the source instance before creation
    pub volume_count: usize,

    pub state: ImageState,

    /// Realized snapshot identifiers; only grows
    pub snapshot_ids: Vec<String>,
}

impl ImageRecord {
    pub fn new(
        image_id: impl Into<String>,
        region: impl Into<String>,
        name: impl Into<String>,
        volume_count: usize,
    ) -> Self {
        Self {
            image_id: image_id.into(),
            region: region.into(),
            name: name.into(),
            volume_count,
            state: ImageState::Pending,
            snapshot_ids: Vec::new(),
        }
    }

    /// Fold an observation into the record.
    ///
    /// Snapshot identifiers already recorded are kept even if a later
    /// observation omits them.
    pub fn observe(&mut self, description: &ImageDescription) {
        self.state = description.state.clone();
        for id in description.realized_snapshots() {
            if !self.snapshot_ids.contains(&id) {
                self.snapshot_ids.push(id);
            }
        }
    }

    pub fn is_converged(&self) -> bool {
        self.snapshot_ids.len() == self.volume_count
    }
}

/// Terminal result of a bounded wait.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<V> {
    /// Predicate satisfied.
    Converged { observed: V, elapsed: Duration },

    /// Deadline reached with the predicate unsatisfied; keeps the last
    /// observation for diagnostics.
    TimedOut { last_observed: V, elapsed: Duration },
}

impl<V> PollOutcome<V> {
    pub fn is_converged(&self) -> bool {
        matches!(self, PollOutcome::Converged { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            PollOutcome::Converged { elapsed, .. } | PollOutcome::TimedOut { elapsed, .. } => {
                *elapsed
            }
        }
    }

    pub fn observed(&self) -> &V {
        match self {
            PollOutcome::Converged { observed, .. } => observed,
            PollOutcome::TimedOut { last_observed, .. } => last_observed,
        }
    }
}
