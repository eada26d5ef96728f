//! Errors from a backup run.
//!
//! Every variant is fatal: the run stops at the first one. Resources that
//! were already created are left in place.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use ami_backup_core::{CoreError, ImageState};

use crate::cancel::Cancelled;
use crate::providers::ProviderError;

/// Where in the workflow a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Resolving,
    Creating,
    TaggingImage,
    AwaitingSnapshots,
    TaggingSnapshots,
    AwaitingImageAvailable,
    Copying,
    TaggingCopy,
    AwaitingCopySnapshots,
    TaggingCopySnapshots,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Resolving => "resolving",
            Phase::Creating => "creating",
            Phase::TaggingImage => "tagging-image",
            Phase::AwaitingSnapshots => "awaiting-snapshots",
            Phase::TaggingSnapshots => "tagging-snapshots",
            Phase::AwaitingImageAvailable => "awaiting-image-available",
            Phase::Copying => "copying",
            Phase::TaggingCopy => "tagging-copy",
            Phase::AwaitingCopySnapshots => "awaiting-copy-snapshots",
            Phase::TaggingCopySnapshots => "tagging-copy-snapshots",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal conditions of a backup run.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("[{phase}] cannot resolve placement: {reason}")]
    Resolution { phase: Phase, reason: String },

    #[error("[{phase}] provider returned no image id for {target}")]
    Creation { phase: Phase, target: String },

    #[error(
        "[{phase}] image {image_id} in {region} has {observed} of {expected} snapshots \
         after waiting {waited:?}"
    )]
    SnapshotTimeout {
        phase: Phase,
        image_id: String,
        region: String,
        expected: usize,
        observed: usize,
        waited: Duration,
    },

    #[error("[{phase}] image {image_id} in {region} reports {observed} snapshots for {expected} volumes")]
    SnapshotCountAnomaly {
        phase: Phase,
        image_id: String,
        region: String,
        expected: usize,
        observed: usize,
    },

    #[error("[{phase}] image {image_id} in {region} still pending after waiting {waited:?}")]
    ImagePendingTimeout {
        phase: Phase,
        image_id: String,
        region: String,
        waited: Duration,
    },

    #[error("[{phase}] image {image_id} in {region} reached terminal state '{state}' instead of 'available'")]
    ImageFailed {
        phase: Phase,
        image_id: String,
        region: String,
        state: ImageState,
    },

    #[error("[{phase}] tagging {resource_id} in {region} failed: {source}")]
    Tagging {
        phase: Phase,
        resource_id: String,
        region: String,
        #[source]
        source: ProviderError,
    },

    #[error("[{phase}] provider call failed: {source}")]
    Provider {
        phase: Phase,
        #[source]
        source: ProviderError,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<Cancelled> for BackupError {
    fn from(_: Cancelled) -> Self {
        BackupError::Cancelled
    }
}

impl BackupError {
    /// The phase the run was in when it failed.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            BackupError::Resolution { phase, .. }
            | BackupError::Creation { phase, .. }
            | BackupError::SnapshotTimeout { phase, .. }
            | BackupError::SnapshotCountAnomaly { phase, .. }
            | BackupError::ImagePendingTimeout { phase, .. }
            | BackupError::ImageFailed { phase, .. }
            | BackupError::Tagging { phase, .. }
            | BackupError::Provider { phase, .. } => Some(*phase),
            BackupError::Cancelled | BackupError::Core(_) => None,
        }
    }

    /// True for the bounded-wait failures.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            BackupError::SnapshotTimeout { .. } | BackupError::ImagePendingTimeout { .. }
        )
    }

    pub(crate) fn provider(phase: Phase) -> impl FnOnce(ProviderError) -> BackupError {
        move |source| BackupError::Provider { phase, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_state_is_not_a_timeout() {
        let failed = BackupError::ImageFailed {
            phase: Phase::AwaitingImageAvailable,
            image_id: "ami-1".into(),
            region: "us-east-1".into(),
            state: ImageState::Failed,
        };
        let pending = BackupError::ImagePendingTimeout {
            phase: Phase::AwaitingImageAvailable,
            image_id: "ami-1".into(),
            region: "us-east-1".into(),
            waited: Duration::from_secs(60),
        };

        assert!(!failed.is_timeout());
        assert!(pending.is_timeout());
        assert!(failed.to_string().contains("terminal state 'failed'"));
        assert!(pending.to_string().contains("still pending"));
    }

    #[test]
    fn test_messages_name_phase_and_resource() {
        let err = BackupError::Tagging {
            phase: Phase::TaggingSnapshots,
            resource_id: "snap-1".into(),
            region: "eu-west-1".into(),
            source: ProviderError::NotFound("snap-1".into()),
        };
        let message = err.to_string();
        assert!(message.starts_with("[tagging-snapshots]"));
        assert!(message.contains("snap-1"));
        assert_eq!(err.phase(), Some(Phase::TaggingSnapshots));
    }

    #[test]
    fn test_cancelled_has_no_phase() {
        let err: BackupError = Cancelled.into();
        assert!(matches!(err, BackupError::Cancelled));
        assert_eq!(err.phase(), None);
    }
}
