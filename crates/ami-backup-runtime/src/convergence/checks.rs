//! Provider-state probes for the convergence poller.

use serde::{Deserialize, Serialize};

use ami_backup_core::{ImageDescription, PollOutcome};

use crate::error::{BackupError, Phase};
use crate::providers::ImageProvider;

use super::poller::{ConvergencePoller, Probe};

/// How to treat more realized snapshots than source volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OvershootPolicy {
    /// Abort with [`BackupError::SnapshotCountAnomaly`].
    #[default]
    Strict,
    /// Treat `count >= expected` as converged.
    Permissive,
}

/// Waits until an image reports one snapshot identifier per source volume.
///
/// `volume_count` comes from the source instance, captured before the
/// image existed; the image's own mapping may lag behind.
pub struct SnapshotConvergenceCheck<'a> {
    pub provider: &'a dyn ImageProvider,
    pub image_id: &'a str,
    pub region: &'a str,
    pub volume_count: usize,
    pub overshoot: OvershootPolicy,
    pub phase: Phase,
}

impl SnapshotConvergenceCheck<'_> {
    pub async fn wait(
        &self,
        poller: &ConvergencePoller,
    ) -> Result<PollOutcome<ImageDescription>, BackupError> {
        let provider = self.provider;
        let image_id = self.image_id;
        let region = self.region;
        let expected = self.volume_count;
        let overshoot = self.overshoot;
        let phase = self.phase;

        poller
            .poll(move || async move {
                let description = provider
                    .describe_image(image_id, region)
                    .await
                    .map_err(BackupError::provider(phase))?;
                let observed = description.realized_snapshots().len();

                tracing::debug!(
                    phase = %phase,
                    image_id = %image_id,
                    region = %region,
                    observed,
                    expected,
                    "Polled snapshots"
                );

                let done = match (observed > expected, overshoot) {
                    (true, OvershootPolicy::Strict) => {
                        return Err(BackupError::SnapshotCountAnomaly {
                            phase,
                            image_id: image_id.to_string(),
                            region: region.to_string(),
                            expected,
                            observed,
                        });
                    }
                    (true, OvershootPolicy::Permissive) => {
                        tracing::warn!(
                            image_id = %image_id,
                            observed,
                            expected,
                            "More snapshots than volumes, accepting"
                        );
                        true
                    }
                    (false, _) => observed == expected,
                };

                Ok(Probe {
                    done,
                    observed: description,
                })
            })
            .await
    }
}

/// Waits until an image leaves the `pending` state.
///
/// Convergence only means the state is terminal; the caller decides
/// whether that terminal state is acceptable.
pub struct ImageStateCheck<'a> {
    pub provider: &'a dyn ImageProvider,
    pub image_id: &'a str,
    pub region: &'a str,
    pub phase: Phase,
}

impl ImageStateCheck<'_> {
    pub async fn wait(
        &self,
        poller: &ConvergencePoller,
    ) -> Result<PollOutcome<ImageDescription>, BackupError> {
        let provider = self.provider;
        let image_id = self.image_id;
        let region = self.region;
        let phase = self.phase;

        poller
            .poll(move || async move {
                let description = provider
                    .describe_image(image_id, region)
                    .await
                    .map_err(BackupError::provider(phase))?;

                tracing::debug!(
                    phase = %phase,
                    image_id = %image_id,
                    region = %region,
                    state = %description.state,
                    "Polled image state"
                );

                Ok(Probe {
                    done: !description.state.is_pending(),
                    observed: description,
                })
            })
            .await
    }
}
