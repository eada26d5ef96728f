//! Backup workflow.
//!
//! One run backs up one instance:
//!
//! ```text
//! Resolving -> Creating -> TaggingImage -> AwaitingSnapshots -> TaggingSnapshots
//!   -> Done                                          (no destination region)
//!   -> AwaitingImageAvailable -> Copying -> TaggingCopy
//!        -> AwaitingCopySnapshots -> TaggingCopySnapshots -> Done
//! ```
//!
//! Every phase has one fatal exit. The create/tag/wait/tag-snapshots leg
//! runs through [`BackupOrchestrator::materialize`] for both the source
//! image and its copy, so the two cannot drift apart.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use ami_backup_core::{
    image_description, image_name_with_prefix, BackupRequest, ImageRecord, ImageState,
    InstancePlacement, PollOutcome, TagSet,
};

use crate::cancel::Cancellation;
use crate::config::RuntimeConfig;
use crate::convergence::{ConvergencePoller, ImageStateCheck, SnapshotConvergenceCheck};
use crate::error::{BackupError, Phase};
use crate::providers::{ImageProvider, PlacementResolver};
use crate::tagger::ResourceTagger;

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub placement: InstancePlacement,

    /// Volumes attached to the instance when the image was requested
    pub volume_count: usize,

    /// Image in the source region
    pub image: ImageRecord,

    /// Copy in the destination region, when one was requested
    pub replica: Option<ImageRecord>,

    /// Tags applied to every created resource
    pub tags: TagSet,

    pub created_at: DateTime<Utc>,
}

impl BackupReport {
    /// Every resource the run created and tagged.
    pub fn created_resources(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        for record in std::iter::once(&self.image).chain(self.replica.as_ref()) {
            ids.push(record.image_id.as_str());
            ids.extend(record.snapshot_ids.iter().map(String::as_str));
        }
        ids
    }
}

/// Which image a leg produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Source,
    Replica,
}

impl Leg {
    fn creating(self) -> Phase {
        match self {
            Leg::Source => Phase::Creating,
            Leg::Replica => Phase::Copying,
        }
    }

    fn tagging_image(self) -> Phase {
        match self {
            Leg::Source => Phase::TaggingImage,
            Leg::Replica => Phase::TaggingCopy,
        }
    }

    fn awaiting_snapshots(self) -> Phase {
        match self {
            Leg::Source => Phase::AwaitingSnapshots,
            Leg::Replica => Phase::AwaitingCopySnapshots,
        }
    }

    fn tagging_snapshots(self) -> Phase {
        match self {
            Leg::Source => Phase::TaggingSnapshots,
            Leg::Replica => Phase::TaggingCopySnapshots,
        }
    }
}

/// Where a leg's image comes from.
#[derive(Debug, Clone, Copy)]
enum ImageOrigin<'a> {
    Instance { instance_id: &'a str },
    Copy {
        source_region: &'a str,
        source_image_id: &'a str,
    },
}

/// What every leg shares.
struct LegPlan<'a> {
    name: &'a str,
    description: &'a str,
    volume_count: usize,
    tags: &'a TagSet,
}

/// Drives a backup run against an [`ImageProvider`].
pub struct BackupOrchestrator {
    provider: Arc<dyn ImageProvider>,
    resolver: Option<Arc<dyn PlacementResolver>>,
    config: RuntimeConfig,
    cancellation: Cancellation,
}

impl BackupOrchestrator {
    pub fn new(provider: Arc<dyn ImageProvider>, config: RuntimeConfig) -> Self {
        Self {
            provider,
            resolver: None,
            config,
            cancellation: Cancellation::never(),
        }
    }

    /// Resolve missing instance id or region through `resolver`.
    pub fn with_resolver(mut self, resolver: Arc<dyn PlacementResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Abort waits when `cancellation` fires.
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run a backup stamped with the current time.
    pub async fn run(&self, request: &BackupRequest) -> Result<BackupReport, BackupError> {
        self.run_at(request, Utc::now()).await
    }

    /// Run a backup stamped with `created_at`.
    pub async fn run_at(
        &self,
        request: &BackupRequest,
        created_at: DateTime<Utc>,
    ) -> Result<BackupReport, BackupError> {
        let (placement, volume_count) = self.resolve(request).await?;

        let timestamp = created_at.timestamp();
        let name =
            image_name_with_prefix(&self.config.name_prefix, &placement.display_name, timestamp);
        let description = image_description(&placement, timestamp);
        let tags = TagSet::for_backup(
            &name,
            &placement,
            &created_at,
            &self.config.creator,
            request.expire.as_ref(),
        )
        .with_extra(&self.config.extra_tags)?;

        let poller = ConvergencePoller::new(self.config.poll_interval, request.timeout)
            .with_cancellation(self.cancellation.clone());
        let plan = LegPlan {
            name: &name,
            description: &description,
            volume_count,
            tags: &tags,
        };

        tracing::info!(
            instance_id = %placement.instance_id,
            region = %placement.region,
            volume_count,
            name = %name,
            destination = ?request.destination_region,
            timeout = ?poller.timeout(),
            "Starting backup"
        );

        let mut image = self
            .materialize(
                Leg::Source,
                ImageOrigin::Instance {
                    instance_id: &placement.instance_id,
                },
                &placement.region,
                &plan,
                &poller,
            )
            .await?;

        let replica = match request.destination_region.as_deref() {
            None => None,
            Some(destination) => {
                image = self.await_available(image, &poller).await?;
                let replica = self
                    .materialize(
                        Leg::Replica,
                        ImageOrigin::Copy {
                            source_region: &placement.region,
                            source_image_id: &image.image_id,
                        },
                        destination,
                        &plan,
                        &poller,
                    )
                    .await?;
                Some(replica)
            }
        };

        tracing::info!(
            phase = %Phase::Done,
            image_id = %image.image_id,
            replica_id = ?replica.as_ref().map(|r| r.image_id.as_str()),
            "Backup complete"
        );

        Ok(BackupReport {
            placement,
            volume_count,
            image,
            replica,
            tags,
            created_at,
        })
    }

    /// Resolve placement and volume count once, before anything is created.
    async fn resolve(
        &self,
        request: &BackupRequest,
    ) -> Result<(InstancePlacement, usize), BackupError> {
        let resolution = |reason: String| BackupError::Resolution {
            phase: Phase::Resolving,
            reason,
        };

        let supplied = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let mut instance_id = supplied(&request.instance_id);
        let mut region = supplied(&request.region);

        if instance_id.is_none() || region.is_none() {
            let resolver = self.resolver.as_ref().ok_or_else(|| {
                resolution("instance id and region not supplied and no metadata resolver".into())
            })?;
            let local = resolver
                .resolve_local_placement()
                .await
                .map_err(|e| resolution(format!("instance metadata: {}", e)))?;
            instance_id.get_or_insert(local.instance_id);
            region.get_or_insert(local.region);
        }

        let (Some(instance_id), Some(region)) = (instance_id, region) else {
            return Err(resolution("instance id or region unresolved".into()));
        };

        let details = self
            .provider
            .resolve_instance(&instance_id, &region)
            .await
            .map_err(|e| resolution(format!("instance {} in {}: {}", instance_id, region, e)))?;

        if details.availability_zone.trim().is_empty() {
            return Err(resolution(format!(
                "instance {} has no availability zone",
                instance_id
            )));
        }

        let placement = InstancePlacement::new(
            instance_id,
            region,
            details.availability_zone,
            details.display_name.as_deref(),
        );

        tracing::info!(
            phase = %Phase::Resolving,
            instance_id = %placement.instance_id,
            region = %placement.region,
            availability_zone = %placement.availability_zone,
            display_name = %placement.display_name,
            volume_count = details.volume_count,
            "Resolved instance"
        );

        Ok((placement, details.volume_count))
    }

    /// Create (or copy) an image, tag it, wait for its snapshots, tag them.
    async fn materialize(
        &self,
        leg: Leg,
        origin: ImageOrigin<'_>,
        region: &str,
        plan: &LegPlan<'_>,
        poller: &ConvergencePoller,
    ) -> Result<ImageRecord, BackupError> {
        let provider = self.provider.as_ref();

        let phase = leg.creating();
        let (image_id, target) = match origin {
            ImageOrigin::Instance { instance_id } => (
                provider
                    .create_image(region, instance_id, plan.name, plan.description)
                    .await
                    .map_err(BackupError::provider(phase))?,
                format!("instance {}", instance_id),
            ),
            ImageOrigin::Copy {
                source_region,
                source_image_id,
            } => (
                provider
                    .copy_image(
                        source_region,
                        source_image_id,
                        region,
                        plan.name,
                        plan.description,
                    )
                    .await
                    .map_err(BackupError::provider(phase))?,
                format!("copy of {} into {}", source_image_id, region),
            ),
        };

        let image_id = image_id.trim().to_string();
        if image_id.is_empty() {
            return Err(BackupError::Creation { phase, target });
        }
        tracing::info!(phase = %phase, image_id = %image_id, region = %region, "Image requested");

        let mut record = ImageRecord::new(&image_id, region, plan.name, plan.volume_count);
        let tagger = ResourceTagger::new(provider, self.config.tag_retry.clone());

        tagger
            .tag(leg.tagging_image(), region, &image_id, plan.tags)
            .await?;

        let phase = leg.awaiting_snapshots();
        let check = SnapshotConvergenceCheck {
            provider,
            image_id: &image_id,
            region,
            volume_count: plan.volume_count,
            overshoot: self.config.overshoot,
            phase,
        };
        match check.wait(poller).await? {
            PollOutcome::Converged { observed, elapsed } => {
                record.observe(&observed);
                tracing::info!(
                    phase = %phase,
                    image_id = %image_id,
                    snapshots = record.snapshot_ids.len(),
                    elapsed = ?elapsed,
                    "Snapshots realized"
                );
            }
            PollOutcome::TimedOut {
                last_observed,
                elapsed,
            } => {
                record.observe(&last_observed);
                return Err(BackupError::SnapshotTimeout {
                    phase,
                    image_id,
                    region: region.to_string(),
                    expected: plan.volume_count,
                    observed: record.snapshot_ids.len(),
                    waited: elapsed,
                });
            }
        }

        tagger
            .tag_each(leg.tagging_snapshots(), region, &record.snapshot_ids, plan.tags)
            .await?;

        Ok(record)
    }

    /// Wait for the source image to leave `pending`; only `available` may be copied.
    async fn await_available(
        &self,
        mut record: ImageRecord,
        poller: &ConvergencePoller,
    ) -> Result<ImageRecord, BackupError> {
        let phase = Phase::AwaitingImageAvailable;
        let check = ImageStateCheck {
            provider: self.provider.as_ref(),
            image_id: &record.image_id,
            region: &record.region,
            phase,
        };

        match check.wait(poller).await? {
            PollOutcome::Converged { observed, elapsed } => {
                if observed.state != ImageState::Available {
                    return Err(BackupError::ImageFailed {
                        phase,
                        image_id: record.image_id.clone(),
                        region: record.region.clone(),
                        state: observed.state,
                    });
                }
                tracing::info!(
                    phase = %phase,
                    image_id = %record.image_id,
                    elapsed = ?elapsed,
                    "Image available"
                );
                record.state = observed.state;
                Ok(record)
            }
            PollOutcome::TimedOut { elapsed, .. } => Err(BackupError::ImagePendingTimeout {
                phase,
                image_id: record.image_id.clone(),
                region: record.region.clone(),
                waited: elapsed,
            }),
        }
    }
}
