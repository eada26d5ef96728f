//! In-process provider with scripted convergence.
//!
//! Images created here walk through a [`ImageScript`]: how many describe
//! calls report `pending`, which state they settle in, and when their
//! snapshot identifiers appear. Every tagging call is recorded so tests can
//! assert exactly which resources were tagged and with what.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use ami_backup_core::{
    ImageDescription, ImageState, InstanceDetails, LocalPlacement, TagSet,
};

use super::{ImageProvider, PlacementResolver, ProviderError};

/// How an image evolves across successive describe calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageScript {
    /// Describe calls that report `pending` before `terminal_state`
    pub pending_polls: usize,

    /// State reported once pending is over
    pub terminal_state: ImageState,

    /// Describe calls before snapshot identifiers appear; `None` never
    pub snapshots_after: Option<usize>,

    /// Snapshot identifiers reported beyond the volume count
    pub extra_snapshots: usize,
}

impl Default for ImageScript {
    fn default() -> Self {
        Self {
            pending_polls: 0,
            terminal_state: ImageState::Available,
            snapshots_after: Some(0),
            extra_snapshots: 0,
        }
    }
}

impl ImageScript {
    /// Snapshots never materialize.
    pub fn stuck() -> Self {
        Self {
            pending_polls: usize::MAX,
            terminal_state: ImageState::Pending,
            snapshots_after: None,
            extra_snapshots: 0,
        }
    }

    /// Snapshots appear and the image settles after `polls` describes.
    pub fn settles_after(polls: usize) -> Self {
        Self {
            pending_polls: polls,
            snapshots_after: Some(polls),
            ..Default::default()
        }
    }

    /// Snapshots appear but the image ends in `state`.
    pub fn ends_in(state: ImageState) -> Self {
        Self {
            terminal_state: state,
            ..Default::default()
        }
    }
}

/// One recorded `tag_resources` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCall {
    pub region: String,
    pub resource_ids: Vec<String>,
    pub tags: TagSet,
}

#[derive(Debug)]
struct MemoryImage {
    region: String,
    name: String,
    description: String,
    source_image_id: Option<String>,
    snapshot_ids: Vec<String>,
    script: ImageScript,
    describe_calls: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    instances: HashMap<(String, String), InstanceDetails>,
    images: BTreeMap<String, MemoryImage>,
    snapshots: HashMap<String, String>,
    scripts: HashMap<String, ImageScript>,
    resource_tags: HashMap<String, BTreeMap<String, String>>,
    tag_calls: Vec<TagCall>,
    tag_failures: usize,
    blank_image_ids: bool,
    next_id: u32,
}

impl MemoryState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", prefix, self.next_id)
    }

    fn register_image(
        &mut self,
        region: &str,
        name: &str,
        description: &str,
        volume_count: usize,
        source_image_id: Option<String>,
    ) -> String {
        let image_id = self.next_id("ami");
        let script = self.scripts.get(region).cloned().unwrap_or_default();

        let mut snapshot_ids = Vec::new();
        for _ in 0..volume_count + script.extra_snapshots {
            let snapshot_id = self.next_id("snap");
            self.snapshots.insert(snapshot_id.clone(), region.to_string());
            snapshot_ids.push(snapshot_id);
        }

        self.images.insert(
            image_id.clone(),
            MemoryImage {
                region: region.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                source_image_id,
                snapshot_ids,
                script,
                describe_calls: 0,
            },
        );
        image_id
    }

    fn resource_region(&self, resource_id: &str) -> Option<&str> {
        self.images
            .get(resource_id)
            .map(|i| i.region.as_str())
            .or_else(|| self.snapshots.get(resource_id).map(String::as_str))
    }
}

/// Deterministic [`ImageProvider`] kept entirely in memory.
#[derive(Default)]
pub struct InMemoryProvider {
    state: Mutex<MemoryState>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance.
    pub fn with_instance(
        self,
        instance_id: &str,
        region: &str,
        availability_zone: &str,
        display_name: Option<&str>,
        volume_count: usize,
    ) -> Self {
        self.state.lock().instances.insert(
            (instance_id.to_string(), region.to_string()),
            InstanceDetails {
                availability_zone: availability_zone.to_string(),
                display_name: display_name.map(str::to_string),
                volume_count,
            },
        );
        self
    }

    /// Script images created (or copied) into `region`.
    pub fn with_script(self, region: &str, script: ImageScript) -> Self {
        self.state.lock().scripts.insert(region.to_string(), script);
        self
    }

    /// Fail the next `count` tagging calls.
    pub fn with_tag_failures(self, count: usize) -> Self {
        self.state.lock().tag_failures = count;
        self
    }

    /// Return empty identifiers from create and copy calls.
    pub fn with_blank_image_ids(self) -> Self {
        self.state.lock().blank_image_ids = true;
        self
    }

    /// All tagging calls, in order.
    pub fn tag_calls(&self) -> Vec<TagCall> {
        self.state.lock().tag_calls.clone()
    }

    /// Current tags on a resource.
    pub fn tags_of(&self, resource_id: &str) -> BTreeMap<String, String> {
        self.state
            .lock()
            .resource_tags
            .get(resource_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Identifiers of images in `region`, in creation order.
    pub fn images_in(&self, region: &str) -> Vec<String> {
        let state = self.state.lock();
        let mut ids: Vec<String> = state
            .images
            .iter()
            .filter(|(_, image)| image.region == region)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Snapshot identifiers backing an image.
    pub fn snapshots_of(&self, image_id: &str) -> Vec<String> {
        self.state
            .lock()
            .images
            .get(image_id)
            .map(|i| i.snapshot_ids.clone())
            .unwrap_or_default()
    }

    /// Name and description an image was created with.
    pub fn image_labels(&self, image_id: &str) -> Option<(String, String)> {
        self.state
            .lock()
            .images
            .get(image_id)
            .map(|i| (i.name.clone(), i.description.clone()))
    }

    /// The image a copy was made from.
    pub fn source_of(&self, image_id: &str) -> Option<String> {
        self.state
            .lock()
            .images
            .get(image_id)
            .and_then(|i| i.source_image_id.clone())
    }

    /// How many times an image has been described.
    pub fn describe_calls(&self, image_id: &str) -> usize {
        self.state
            .lock()
            .images
            .get(image_id)
            .map(|i| i.describe_calls)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ImageProvider for InMemoryProvider {
    async fn resolve_instance(
        &self,
        instance_id: &str,
        region: &str,
    ) -> Result<InstanceDetails, ProviderError> {
        self.state
            .lock()
            .instances
            .get(&(instance_id.to_string(), region.to_string()))
            .cloned()
            .ok_or_else(|| {
                ProviderError::NotFound(format!("instance {} in {}", instance_id, region))
            })
    }

    async fn create_image(
        &self,
        region: &str,
        instance_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String, ProviderError> {
        let mut state = self.state.lock();
        let volume_count = state
            .instances
            .get(&(instance_id.to_string(), region.to_string()))
            .map(|i| i.volume_count)
            .ok_or_else(|| {
                ProviderError::NotFound(format!("instance {} in {}", instance_id, region))
            })?;

        let image_id = state.register_image(region, name, description, volume_count, None);
        if state.blank_image_ids {
            return Ok(String::new());
        }
        Ok(image_id)
    }

    async fn describe_image(
        &self,
        image_id: &str,
        region: &str,
    ) -> Result<ImageDescription, ProviderError> {
        let mut state = self.state.lock();
        let image = state
            .images
            .get_mut(image_id)
            .filter(|i| i.region == region)
            .ok_or_else(|| ProviderError::NotFound(format!("image {} in {}", image_id, region)))?;

        let call = image.describe_calls;
        image.describe_calls += 1;

        let state_now = if call < image.script.pending_polls {
            ImageState::Pending
        } else {
            image.script.terminal_state.clone()
        };

        let realized = matches!(image.script.snapshots_after, Some(after) if call >= after);
        let snapshot_ids = image
            .snapshot_ids
            .iter()
            .map(|id| realized.then(|| id.clone()))
            .collect();

        Ok(ImageDescription {
            state: state_now,
            snapshot_ids,
        })
    }

    async fn copy_image(
        &self,
        source_region: &str,
        source_image_id: &str,
        destination_region: &str,
        name: &str,
        description: &str,
    ) -> Result<String, ProviderError> {
        let mut state = self.state.lock();
        let volume_count = state
            .images
            .get(source_image_id)
            .filter(|i| i.region == source_region)
            .map(|i| i.snapshot_ids.len() - i.script.extra_snapshots)
            .ok_or_else(|| {
                ProviderError::NotFound(format!(
                    "image {} in {}",
                    source_image_id, source_region
                ))
            })?;

        let image_id = state.register_image(
            destination_region,
            name,
            description,
            volume_count,
            Some(source_image_id.to_string()),
        );
        if state.blank_image_ids {
            return Ok(String::new());
        }
        Ok(image_id)
    }

    async fn tag_resources(
        &self,
        region: &str,
        resource_ids: &[String],
        tags: &TagSet,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.tag_calls.push(TagCall {
            region: region.to_string(),
            resource_ids: resource_ids.to_vec(),
            tags: tags.clone(),
        });

        if state.tag_failures > 0 {
            state.tag_failures -= 1;
            return Err(ProviderError::ApiError {
                status: 503,
                message: "RequestLimitExceeded".to_string(),
            });
        }

        for id in resource_ids {
            if state.resource_region(id) != Some(region) {
                return Err(ProviderError::NotFound(format!("resource {} in {}", id, region)));
            }
        }

        for id in resource_ids {
            let entry = state.resource_tags.entry(id.clone()).or_default();
            for (key, value) in tags.iter() {
                entry.insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// [`PlacementResolver`] that always reports the same placement.
pub struct StaticPlacement(pub LocalPlacement);

#[async_trait]
impl PlacementResolver for StaticPlacement {
    async fn resolve_local_placement(&self) -> Result<LocalPlacement, ProviderError> {
        Ok(self.0.clone())
    }
}
