//! Provider backed by the `aws` command-line client.
//!
//! The CLI owns credential resolution and request signing; this module
//! builds argument vectors, runs them through a [`CommandRunner`], and
//! decodes the JSON it prints.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use ami_backup_core::{ImageDescription, ImageState, InstanceDetails, TagSet};

use super::{ImageProvider, ProviderError};

/// Executes a program with arguments and returns its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<String, ProviderError>;
}

/// Production runner that spawns the program directly (no shell).
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String, ProviderError> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProviderError::Spawn {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(ProviderError::CommandFailed {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    placement: Option<Placement>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    block_device_mappings: Vec<BlockDeviceMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Placement {
    availability_zone: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockDeviceMapping {
    ebs: Option<EbsBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EbsBlock {
    snapshot_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageIdResponse {
    image_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeImagesResponse {
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Image {
    state: String,
    #[serde(default)]
    block_device_mappings: Vec<BlockDeviceMapping>,
}

/// [`ImageProvider`] that shells out to `aws ec2 ...`.
pub struct AwsCliProvider {
    runner: Arc<dyn CommandRunner>,
    program: String,
    profile: Option<String>,
}

impl AwsCliProvider {
    /// Use the `aws` binary on `PATH`.
    pub fn new(profile: Option<String>) -> Self {
        Self::with_runner(Arc::new(ProcessRunner), profile)
    }

    /// Use a custom runner (tests, wrappers).
    pub fn with_runner(runner: Arc<dyn CommandRunner>, profile: Option<String>) -> Self {
        Self {
            runner,
            program: "aws".to_string(),
            profile,
        }
    }

    /// Override the client binary.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn ec2_args(&self, operation: &str, region: &str) -> Vec<String> {
        let mut args = vec![
            "ec2".to_string(),
            operation.to_string(),
            "--region".to_string(),
            region.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }

    async fn call<T: DeserializeOwned>(&self, args: &[String]) -> Result<T, ProviderError> {
        tracing::debug!(program = %self.program, args = ?args, "Calling provider CLI");
        let stdout = self.runner.run(&self.program, args).await?;
        serde_json::from_str(&stdout).map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: &str) {
    args.push(flag.to_string());
    args.push(value.to_string());
}

#[async_trait]
impl ImageProvider for AwsCliProvider {
    async fn resolve_instance(
        &self,
        instance_id: &str,
        region: &str,
    ) -> Result<InstanceDetails, ProviderError> {
        let mut args = self.ec2_args("describe-instances", region);
        push_flag(&mut args, "--instance-ids", instance_id);

        let response: DescribeInstancesResponse = self.call(&args).await?;
        let instance = response
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("instance {}", instance_id)))?;

        let availability_zone = instance
            .placement
            .map(|p| p.availability_zone)
            .filter(|az| !az.is_empty())
            .ok_or_else(|| {
                ProviderError::ParseError(format!("instance {} has no placement", instance_id))
            })?;

        let display_name = instance
            .tags
            .into_iter()
            .find(|t| t.key == "Name")
            .map(|t| t.value);

        let volume_count = instance
            .block_device_mappings
            .iter()
            .filter(|m| m.ebs.is_some())
            .count();

        Ok(InstanceDetails {
            availability_zone,
            display_name,
            volume_count,
        })
    }

    async fn create_image(
        &self,
        region: &str,
        instance_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String, ProviderError> {
        let mut args = self.ec2_args("create-image", region);
        push_flag(&mut args, "--instance-id", instance_id);
        push_flag(&mut args, "--name", name);
        push_flag(&mut args, "--description", description);
        args.push("--no-reboot".to_string());

        let response: ImageIdResponse = self.call(&args).await?;
        Ok(response.image_id.unwrap_or_default())
    }

    async fn describe_image(
        &self,
        image_id: &str,
        region: &str,
    ) -> Result<ImageDescription, ProviderError> {
        let mut args = self.ec2_args("describe-images", region);
        push_flag(&mut args, "--image-ids", image_id);

        let response: DescribeImagesResponse = self.call(&args).await?;
        let Some(image) = response.images.into_iter().next() else {
            // Freshly created images can lag behind describe calls.
            tracing::debug!(image_id = %image_id, region = %region, "Image not yet visible");
            return Ok(ImageDescription {
                state: ImageState::Pending,
                snapshot_ids: Vec::new(),
            });
        };

        let snapshot_ids = image
            .block_device_mappings
            .into_iter()
            .filter_map(|m| m.ebs)
            .map(|ebs| ebs.snapshot_id)
            .collect();

        Ok(ImageDescription {
            state: ImageState::from(image.state),
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
        let mut args = self.ec2_args("copy-image", destination_region);
        push_flag(&mut args, "--source-region", source_region);
        push_flag(&mut args, "--source-image-id", source_image_id);
        push_flag(&mut args, "--name", name);
        push_flag(&mut args, "--description", description);

        let response: ImageIdResponse = self.call(&args).await?;
        Ok(response.image_id.unwrap_or_default())
    }

    async fn tag_resources(
        &self,
        region: &str,
        resource_ids: &[String],
        tags: &TagSet,
    ) -> Result<(), ProviderError> {
        let tag_list: Vec<Tag> = tags
            .iter()
            .map(|(key, value)| Tag {
                key: key.to_string(),
                value: value.to_string(),
            })
            .collect();
        let tags_json =
            serde_json::to_string(&tag_list).map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let mut args = self.ec2_args("create-tags", region);
        args.push("--resources".to_string());
        args.extend(resource_ids.iter().cloned());
        push_flag(&mut args, "--tags", &tags_json);

        tracing::debug!(program = %self.program, args = ?args, "Calling provider CLI");
        self.runner.run(&self.program, &args).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "aws-cli"
    }
}
