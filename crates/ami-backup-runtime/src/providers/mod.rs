//! Provider client abstractions.
//!
//! [`ImageProvider`] is the only place where the compute provider is
//! called. Everything the workflow needs from it fits in five operations;
//! wire format, authentication and request signing belong to the
//! implementation.
//!
//! [`PlacementResolver`] is kept separate because it talks to the local
//! instance-metadata endpoint rather than the provider API.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use ami_backup_core::{ImageDescription, InstanceDetails, LocalPlacement, TagSet};

mod aws_cli;
mod memory;
#[cfg(feature = "imds")]
mod metadata;

pub use aws_cli::{AwsCliProvider, CommandRunner, ProcessRunner};
pub use memory::{ImageScript, InMemoryProvider, StaticPlacement, TagCall};
#[cfg(feature = "imds")]
pub use metadata::{region_from_zone, InstanceMetadataResolver};

/// Errors from provider clients.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Failed to run '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("'{program}' exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Error codes the provider returns while throttling or briefly unavailable.
const TRANSIENT_CODES: [&str; 5] = [
    "RequestLimitExceeded",
    "Throttling",
    "ServiceUnavailable",
    "Unavailable",
    "InternalError",
];

impl ProviderError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::HttpError(_) | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, message } => {
                *status == 429 || *status >= 500 || mentions_transient_code(message)
            }
            ProviderError::CommandFailed { stderr, .. } => mentions_transient_code(stderr),
            ProviderError::Spawn { .. }
            | ProviderError::ParseError(_)
            | ProviderError::NotFound(_)
            | ProviderError::NotConfigured(_) => false,
        }
    }
}

fn mentions_transient_code(text: &str) -> bool {
    TRANSIENT_CODES.iter().any(|code| text.contains(code))
}

/// Compute-provider operations used by the backup workflow.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Look up an instance's zone, display name and attached volume count.
    async fn resolve_instance(
        &self,
        instance_id: &str,
        region: &str,
    ) -> Result<InstanceDetails, ProviderError>;

    /// Create an image of a running instance without rebooting it.
    ///
    /// An empty string means the provider returned no identifier.
    async fn create_image(
        &self,
        region: &str,
        instance_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String, ProviderError>;

    /// Observe an image's state and snapshot slots.
    async fn describe_image(
        &self,
        image_id: &str,
        region: &str,
    ) -> Result<ImageDescription, ProviderError>;

    /// Copy an image into another region.
    ///
    /// An empty string means the provider returned no identifier.
    async fn copy_image(
        &self,
        source_region: &str,
        source_image_id: &str,
        destination_region: &str,
        name: &str,
        description: &str,
    ) -> Result<String, ProviderError>;

    /// Apply every tag in `tags` to every resource in one call.
    async fn tag_resources(
        &self,
        region: &str,
        resource_ids: &[String],
        tags: &TagSet,
    ) -> Result<(), ProviderError>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

/// Resolves the placement of the machine this process runs on.
#[async_trait]
pub trait PlacementResolver: Send + Sync {
    async fn resolve_local_placement(&self) -> Result<LocalPlacement, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling_and_outages_are_transient() {
        let throttled = ProviderError::CommandFailed {
            program: "aws".into(),
            status: "exit status: 254".into(),
            stderr: "An error occurred (RequestLimitExceeded) when calling the CreateTags operation"
                .into(),
        };
        assert!(throttled.is_transient());
        assert!(ProviderError::ApiError { status: 503, message: "busy".into() }.is_transient());
        assert!(ProviderError::ApiError { status: 429, message: String::new() }.is_transient());
        assert!(ProviderError::Timeout(Duration::from_secs(2)).is_transient());
    }

    #[test]
    fn test_permanent_failures_are_not_transient() {
        let unauthorized = ProviderError::CommandFailed {
            program: "aws".into(),
            status: "exit status: 254".into(),
            stderr: "An error occurred (UnauthorizedOperation) when calling the CreateTags operation"
                .into(),
        };
        assert!(!unauthorized.is_transient());
        assert!(!ProviderError::NotFound("snap-1".into()).is_transient());
        assert!(!ProviderError::ApiError { status: 400, message: "InvalidParameter".into() }
            .is_transient());
        assert!(!ProviderError::ParseError("eof".into()).is_transient());
    }
}
