//! Placement lookup through the local instance-metadata endpoint.
//!
//! Uses the session-token handshake when the endpoint offers it and falls
//! back to plain GETs when it does not. The session token never leaves
//! this module unwrapped.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use ami_backup_core::LocalPlacement;

use super::{PlacementResolver, ProviderError};

const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECS: &str = "300";

/// Derive a region from an availability zone by dropping the zone letter.
///
/// `us-east-1a` becomes `us-east-1`.
pub fn region_from_zone(availability_zone: &str) -> Option<String> {
    let region = availability_zone.trim_end_matches(|c: char| c.is_ascii_lowercase());
    if region.is_empty() || region.len() == availability_zone.len() {
        return None;
    }
    Some(region.to_string())
}

/// [`PlacementResolver`] for code running on the instance itself.
pub struct InstanceMetadataResolver {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl std::fmt::Debug for InstanceMetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceMetadataResolver")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl InstanceMetadataResolver {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let endpoint = endpoint.into();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ProviderError::NotConfigured(
                "metadata endpoint must start with http:// or https://".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::HttpError(e.to_string())
        }
    }

    async fn session_token(&self) -> Option<SecretString> {
        let response = self
            .client
            .put(format!("{}/latest/api/token", self.endpoint))
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECS)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "Metadata token unavailable, using plain requests");
            return None;
        }
        response.text().await.ok().map(SecretString::from)
    }

    async fn get(&self, path: &str, token: Option<&SecretString>) -> Result<String, ProviderError> {
        let mut request = self
            .client
            .get(format!("{}/latest/meta-data/{}", self.endpoint, path));
        if let Some(token) = token {
            request = request.header(TOKEN_HEADER, token.expose_secret());
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: format!("metadata path '{}'", path),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        let value = body.trim();
        if value.is_empty() {
            return Err(ProviderError::ParseError(format!(
                "metadata path '{}' is empty",
                path
            )));
        }
        Ok(value.to_string())
    }
}

#[async_trait]
impl PlacementResolver for InstanceMetadataResolver {
    async fn resolve_local_placement(&self) -> Result<LocalPlacement, ProviderError> {
        let token = self.session_token().await;
        let token = token.as_ref();

        let instance_id = self.get("instance-id", token).await?;
        let availability_zone = self.get("placement/availability-zone", token).await?;

        let region = match self.get("placement/region", token).await {
            Ok(region) => region,
            Err(e) => {
                tracing::debug!(error = %e, "Region not published, deriving from zone");
                region_from_zone(&availability_zone).ok_or_else(|| {
                    ProviderError::ParseError(format!(
                        "cannot derive region from zone '{}'",
                        availability_zone
                    ))
                })?
            }
        };

        tracing::info!(
            instance_id = %instance_id,
            region = %region,
            availability_zone = %availability_zone,
            "Resolved local placement"
        );

        Ok(LocalPlacement {
            instance_id,
            region,
            availability_zone,
        })
    }
}
