//! Applies a tag-set to created resources.
//!
//! One provider call per resource, carrying every tag at once, so a failed
//! call never leaves a resource half-tagged. Transient failures are
//! retried with backoff under the configured [`RetryPolicy`]; permanent
//! ones, or transient ones once retries run out, are fatal.

use backon::Retryable;
use std::time::Duration;

use ami_backup_core::TagSet;

use crate::error::{BackupError, Phase};
use crate::providers::{ImageProvider, ProviderError};
use crate::resilience::RetryPolicy;

pub struct ResourceTagger<'a> {
    provider: &'a dyn ImageProvider,
    retry: RetryPolicy,
}

impl<'a> ResourceTagger<'a> {
    pub fn new(provider: &'a dyn ImageProvider, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// Tag one resource.
    pub async fn tag(
        &self,
        phase: Phase,
        region: &str,
        resource_id: &str,
        tags: &TagSet,
    ) -> Result<(), BackupError> {
        let resource_ids = [resource_id.to_string()];
        let provider = self.provider;

        (|| async { provider.tag_resources(region, &resource_ids, tags).await })
            .retry(self.retry.backoff())
            .sleep(tokio::time::sleep)
            .when(ProviderError::is_transient)
            .notify(|err: &ProviderError, delay: Duration| {
                tracing::warn!(
                    phase = %phase,
                    resource_id = %resource_id,
                    error = %err,
                    retry_in = ?delay,
                    "Tagging failed, retrying"
                );
            })
            .await
            .map_err(|source| BackupError::Tagging {
                phase,
                resource_id: resource_id.to_string(),
                region: region.to_string(),
                source,
            })?;

        tracing::info!(
            phase = %phase,
            resource_id = %resource_id,
            region = %region,
            tags = tags.len(),
            "Tagged resource"
        );
        Ok(())
    }

    /// Tag each resource in turn, stopping at the first failure.
    pub async fn tag_each(
        &self,
        phase: Phase,
        region: &str,
        resource_ids: &[String],
        tags: &TagSet,
    ) -> Result<(), BackupError> {
        for resource_id in resource_ids {
            self.tag(phase, region, resource_id, tags).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::InMemoryProvider;

    const REGION: &str = "us-east-1";

    fn tags() -> TagSet {
        vec![
            ("Name".to_string(), "backup-ami@web-1".to_string()),
            ("Creator".to_string(), "test".to_string()),
        ]
        .into_iter()
        .collect()
    }

    async fn provider_and_image(tag_failures: usize) -> (InMemoryProvider, String) {
        let provider = InMemoryProvider::new()
            .with_instance("i-1", REGION, "us-east-1a", None, 1)
            .with_tag_failures(tag_failures);
        let image_id = provider
            .create_image(REGION, "i-1", "n", "d")
            .await
            .unwrap();
        (provider, image_id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_batched_call() {
        let (provider, image_id) = provider_and_image(0).await;
        let tagger = ResourceTagger::new(&provider, RetryPolicy::default());

        tagger
            .tag(Phase::TaggingImage, REGION, &image_id, &tags())
            .await
            .unwrap();

        let calls = provider.tag_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].resource_ids, vec![image_id.clone()]);
        assert_eq!(calls[0].tags, tags());
        assert_eq!(provider.tags_of(&image_id).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let (provider, image_id) = provider_and_image(2).await;
        let tagger = ResourceTagger::new(&provider, RetryPolicy::default());

        tagger
            .tag(Phase::TaggingImage, REGION, &image_id, &tags())
            .await
            .unwrap();

        assert_eq!(provider.tag_calls().len(), 3);
        assert_eq!(
            provider.tags_of(&image_id).get("Creator").map(String::as_str),
            Some("test")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_are_fatal() {
        let (provider, image_id) = provider_and_image(5).await;
        let tagger = ResourceTagger::new(&provider, RetryPolicy::default());

        let err = tagger
            .tag(Phase::TaggingImage, REGION, &image_id, &tags())
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Tagging { phase: Phase::TaggingImage, .. }));
        assert_eq!(provider.tag_calls().len(), 3);
        assert!(provider.tags_of(&image_id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let (provider, _) = provider_and_image(0).await;
        let tagger = ResourceTagger::new(&provider, RetryPolicy::default());
        let start = tokio::time::Instant::now();

        let err = tagger
            .tag(Phase::TaggingSnapshots, REGION, "snap-unknown", &tags())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BackupError::Tagging { source: ProviderError::NotFound(_), .. }
        ));
        assert_eq!(provider.tag_calls().len(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_policy_fails_first_time() {
        let (provider, image_id) = provider_and_image(1).await;
        let tagger = ResourceTagger::new(&provider, RetryPolicy::none());

        assert!(tagger
            .tag(Phase::TaggingImage, REGION, &image_id, &tags())
            .await
            .is_err());
        assert_eq!(provider.tag_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tag_each_stops_at_first_failure() {
        let (provider, image_id) = provider_and_image(0).await;
        let tagger = ResourceTagger::new(&provider, RetryPolicy::none());
        let ids = vec![image_id.clone(), "snap-unknown".to_string(), image_id.clone()];

        let err = tagger
            .tag_each(Phase::TaggingSnapshots, REGION, &ids, &tags())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BackupError::Tagging { ref resource_id, .. } if resource_id == "snap-unknown"
        ));
        assert_eq!(provider.tag_calls().len(), 2);
    }
}
