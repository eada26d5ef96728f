//! # ami-backup-runtime
//!
//! Async backup workflow for one running instance.
//!
//! This crate owns everything that talks to the outside world or waits on
//! it: provider clients, instance-metadata lookup, the convergence poller
//! and its two checks, the resource tagger, and the orchestrator that
//! strings them together.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ami_backup_core::BackupRequest;
//! use ami_backup_runtime::{AwsCliProvider, BackupOrchestrator, RuntimeConfig};
//!
//! let provider = Arc::new(AwsCliProvider::new(Some("backup".into())));
//! let orchestrator = BackupOrchestrator::new(provider, RuntimeConfig::default());
//!
//! let request = BackupRequest::for_instance("i-0abc", "us-east-1").with_destination("eu-west-1");
//! let report = orchestrator.run(&request).await?;
//! println!("{}", report.image.image_id);
//! ```

pub mod cancel;
pub mod config;
pub mod convergence;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod resilience;
pub mod tagger;

pub use cancel::{CancelHandle, Cancellation, Cancelled};
pub use config::{ConfigError, MetadataConfig, RuntimeConfig, DEFAULT_METADATA_ENDPOINT};
pub use convergence::{
    ConvergencePoller, ImageStateCheck, OvershootPolicy, Probe, SnapshotConvergenceCheck,
};
pub use error::{BackupError, Phase};
pub use orchestrator::{BackupOrchestrator, BackupReport};
pub use providers::{
    AwsCliProvider, ImageProvider, InMemoryProvider, PlacementResolver, ProviderError,
};
#[cfg(feature = "imds")]
pub use providers::InstanceMetadataResolver;
pub use resilience::RetryPolicy;
pub use tagger::ResourceTagger;
