//! # ami-backup-core
//!
//! Deterministic domain model for backing up a running instance into a
//! provider-managed machine image.
//!
//! Nothing in this crate performs I/O. It answers:
//! - What is the image called?
//! - Which tags does every created resource carry?
//! - When does the backup expire?
//! - What does a finished wait look like?
//!
//! ## Example
//!
//! ```rust
//! use ami_backup_core::{image_name, InstancePlacement, TagSet};
//! use chrono::{TimeZone, Utc};
//!
//! let placement = InstancePlacement::new("i-0abc", "us-east-1", "us-east-1a", Some("web server #1"));
//! let created_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
//! let name = image_name(&placement.display_name, created_at.timestamp());
//! assert_eq!(name, "backup-ami@webserver1-1700000000");
//!
//! let tags = TagSet::for_backup(&name, &placement, &created_at, "ami-backup", None);
//! assert_eq!(tags.get("Instance"), Some("i-0abc"));
//! ```

pub mod error;
pub mod expiry;
pub mod naming;
pub mod tags;
pub mod types;

// Re-export main types at crate root
pub use error::CoreError;
pub use expiry::parse_expiry;
pub use naming::{image_description, image_name, image_name_with_prefix, sanitize_name};
pub use tags::{format_timestamp, TagSet, DEFAULT_CREATOR};
pub use types::{
    effective_timeout, BackupRequest, ImageDescription, ImageRecord, ImageState,
    InstanceDetails, InstancePlacement, LocalPlacement, PollOutcome, DEFAULT_POLL_INTERVAL,
    DEFAULT_TIMEOUT,
};
