use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use ami_backup_core::{parse_expiry, BackupRequest};
use ami_backup_runtime::RuntimeConfig;

/// Back up a running instance into a machine image without rebooting it.
///
/// Missing instance id or region are looked up through the instance
/// metadata endpoint, so on the instance itself no options are required.
#[derive(Debug, Parser)]
#[command(name = "ami-backup", version, about, long_about = None)]
pub struct Cli {
    /// Credentials profile passed to the provider CLI
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Instance to back up (default: this instance)
    #[arg(short, long)]
    pub instance_id: Option<String>,

    /// Region the instance runs in (default: this instance's region)
    #[arg(short, long)]
    pub region: Option<String>,

    /// Expiry stamped on every resource: "+1 week", "2025-01-31", "@1700000000"
    #[arg(short, long, value_parser = parse_expire)]
    pub expire: Option<DateTime<Utc>>,

    /// Also copy the image into this region
    #[arg(short, long)]
    pub destination_region: Option<String>,

    /// Seconds to wait for each asynchronous step (0 keeps the default)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Report format on success
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// More log output (repeatable)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Less log output (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Default log filter for the verbosity flags; `RUST_LOG` wins over it.
    pub fn log_filter(&self) -> &'static str {
        match (self.verbose, self.quiet) {
            (0, 0) => "info",
            (0, 1) => "warn",
            (0, _) => "error",
            (1, _) => "debug",
            _ => "trace",
        }
    }

    /// Build the request, letting flags override the config file.
    pub fn request(&self, config: &RuntimeConfig) -> BackupRequest {
        let timeout = match self.timeout {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => config.timeout,
        };

        BackupRequest {
            instance_id: self.instance_id.clone(),
            region: self.region.clone(),
            destination_region: self.destination_region.clone(),
            expire: self.expire,
            profile: self.profile.clone(),
            ..Default::default()
        }
        .with_timeout(timeout)
    }

    /// Whether placement must come from the metadata endpoint.
    pub fn needs_local_placement(&self) -> bool {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        blank(&self.instance_id) || blank(&self.region)
    }
}

fn parse_expire(expr: &str) -> Result<DateTime<Utc>, String> {
    parse_expiry(expr, Utc::now()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "ami-backup",
            "--instance-id",
            "i-0abc",
            "--region",
            "us-east-1",
            "--timeout",
            "60",
        ]);
        let config = RuntimeConfig {
            timeout: Duration::from_secs(3600),
            ..Default::default()
        };

        let request = cli.request(&config);
        assert_eq!(request.timeout, Duration::from_secs(60));
        assert_eq!(request.instance_id.as_deref(), Some("i-0abc"));
        assert!(!cli.needs_local_placement());
    }

    #[test]
    fn test_zero_timeout_uses_config() {
        let cli = Cli::parse_from(["ami-backup", "--timeout", "0"]);
        let config = RuntimeConfig {
            timeout: Duration::from_secs(3600),
            ..Default::default()
        };
        assert_eq!(cli.request(&config).timeout, Duration::from_secs(3600));
        assert!(cli.needs_local_placement());
    }

    #[test]
    fn test_relative_expiry_is_in_the_future() {
        let cli = Cli::parse_from(["ami-backup", "--expire", "+1 week"]);
        assert!(cli.expire.unwrap() > Utc::now());
    }

    #[test]
    fn test_bad_expiry_is_usage_error() {
        let err = Cli::try_parse_from(["ami-backup", "--expire", "someday"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let err = Cli::try_parse_from(["ami-backup", "--expire", "+1000000 years"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(Cli::parse_from(["ami-backup"]).log_filter(), "info");
        assert_eq!(Cli::parse_from(["ami-backup", "-v"]).log_filter(), "debug");
        assert_eq!(Cli::parse_from(["ami-backup", "-qq"]).log_filter(), "error");
        assert!(Cli::try_parse_from(["ami-backup", "-v", "-q"]).is_err());
    }
}
