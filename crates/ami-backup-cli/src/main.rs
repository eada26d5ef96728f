//! ami-backup
//!
//! Creates a no-reboot image of a running instance, tags the image and its
//! snapshots, and optionally copies it into a second region.
//!
//! Usage:
//!   ami-backup                                    # back up this instance
//!   ami-backup -i i-0abc -r us-east-1 -e "+1 week" -d eu-west-1
//!
//! Logs go to stderr; the resulting image ids go to stdout. Exit status is
//! 0 only when every requested step finished.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "imds")]
use ami_backup_runtime::InstanceMetadataResolver;
use ami_backup_runtime::{
    AwsCliProvider, BackupOrchestrator, BackupReport, Cancellation, RuntimeConfig,
};

use cli::{Cli, OutputFormat};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Backup failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    let request = cli.request(&config);

    let provider = Arc::new(AwsCliProvider::new(request.profile.clone()));
    let mut orchestrator = BackupOrchestrator::new(provider, config.clone());
    if cli.needs_local_placement() {
        orchestrator = with_metadata_lookup(orchestrator, &config)?;
    }

    let (cancel, cancellation) = Cancellation::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping at the next wait");
            cancel.cancel();
        }
    });
    orchestrator = orchestrator.with_cancellation(cancellation);

    let report = orchestrator.run(&request).await?;

    match cli.output {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&report).context("Failed to encode report")?;
            println!("{}", json);
        }
        OutputFormat::Text => print_text(&report),
    }
    Ok(())
}

#[cfg(feature = "imds")]
fn with_metadata_lookup(
    orchestrator: BackupOrchestrator,
    config: &RuntimeConfig,
) -> Result<BackupOrchestrator> {
    let resolver =
        InstanceMetadataResolver::new(&config.metadata.endpoint, config.metadata.timeout)
            .context("Failed to set up instance metadata lookup")?;
    Ok(orchestrator.with_resolver(Arc::new(resolver)))
}

/// Built without metadata lookup: a missing id or region fails during resolution.
#[cfg(not(feature = "imds"))]
fn with_metadata_lookup(
    orchestrator: BackupOrchestrator,
    _config: &RuntimeConfig,
) -> Result<BackupOrchestrator> {
    tracing::warn!("Instance metadata lookup not compiled in; pass --instance-id and --region");
    Ok(orchestrator)
}

fn print_text(report: &BackupReport) {
    for image in std::iter::once(&report.image).chain(report.replica.as_ref()) {
        println!(
            "{}\t{}\t{}\t{}",
            image.image_id,
            image.region,
            image.name,
            image.snapshot_ids.join(",")
        );
    }
}
