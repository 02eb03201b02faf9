use anyhow::Context;
use clap::Parser;
use ingest_service::{shutdown_channel, IngestLoop, SystemClock};
use reddit_client::{RedditClient, RedditCommentSource, RedditCredentials};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracker_core::{
    TrackerConfig, TriggerSet, DEFAULT_CONFIG_FILE, DEFAULT_SUBREDDIT, DEFAULT_TRIGGERS_FILE,
};

const DEFAULT_LOG_FILTER: &str = "comment_tracker=info,ingest_service=info";

/// Stores live Reddit comments that mention any trigger phrase.
#[derive(Debug, Parser)]
#[command(name = "comment-tracker", version, about)]
struct Cli {
    /// Subreddit to listen to
    #[arg(short, long, default_value = DEFAULT_SUBREDDIT)]
    subreddit: String,

    /// File with one trigger phrase per line
    #[arg(short, long, default_value = DEFAULT_TRIGGERS_FILE)]
    triggers: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    let config = TrackerConfig::load_or_default(Path::new(DEFAULT_CONFIG_FILE))
        .with_context(|| format!("Failed to load {}", DEFAULT_CONFIG_FILE))?;
    let triggers = TriggerSet::load(&cli.triggers)
        .with_context(|| format!("Failed to load triggers from {}", cli.triggers.display()))?;
    if triggers.is_empty() {
        tracing::warn!("{} has no trigger phrases, nothing will be stored", cli.triggers.display());
    }

    let credentials = RedditCredentials::load(&config.credentials_path).with_context(|| {
        format!(
            "Failed to load credentials from {}",
            config.credentials_path.display()
        )
    })?;
    let client = Arc::new(RedditClient::new(credentials)?);
    let source = RedditCommentSource::new(client, cli.subreddit, config.poll_interval());

    let (shutdown, signal) = shutdown_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, shutting down");
                shutdown.trigger();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    tracing::info!("Starting comment-tracker");
    let ingest = IngestLoop::new(
        source,
        SystemClock,
        triggers,
        &config.data_dir,
        config.backoff(),
        signal,
    );
    let stats = ingest.run().await?;

    tracing::info!(
        "Saw {} comments, matched {}, stored {} ({} duplicates, {} skipped, {} faults, {} rotations)",
        stats.events_seen,
        stats.matched,
        stats.stored,
        stats.duplicates,
        stats.skipped,
        stats.faults,
        stats.rotations
    );
    Ok(())
}
