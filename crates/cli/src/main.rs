//! Command-line tools for Ferry.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ferry_core::config::AppConfig;
use ferry_core::{CopiedBlob, SourceUri, UploadWorkItem};
use ferry_ingest::{RemoteCopyUploader, resolve_remote_copy};
use ferry_relay::{
    HttpConnector, JobResult, PlaceholderFormatter, RelayHandler, RuleEvent, TopicAction,
};
use ferry_storage::StorageError;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(about = "Command-line tools for Ferry asset ingestion")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "FERRY_CONFIG",
        default_value = "config/ferry.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy a source into a scratch slot, report its fingerprint, then delete it
    Probe {
        /// Source URI to copy from
        #[arg(long)]
        source: String,
        /// File name the fingerprint is computed for
        #[arg(long)]
        name: String,
        /// MIME type the caller declares; echoed in the report
        #[arg(long)]
        mime_type: Option<String>,
    },
    /// Topic relay commands
    Relay {
        #[command(subcommand)]
        command: RelayCommands,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum RelayCommands {
    /// Render a topic action against an event and send it once
    Send {
        /// Messaging namespace host
        #[arg(long)]
        hostname: String,
        /// Topic to publish to
        #[arg(long)]
        topic: String,
        /// Shared access key name
        #[arg(long)]
        access_key_name: Option<String>,
        /// Shared access key
        #[arg(long)]
        access_key: Option<String>,
        /// Message template; the event envelope is sent when omitted
        #[arg(long)]
        payload: Option<String>,
        /// Event type recorded in the envelope
        #[arg(long, default_value = "ManualTrigger")]
        event_type: String,
        /// Event payload as JSON
        #[arg(long, default_value = "{}")]
        data: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Load and validate the configuration
    Check,
}

#[derive(Serialize)]
struct ProbeReport {
    fingerprint: String,
    mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    declared_mime_type: Option<String>,
    size: u64,
    backend: &'static str,
}

impl ProbeReport {
    fn new(item: &UploadWorkItem, blob: &CopiedBlob, backend: &'static str) -> Self {
        Self {
            fingerprint: blob.fingerprint.to_string(),
            mime_type: blob.mime_type.clone(),
            declared_mime_type: item.declared_mime_type.clone(),
            size: blob.size,
            backend,
        }
    }
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if Path::new(path).exists() {
        tracing::debug!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("FERRY_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn probe(
    config: &AppConfig,
    source: &str,
    name: &str,
    mime_type: Option<String>,
) -> Result<()> {
    let source = SourceUri::parse(source).context("invalid --source")?;
    let files = ferry_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    let remote = resolve_remote_copy(files.as_ref(), Some(&config.storage))
        .await
        .context("storage cannot copy remote sources")?;
    let uploader = RemoteCopyUploader::new(remote, &config.ingest);

    let mut item = UploadWorkItem::new(source, name);
    if let Some(mime_type) = mime_type {
        item = item.with_declared_mime_type(mime_type);
    }
    let scratch_key = uploader.scratch_key(&item.scratch_id);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let result = uploader.copy_and_hash(&mut item, &cancel).await;

    match files.delete(&scratch_key).await {
        Ok(()) | Err(StorageError::NotFound(_)) => {}
        Err(e) => tracing::warn!(scratch = %scratch_key, error = %e, "Failed to delete scratch slot"),
    }

    let blob = result.context("probe failed")?;
    let report = ProbeReport::new(&item, &blob, uploader.backend_name());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn relay_send(config: &AppConfig, action: TopicAction, event: RuleEvent) -> Result<()> {
    action.validate().context("invalid topic action")?;
    let (description, job) = action
        .create_job(&event, &PlaceholderFormatter)
        .context("failed to render topic action")?;

    let connector = HttpConnector::new(&config.relay).context("failed to build relay client")?;
    let handler = RelayHandler::new(Arc::new(connector), &config.relay, &config.pool);
    tracing::info!(description = %description, "Relaying event");
    let result = handler.execute(&job).await;
    handler.shutdown().await;

    match result {
        JobResult::Complete => {
            println!("{description}");
            Ok(())
        }
        JobResult::Failed(reason) => anyhow::bail!("relay failed: {reason}"),
    }
}

fn print_config_summary(config: &AppConfig) {
    println!("configuration ok");
    println!("  storage: {}", config.storage.backend_name());
    println!(
        "  ingest: poll every {}ms, scratch prefix '{}'",
        config.ingest.poll_interval_ms, config.ingest.scratch_prefix
    );
    println!("  pool: ttl {}s", config.pool.ttl_secs);
    println!(
        "  relay: sender '{}' over {}, bearer token {}",
        config.relay.sender_identifier,
        config.relay.transport.scheme(),
        if config.relay.bearer_token.is_some() { "set" } else { "unset" }
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Probe {
            source,
            name,
            mime_type,
        } => probe(&config, &source, &name, mime_type).await,
        Commands::Relay {
            command:
                RelayCommands::Send {
                    hostname,
                    topic,
                    access_key_name,
                    access_key,
                    payload,
                    event_type,
                    data,
                },
        } => {
            let data = serde_json::from_str(&data).context("--data is not valid JSON")?;
            let action = TopicAction {
                hostname,
                topic_name: topic,
                access_key_name,
                access_key,
                payload,
            };
            relay_send(&config, action, RuleEvent::new(event_type, data)).await
        }
        Commands::Config {
            command: ConfigCommands::Check,
        } => {
            print_config_summary(&config);
            Ok(())
        }
    }
}
