//! Command-line interface for reelflow.
//!
//! Provides commands for running the orchestrator, submitting jobs,
//! publishing worker results, inspecting videos and queues, and running
//! the retention sweep.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use crate::adapters::{LogNotifier, StatusNotifier, WebhookNotifier};
use crate::bus::FileBus;
use crate::config::{self, ResolvedConfig};
use crate::core::{
    Consumer, Orchestrator, RetentionSweeper, SqliteVideoStore, VideoStore,
};
use crate::domain::messages::JobDeleted;
use crate::domain::{topics, CreateVideo, InboundEvent, Job, VideoKey};

/// reelflow - Message-driven video generation orchestrator
#[derive(Parser, Debug)]
#[command(name = "reelflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the consumer loops and the retention sweep
    Serve {
        /// Process everything currently queued, then exit
        #[arg(long)]
        once: bool,
    },

    /// Fire a job: publish a creation event for it
    Submit {
        /// Job definition (YAML or JSON)
        job_file: PathBuf,
    },

    /// Publish a raw payload onto an inbound topic
    Publish {
        /// Topic name (e.g. content-response)
        topic: String,

        /// JSON payload file
        payload_file: PathBuf,
    },

    /// Show a video record
    Status {
        job_id: String,
        video_id: String,
    },

    /// List the videos of a job
    List {
        job_id: String,
    },

    /// Show queue depths and dead letters per topic
    Queues,

    /// Run the retention sweep and compact the queue logs once
    Sweep,

    /// Delete every video of a job
    DeleteJob {
        job_id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve { once } => serve(once).await,
            Commands::Submit { job_file } => submit(&job_file).await,
            Commands::Publish {
                topic,
                payload_file,
            } => publish(&topic, &payload_file).await,
            Commands::Status { job_id, video_id } => show_status(&job_id, &video_id).await,
            Commands::List { job_id } => list_videos(&job_id).await,
            Commands::Queues => show_queues().await,
            Commands::Sweep => sweep().await,
            Commands::DeleteJob { job_id } => delete_job(&job_id).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Components wired from configuration
struct Runtime {
    config: &'static ResolvedConfig,
    store: Arc<dyn VideoStore>,
    bus: FileBus,
    notifier: Arc<dyn StatusNotifier>,
}

impl Runtime {
    fn open() -> Result<Self> {
        let config = config::config()?;

        let store = SqliteVideoStore::open(&config.database).with_context(|| {
            format!("Failed to open video store: {}", config.database.display())
        })?;

        let notifier: Arc<dyn StatusNotifier> = match config.webhook() {
            Some(webhook) => Arc::new(WebhookNotifier::new(webhook)?),
            None => Arc::new(LogNotifier),
        };

        Ok(Self {
            config,
            store: Arc::new(store),
            bus: FileBus::new(config.queues.clone()),
            notifier,
        })
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.store),
            Arc::new(self.bus.clone()),
            Arc::clone(&self.notifier),
        )
        .with_settings(self.config.orchestrator_settings())
    }

    fn sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(
            Arc::clone(&self.store),
            Arc::clone(&self.notifier),
            self.config.retention_policy(),
        )
    }
}

/// Run the orchestrator until Ctrl-C
async fn serve(once: bool) -> Result<()> {
    let runtime = Runtime::open()?;
    let consumer = Arc::new(Consumer::new(
        Arc::new(runtime.orchestrator()),
        runtime.bus.clone(),
        runtime.config.dead_letter_policy(),
        runtime.config.consumer_settings(),
    ));

    if once {
        let handled = consumer.drain().await?;
        println!("Processed {} message(s)", handled);
        return Ok(());
    }

    info!(
        queues = %runtime.config.queues.display(),
        notifier = runtime.notifier.name(),
        "Orchestrator starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = consumer.spawn_all(shutdown_rx.clone());

    let sweeper = runtime.sweeper();
    let sweep_bus = runtime.bus.clone();
    let interval = runtime.config.sweep_interval();
    let mut sweep_shutdown = shutdown_rx;
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = sweep_shutdown.changed() => {
                    if *sweep_shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = sweeper.sweep(Utc::now()).await {
                        error!(error = %e, "Retention sweep failed");
                    }
                    if let Err(e) = sweep_bus.compact().await {
                        error!(error = %e, "Queue compaction failed");
                    }
                }
            }
        }
    }));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown signal received, stopping consumers");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Consumer task panicked");
        }
    }

    info!("Orchestrator stopped");
    Ok(())
}

/// Load a job definition (YAML is a superset of JSON)
fn load_job(path: &Path) -> Result<Job> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse job file: {}", path.display()))
}

async fn submit(job_file: &Path) -> Result<()> {
    let runtime = Runtime::open()?;
    let job = load_job(job_file)?;

    if job.id.trim().is_empty() || job.user_id.trim().is_empty() {
        anyhow::bail!("Job needs both an id and a userId");
    }

    let event = CreateVideo {
        request_date: Utc::now(),
        job,
    };
    let key = event.video_key();
    let payload = serde_json::to_string(&event)?;

    runtime
        .bus
        .publish_raw(topics::GENERATE_VIDEO, payload)
        .await?;

    println!("Submitted job {} as video {}", key.job_id, key.video_id);
    Ok(())
}

async fn publish(topic: &str, payload_file: &Path) -> Result<()> {
    let runtime = Runtime::open()?;
    let payload = std::fs::read_to_string(payload_file)
        .with_context(|| format!("Failed to read payload: {}", payload_file.display()))?;

    // Reject payloads the consumer could never decode
    let event = InboundEvent::decode(topic, &payload)?;
    let id = runtime.bus.publish_raw(event.topic(), payload).await?;

    println!("Published {} to {}", id, topic);
    Ok(())
}

async fn show_status(job_id: &str, video_id: &str) -> Result<()> {
    let video_id = Uuid::parse_str(video_id)
        .with_context(|| format!("Invalid video ID: {}", video_id))?;
    let key = VideoKey::new(job_id, video_id);

    let runtime = Runtime::open()?;
    let video = runtime
        .store
        .get(&key)
        .await?
        .with_context(|| format!("Video not found: {}", key))?;

    println!("{}", serde_json::to_string_pretty(&video)?);
    Ok(())
}

async fn list_videos(job_id: &str) -> Result<()> {
    let runtime = Runtime::open()?;
    let videos = runtime.store.list_job(job_id).await?;

    if videos.is_empty() {
        println!("No videos found for job {}", job_id);
        return Ok(());
    }

    println!("{:<38} {:<12} {:<8} {:<25}", "VIDEO ID", "STATUS", "VERSION", "UPDATED");
    println!("{}", "-".repeat(85));

    for video in videos {
        println!(
            "{:<38} {:<12} {:<8} {:<25}",
            video.video_id,
            video.status.to_string(),
            video.version,
            video.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(error) = &video.error {
            println!("  error: {}", error);
        }
    }

    Ok(())
}

async fn show_queues() -> Result<()> {
    let runtime = Runtime::open()?;

    let mut all_topics: Vec<&str> = topics::INBOUND.to_vec();
    all_topics.extend([
        topics::REQUEST_CONTENT,
        topics::REQUEST_TRANSLATION,
        topics::REQUEST_SPEECH,
        topics::REQUEST_AUDIO_BACKGROUND,
        topics::REQUEST_VIDEO_BACKGROUND,
        topics::REQUEST_STITCH,
        topics::REQUEST_UPLOAD,
    ]);

    println!(
        "{:<26} {:>7} {:>7} {:>7} {:>7}",
        "TOPIC", "READY", "LEASED", "ACKED", "DEAD"
    );
    println!("{}", "-".repeat(60));

    for topic in all_topics {
        let queue = runtime.bus.queue(topic);
        let stats = queue.stats().await?;
        println!(
            "{:<26} {:>7} {:>7} {:>7} {:>7}",
            topic, stats.ready, stats.leased, stats.acked, stats.dead_lettered
        );

        for dead in queue.dead_letters().await? {
            println!(
                "  dead {} (deliveries: {}): {}",
                dead.id,
                dead.dequeue_count,
                dead.last_error.unwrap_or_default()
            );
        }
    }

    Ok(())
}

async fn sweep() -> Result<()> {
    let runtime = Runtime::open()?;
    let report = runtime.sweeper().sweep(Utc::now()).await?;
    let compacted = runtime
        .bus
        .compact()
        .await
        .context("Failed to compact queue logs")?;

    println!(
        "Deleted {} finished video(s), expired {} stale video(s)",
        report.deleted, report.expired
    );
    println!("Dropped {} acked message(s) from queue logs", compacted);
    Ok(())
}

async fn delete_job(job_id: &str) -> Result<()> {
    let runtime = Runtime::open()?;
    let event = JobDeleted {
        job_id: job_id.to_string(),
    };
    runtime.orchestrator().handle_job_deleted(&event).await?;

    println!("Deleted videos of job {}", job_id);
    Ok(())
}

async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Reelflow Configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database.display());
    println!("  Queues:   {}", cfg.queues.display());
    println!();
    println!("Orchestrator:");
    println!("  Max dequeue count: {}", cfg.orchestrator.max_dequeue_count);
    println!("  Conflict retries:  {}", cfg.orchestrator.conflict_retries);
    println!();
    println!("Worker:");
    println!("  Poll interval:      {}ms", cfg.worker.poll_interval_ms);
    println!("  Visibility timeout: {}s", cfg.worker.visibility_timeout_seconds);
    println!();
    println!("Notifier:");
    match &cfg.notifier.webhook_url {
        Some(url) => println!("  Webhook: {} (hub: {})", url, cfg.notifier.hub),
        None => println!("  Log only"),
    }
    println!();
    println!("Retention:");
    println!("  Terminal retention: {}h", cfg.retention.terminal_retention_hours);
    println!("  Stale after:        {}m", cfg.retention.stale_after_minutes);
    println!("  Sweep interval:     {}m", cfg.retention.sweep_interval_minutes);

    Ok(())
}
