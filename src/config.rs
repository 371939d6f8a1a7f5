//! Configuration for reelflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (REELFLOW_HOME, REELFLOW_NOTIFY_URL)
//! 2. Config file (.reelflow/config.yaml)
//! 3. Defaults (~/.reelflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .reelflow/config.yaml
//! - Paths in config file are relative to the .reelflow/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::WebhookConfig;
use crate::core::{ConsumerSettings, DeadLetterPolicy, OrchestratorSettings, RetentionPolicy};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub orchestrator: Option<OrchestratorConfig>,
    #[serde(default)]
    pub worker: Option<WorkerConfig>,
    #[serde(default)]
    pub notifier: Option<NotifierConfig>,
    #[serde(default)]
    pub retention: Option<RetentionConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .reelflow/)
    pub home: Option<String>,
    /// SQLite database file (relative to home)
    pub database: Option<String>,
    /// Topic queue directory (relative to home)
    pub queues: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub max_dequeue_count: Option<u32>,
    pub conflict_retries: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub poll_interval_ms: Option<u64>,
    pub visibility_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
    pub hub: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    pub terminal_retention_hours: Option<i64>,
    pub stale_after_minutes: Option<i64>,
    pub sweep_interval_minutes: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to reelflow home (engine state)
    pub home: PathBuf,
    /// SQLite database holding the video records
    pub database: PathBuf,
    /// Directory of the topic queues
    pub queues: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub orchestrator: OrchestratorTunables,
    pub worker: WorkerSettings,
    pub notifier: NotifierSettings,
    pub retention: RetentionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorTunables {
    pub max_dequeue_count: u32,
    pub conflict_retries: u32,
}

impl Default for OrchestratorTunables {
    fn default() -> Self {
        Self {
            max_dequeue_count: 5,
            conflict_retries: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub poll_interval_ms: u64,
    pub visibility_timeout_seconds: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            visibility_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierSettings {
    /// Hub base URL; log notifications only when unset
    pub webhook_url: Option<String>,
    pub hub: String,
    pub timeout_seconds: u64,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            hub: "main".to_string(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSettings {
    pub terminal_retention_hours: i64,
    pub stale_after_minutes: i64,
    pub sweep_interval_minutes: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            terminal_retention_hours: 24,
            stale_after_minutes: 120,
            sweep_interval_minutes: 30,
        }
    }
}

impl ResolvedConfig {
    /// Defaults rooted at `home`
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            database: home.join("reelflow.db"),
            queues: home.join("queues"),
            home,
            config_file: None,
            orchestrator: OrchestratorTunables::default(),
            worker: WorkerSettings::default(),
            notifier: NotifierSettings::default(),
            retention: RetentionSettings::default(),
        }
    }

    pub fn dead_letter_policy(&self) -> DeadLetterPolicy {
        DeadLetterPolicy::new(self.orchestrator.max_dequeue_count)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            conflict_retries: self.orchestrator.conflict_retries,
        }
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            visibility_timeout: Duration::from_secs(self.worker.visibility_timeout_seconds),
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            terminal_retention: chrono::Duration::hours(self.retention.terminal_retention_hours),
            stale_after: chrono::Duration::minutes(self.retention.stale_after_minutes),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_minutes.max(1) * 60)
    }

    /// Webhook settings, if a hub URL is configured
    pub fn webhook(&self) -> Option<WebhookConfig> {
        self.notifier.webhook_url.as_ref().map(|url| WebhookConfig {
            base_url: url.clone(),
            hub: self.notifier.hub.clone(),
            timeout_seconds: self.notifier.timeout_seconds,
        })
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".reelflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file over the defaults
fn resolve(
    file: ConfigFile,
    config_path: Option<&Path>,
    default_home: PathBuf,
    env_home: Option<String>,
    env_notify_url: Option<String>,
) -> ResolvedConfig {
    let config_dir = config_path
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));

    let home = if let Some(env_home) = env_home {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = file.paths.home {
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let mut config = ResolvedConfig::with_home(home);
    config.config_file = config_path.map(Path::to_path_buf);

    if let Some(ref database) = file.paths.database {
        config.database = resolve_path(&config.home, database);
    }
    if let Some(ref queues) = file.paths.queues {
        config.queues = resolve_path(&config.home, queues);
    }

    if let Some(o) = file.orchestrator {
        let defaults = OrchestratorTunables::default();
        config.orchestrator = OrchestratorTunables {
            max_dequeue_count: o.max_dequeue_count.unwrap_or(defaults.max_dequeue_count),
            conflict_retries: o.conflict_retries.unwrap_or(defaults.conflict_retries),
        };
    }

    if let Some(w) = file.worker {
        let defaults = WorkerSettings::default();
        config.worker = WorkerSettings {
            poll_interval_ms: w.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
            visibility_timeout_seconds: w
                .visibility_timeout_seconds
                .unwrap_or(defaults.visibility_timeout_seconds),
        };
    }

    if let Some(n) = file.notifier {
        let defaults = NotifierSettings::default();
        config.notifier = NotifierSettings {
            webhook_url: n.webhook_url.filter(|u| !u.trim().is_empty()),
            hub: n.hub.unwrap_or(defaults.hub),
            timeout_seconds: n.timeout_seconds.unwrap_or(defaults.timeout_seconds),
        };
    }
    if let Some(url) = env_notify_url.filter(|u| !u.trim().is_empty()) {
        config.notifier.webhook_url = Some(url);
    }

    if let Some(r) = file.retention {
        let defaults = RetentionSettings::default();
        config.retention = RetentionSettings {
            terminal_retention_hours: r
                .terminal_retention_hours
                .unwrap_or(defaults.terminal_retention_hours),
            stale_after_minutes: r.stale_after_minutes.unwrap_or(defaults.stale_after_minutes),
            sweep_interval_minutes: r
                .sweep_interval_minutes
                .unwrap_or(defaults.sweep_interval_minutes),
        };
    }

    config
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".reelflow");

    let config_file = find_config_file();
    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    Ok(resolve(
        file,
        config_file.as_deref(),
        default_home,
        std::env::var("REELFLOW_HOME").ok(),
        std::env::var("REELFLOW_NOTIFY_URL").ok(),
    ))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the reelflow home directory (engine state)
pub fn reelflow_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}
