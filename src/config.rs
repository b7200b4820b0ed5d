use crate::history::SensorThresholds;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    #[serde(default = "default_live_feed_url")]
    pub live_feed_url: String,

    #[serde(default = "default_countdown_secs")]
    pub countdown_secs: u32,

    #[serde(default)]
    pub history_path: Option<PathBuf>,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sensors: SensorThresholds,
}

/// What the status poller does once its attempt budget runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// Treat the recording as finished and move on to analysis
    AssumeDone,
    /// Fail the run with `RecordingTimedOut`
    Fail,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,

    /// Ask the relay to hold each status request up to this long (0 = plain polling)
    #[serde(default)]
    pub long_poll_ms: u64,

    #[serde(default = "default_exhausted_policy")]
    pub on_exhausted: ExhaustedPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_analysis_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_progress_tick_ms")]
    pub progress_tick_ms: u64,

    #[serde(default = "default_progress_step")]
    pub progress_step: u8,

    #[serde(default = "default_progress_ceiling")]
    pub progress_ceiling: u8,

    #[serde(default)]
    pub require_artifact: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    #[serde(default = "default_camera_stream_url")]
    pub camera_stream_url: String,

    #[serde(default = "default_record_duration_secs")]
    pub record_duration_secs: u64,

    /// Extra time a capture may take past its length before it is abandoned
    #[serde(default = "default_capture_grace_secs")]
    pub capture_grace_secs: u64,

    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,

    #[serde(default = "default_analysis_url")]
    pub analysis_url: String,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
}

fn default_relay_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_live_feed_url() -> String {
    "http://192.168.1.143:81/stream".to_string()
}

fn default_countdown_secs() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_poll_max_attempts() -> u32 {
    20
}

fn default_exhausted_policy() -> ExhaustedPolicy {
    ExhaustedPolicy::AssumeDone
}

fn default_analysis_timeout_secs() -> u64 {
    120
}

fn default_progress_tick_ms() -> u64 {
    500
}

fn default_progress_step() -> u8 {
    5
}

fn default_progress_ceiling() -> u8 {
    95
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3001))
}

fn default_camera_stream_url() -> String {
    "http://192.168.1.143:81/stream".to_string()
}

fn default_record_duration_secs() -> u64 {
    30
}

fn default_capture_grace_secs() -> u64 {
    15
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_analysis_url() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_max_jobs() -> usize {
    16
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_poll_max_attempts(),
            long_poll_ms: 0,
            on_exhausted: default_exhausted_policy(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn long_poll(&self) -> Option<Duration> {
        (self.long_poll_ms > 0).then(|| Duration::from_millis(self.long_poll_ms))
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_analysis_timeout_secs(),
            progress_tick_ms: default_progress_tick_ms(),
            progress_step: default_progress_step(),
            progress_ceiling: default_progress_ceiling(),
            require_artifact: false,
        }
    }
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            camera_stream_url: default_camera_stream_url(),
            record_duration_secs: default_record_duration_secs(),
            capture_grace_secs: default_capture_grace_secs(),
            recordings_dir: default_recordings_dir(),
            analysis_url: default_analysis_url(),
            ffmpeg_path: default_ffmpeg_path(),
            max_jobs: default_max_jobs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            live_feed_url: default_live_feed_url(),
            countdown_secs: default_countdown_secs(),
            history_path: None,
            poll: PollConfig::default(),
            analysis: AnalysisConfig::default(),
            server: ServerConfig::default(),
            sensors: SensorThresholds::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.config/fireguard/config.json)
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `config_path`, writing defaults there if it is missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        tracing::info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Save configuration to `config_path`
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Directory holding the config file and, by default, the alert history
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            PathBuf::from(home).join(".config")
        };

        Ok(config_dir.join("fireguard"))
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// History file to use, defaulting next to the config file
    pub fn history_path(&self) -> Result<PathBuf> {
        match &self.history_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("history.json")),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.relay_url.is_empty() {
            return Err(anyhow::anyhow!("relay_url cannot be empty"));
        }

        if self.live_feed_url.is_empty() {
            return Err(anyhow::anyhow!("live_feed_url cannot be empty"));
        }

        if self.poll.interval_ms == 0 {
            return Err(anyhow::anyhow!("poll.interval_ms must be greater than 0"));
        }

        if self.poll.max_attempts == 0 {
            return Err(anyhow::anyhow!("poll.max_attempts must be greater than 0"));
        }

        if self.analysis.timeout_secs == 0 {
            return Err(anyhow::anyhow!("analysis.timeout_secs must be greater than 0"));
        }

        if self.analysis.progress_tick_ms == 0 {
            return Err(anyhow::anyhow!(
                "analysis.progress_tick_ms must be greater than 0"
            ));
        }

        if self.analysis.progress_step == 0 {
            return Err(anyhow::anyhow!(
                "analysis.progress_step must be greater than 0"
            ));
        }

        if self.analysis.progress_ceiling >= 100 {
            return Err(anyhow::anyhow!(
                "analysis.progress_ceiling must be below 100"
            ));
        }

        if self.server.analysis_url.is_empty() {
            return Err(anyhow::anyhow!("server.analysis_url cannot be empty"));
        }

        if self.server.max_jobs == 0 {
            return Err(anyhow::anyhow!("server.max_jobs must be greater than 0"));
        }

        Ok(())
    }
}
