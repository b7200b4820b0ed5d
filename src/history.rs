//! Alert history and sensor telemetry access
//!
//! Persistence is an external collaborator of the workflow. [`HistoryStore`]
//! is the narrow interface the analysis requester needs from it.

use crate::messages::Verdict;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, SecondsFormat, TimeZone};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// One analyzed incident as stored in the alert history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricEvent {
    /// `true` when the scene was judged safe, `false` for danger
    pub state: bool,
    pub date: String,
    pub time: String,
    pub temperature: f64,
    pub gaz: f64,
    pub created_at: String,
}

impl HistoricEvent {
    pub fn new<Tz: TimeZone>(
        verdict: Verdict,
        reading: Option<&SensorReading>,
        at: &DateTime<Tz>,
    ) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            state: verdict.is_safe(),
            date: at.format("%Y-%m-%d").to_string(),
            time: at.format("%H:%M").to_string(),
            temperature: reading.map(|r| r.temperature).unwrap_or_default(),
            gaz: reading.map(|r| r.gas_level).unwrap_or_default(),
            created_at: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn now(verdict: Verdict, reading: Option<&SensorReading>) -> Self {
        Self::new(verdict, reading, &Local::now())
    }

    /// The sensor that dominated this event: temperature unless gas read higher
    pub fn headline(&self) -> String {
        if self.temperature >= self.gaz {
            format!("temperature {:.1}°C", self.temperature)
        } else {
            format!("gas {:.1}ppm", self.gaz)
        }
    }
}

/// Which historic events to list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum HistoryFilter {
    #[default]
    All,
    /// Events where the temperature reading exceeded the gas reading
    Temperature,
    /// Events where the gas reading exceeded the temperature reading
    Smoke,
}

impl HistoryFilter {
    pub fn matches(&self, event: &HistoricEvent) -> bool {
        match self {
            HistoryFilter::All => true,
            HistoryFilter::Temperature => event.temperature > event.gaz,
            HistoryFilter::Smoke => event.gaz > event.temperature,
        }
    }

    pub fn apply(&self, events: Vec<HistoricEvent>) -> Vec<HistoricEvent> {
        events.into_iter().filter(|e| self.matches(e)).collect()
    }
}

/// Latest values published by the detector's sensors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
    pub smoke_level: f64,
    pub gas_level: f64,
}

/// Alert levels for the detector's sensors; a reading above a level raises an alert
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SensorThresholds {
    #[serde(default = "default_temperature_threshold")]
    pub temperature: f64,

    #[serde(default = "default_humidity_threshold")]
    pub humidity: f64,

    #[serde(default = "default_smoke_threshold")]
    pub smoke: f64,

    #[serde(default = "default_gas_threshold")]
    pub gas: f64,
}

fn default_temperature_threshold() -> f64 {
    75.0
}

fn default_humidity_threshold() -> f64 {
    80.0
}

fn default_smoke_threshold() -> f64 {
    30.0
}

fn default_gas_threshold() -> f64 {
    50.0
}

impl Default for SensorThresholds {
    fn default() -> Self {
        Self {
            temperature: default_temperature_threshold(),
            humidity: default_humidity_threshold(),
            smoke: default_smoke_threshold(),
            gas: default_gas_threshold(),
        }
    }
}

/// Per-sensor alert flags for one reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SensorAlerts {
    pub temperature: bool,
    pub humidity: bool,
    pub smoke: bool,
    pub gas: bool,
}

impl SensorAlerts {
    pub fn any(&self) -> bool {
        self.temperature || self.humidity || self.smoke || self.gas
    }
}

impl SensorReading {
    /// Compare against `thresholds`; informational only, never part of a verdict
    pub fn alerts(&self, thresholds: &SensorThresholds) -> SensorAlerts {
        SensorAlerts {
            temperature: self.temperature > thresholds.temperature,
            humidity: self.humidity > thresholds.humidity,
            smoke: self.smoke_level > thresholds.smoke,
            gas: self.gas_level > thresholds.gas,
        }
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record_historic_event(&self, event: HistoricEvent) -> Result<()>;

    async fn fetch_historic_events(&self) -> Result<Vec<HistoricEvent>>;

    async fn fetch_latest_sensor_reading(&self) -> Result<Option<SensorReading>>;
}

/// History kept as a JSON array on disk
///
/// The latest sensor reading is read from `sensors.json` next to the history
/// file when a sensor bridge writes one there.
pub struct JsonFileStore {
    events_path: PathBuf,
    sensors_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(events_path: impl Into<PathBuf>) -> Self {
        let events_path = events_path.into();
        let sensors_path = events_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("sensors.json");

        Self {
            events_path,
            sensors_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Replace the latest sensor reading, as a sensor bridge would
    pub async fn record_sensor_reading(&self, reading: &SensorReading) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(reading).context("Failed to serialize sensor reading")?;
        write_atomically(&self.sensors_path, contents).await
    }

    async fn read_events(&self) -> Result<Vec<HistoricEvent>> {
        match tokio::fs::read_to_string(&self.events_path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse history file: {:?}", self.events_path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read history file: {:?}", self.events_path)),
        }
    }
}

#[async_trait]
impl HistoryStore for JsonFileStore {
    async fn record_historic_event(&self, event: HistoricEvent) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut events = self.read_events().await?;
        events.push(event);

        let contents =
            serde_json::to_string_pretty(&events).context("Failed to serialize history")?;
        write_atomically(&self.events_path, contents).await?;

        tracing::debug!("Recorded historic event ({} total)", events.len());
        Ok(())
    }

    async fn fetch_historic_events(&self) -> Result<Vec<HistoricEvent>> {
        self.read_events().await
    }

    async fn fetch_latest_sensor_reading(&self) -> Result<Option<SensorReading>> {
        match tokio::fs::read_to_string(&self.sensors_path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .with_context(|| format!("Failed to parse sensor file: {:?}", self.sensors_path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read sensor file: {:?}", self.sensors_path)),
        }
    }
}

/// Write `contents` to a temp file beside `path` and move it into place
async fn write_atomically(path: &Path, contents: String) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {:?}", dir))?;

        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
        file.write_all(contents.as_bytes())
            .and_then(|()| file.as_file().sync_all())
            .with_context(|| format!("Failed to write {:?}", file.path()))?;
        file.persist(&path)
            .with_context(|| format!("Failed to replace {:?}", path))?;
        Ok(())
    })
    .await
    .context("File writer task failed")?
}

/// History kept in memory for the lifetime of the process
#[derive(Default)]
pub struct MemoryStore {
    events: Mutex<Vec<HistoricEvent>>,
    reading: Mutex<Option<SensorReading>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reading(reading: SensorReading) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            reading: Mutex::new(Some(reading)),
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn record_historic_event(&self, event: HistoricEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }

    async fn fetch_historic_events(&self) -> Result<Vec<HistoricEvent>> {
        Ok(self.events.lock().await.clone())
    }

    async fn fetch_latest_sensor_reading(&self) -> Result<Option<SensorReading>> {
        Ok(self.reading.lock().await.clone())
    }
}
