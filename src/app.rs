use crate::config::Config;
use crate::history::{HistoricEvent, HistoryStore, JsonFileStore, SensorReading, SensorThresholds};
use crate::messages::{WorkflowSnapshot, WorkflowState};
use crate::relay::{HttpRelay, RelayApi};
use crate::services::{Coordinator, CoordinatorHandle};

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Keyboard actions accepted by the terminal driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Record,
    Analyze,
    Reset,
    Quit,
}

impl Action {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "r" | "record" => Some(Action::Record),
            "a" | "analyze" => Some(Action::Analyze),
            "x" | "reset" => Some(Action::Reset),
            "q" | "quit" | "exit" => Some(Action::Quit),
            _ => None,
        }
    }
}

/// Feeds user actions into the workflow coordinator and renders its state
pub struct App {
    coordinator: CoordinatorHandle,
}

impl App {
    pub fn new(config: &Config) -> Result<Self> {
        let relay: Arc<dyn RelayApi> = Arc::new(HttpRelay::new(&config.relay_url));
        let history: Arc<dyn HistoryStore> = Arc::new(JsonFileStore::new(config.history_path()?));
        Ok(Self::with_parts(config, relay, history))
    }

    /// Build an app around an existing relay and history store
    pub fn with_parts(
        config: &Config,
        relay: Arc<dyn RelayApi>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        let (coordinator, handle) = Coordinator::new(config, relay, history);
        tokio::spawn(coordinator.run());

        tracing::info!("Workflow ready, relay at {}", config.relay_url);

        Self {
            coordinator: handle,
        }
    }

    /// Interactive loop: read actions from stdin and print every state change
    pub async fn run(self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut updates = self.coordinator.subscribe();

        println!("Commands: r = record, a = analyze, x = reset, q = quit");
        println!("{}", describe(&updates.borrow_and_update()));

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read stdin")? else {
                        break;
                    };
                    match Action::parse(&line) {
                        Some(Action::Quit) => break,
                        Some(action) => self.dispatch(action).await?,
                        None if line.trim().is_empty() => {}
                        None => println!("Unknown command {:?}", line.trim()),
                    }
                }

                changed = updates.changed() => {
                    if changed.is_err() {
                        tracing::error!("Workflow coordinator stopped");
                        break;
                    }
                    println!("{}", describe(&updates.borrow_and_update()));
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Cancel whatever the workflow is doing before exit
    async fn shutdown(&self) {
        if let Err(e) = self.coordinator.reset().await {
            tracing::debug!("Final reset not delivered: {}", e);
        }
    }

    async fn dispatch(&self, action: Action) -> Result<()> {
        tracing::debug!("dispatch: {:?}", action);

        match action {
            Action::Record => self.coordinator.record().await,
            Action::Analyze => self.coordinator.analyze().await,
            Action::Reset => self.coordinator.reset().await,
            Action::Quit => Ok(()),
        }
    }

    /// One unattended run: record, analyze as soon as the clip is ready, report the outcome
    pub async fn check(self) -> Result<WorkflowSnapshot> {
        self.coordinator.record().await?;

        let recorded = self
            .coordinator
            .wait_for(|s| {
                matches!(
                    s.state,
                    WorkflowState::AwaitingAnalysis | WorkflowState::Failed { .. }
                )
            })
            .await?;

        if matches!(recorded.state, WorkflowState::Failed { .. }) {
            return Ok(recorded);
        }

        self.coordinator.analyze().await?;
        self.coordinator.wait_for(|s| s.state.is_terminal()).await
    }
}

/// One-line rendering of a workflow snapshot for the terminal
pub fn describe(snapshot: &WorkflowSnapshot) -> String {
    match &snapshot.state {
        WorkflowState::Idle => format!("Idle (camera: {})", snapshot.camera_feed),
        WorkflowState::CountingDown { seconds_remaining } => {
            format!("Recording starts in {}s", seconds_remaining)
        }
        WorkflowState::Recording => "Recording...".to_string(),
        WorkflowState::AwaitingAnalysis => {
            "Recording finished, press 'a' to analyze".to_string()
        }
        WorkflowState::Analyzing { progress_percent } => {
            format!("Analyzing... {}%", progress_percent)
        }
        WorkflowState::Result {
            verdict,
            artifact_ref,
        } => {
            let label = if verdict.is_safe() {
                "Safe"
            } else {
                "DANGER: person in danger"
            };
            match artifact_ref {
                Some(url) => format!("Result: {} (video: {})", label, url),
                None => format!("Result: {}", label),
            }
        }
        WorkflowState::Failed { reason } => format!("Error: {}", reason),
    }
}

/// One-line rendering of a stored alert
pub fn describe_event(event: &HistoricEvent) -> String {
    format!(
        "{} {}  {:<6}  {}",
        event.date,
        event.time,
        if event.state { "safe" } else { "DANGER" },
        event.headline()
    )
}

/// Sensor values with a marker on each one above its alert level
pub fn describe_sensors(reading: &SensorReading, thresholds: &SensorThresholds) -> String {
    let alerts = reading.alerts(thresholds);
    let mark = |alert: bool| if alert { "  ALERT" } else { "" };

    let mut lines = vec![
        format!("temperature {:>7.1} °C{}", reading.temperature, mark(alerts.temperature)),
        format!("humidity    {:>7.1} %{}", reading.humidity, mark(alerts.humidity)),
        format!("smoke       {:>7.1}{}", reading.smoke_level, mark(alerts.smoke)),
        format!("gas         {:>7.1} ppm{}", reading.gas_level, mark(alerts.gas)),
    ];
    if alerts.any() {
        lines.push("Sensor alert: check the detector".to_string());
    }
    lines.join("\n")
}
