use fireguard::app::{self, App};
use fireguard::config::Config;
use fireguard::history::{HistoryFilter, HistoryStore, JsonFileStore, SensorReading};
use fireguard::messages::WorkflowState;
use fireguard::server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fireguard")]
#[command(about = "Fire detection camera workflow client and relay server")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/fireguard/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server in front of the camera and analysis service
    Relay {
        /// Address to listen on, overriding server.bind
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Drive the recording workflow from the terminal
    Watch,

    /// Record and analyze once, printing the outcome as JSON
    Check,

    /// Print the stored alert history
    History {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only list alerts dominated by this sensor
        #[arg(long, value_enum, default_value = "all")]
        filter: HistoryFilter,
    },

    /// Show or update the latest detector sensor reading
    Sensors {
        #[command(subcommand)]
        action: SensorCommand,
    },
}

#[derive(Subcommand)]
enum SensorCommand {
    /// Print the latest reading, flagging values above their alert level
    Show {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Store a new reading
    Record {
        #[arg(long)]
        temperature: f64,

        #[arg(long)]
        humidity: f64,

        #[arg(long)]
        smoke: f64,

        #[arg(long)]
        gas: f64,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fireguard=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.validate()?;

    match cli.command {
        Commands::Relay { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            server::start(&config.server).await?;
        }

        Commands::Watch => {
            App::new(&config)?.run().await?;
            tracing::info!("Fireguard shutdown complete");
        }

        Commands::Check => {
            let snapshot = App::new(&config)?.check().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            if matches!(snapshot.state, WorkflowState::Failed { .. }) {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::History { format, filter } => {
            let store = JsonFileStore::new(config.history_path()?);
            let events = filter.apply(store.fetch_historic_events().await?);

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&events)?),
                OutputFormat::Text if events.is_empty() => println!("No alerts recorded"),
                OutputFormat::Text => {
                    for event in events.iter().rev() {
                        println!("{}", app::describe_event(event));
                    }
                }
            }
        }

        Commands::Sensors { action } => {
            let store = JsonFileStore::new(config.history_path()?);

            match action {
                SensorCommand::Show { format } => {
                    let Some(reading) = store.fetch_latest_sensor_reading().await? else {
                        println!("No sensor reading available");
                        return Ok(ExitCode::SUCCESS);
                    };
                    let alerts = reading.alerts(&config.sensors);

                    match format {
                        OutputFormat::Json => println!(
                            "{}",
                            serde_json::to_string_pretty(&serde_json::json!({
                                "reading": reading,
                                "alerts": alerts,
                                "has_alert": alerts.any(),
                            }))?
                        ),
                        OutputFormat::Text => {
                            println!("{}", app::describe_sensors(&reading, &config.sensors))
                        }
                    }
                }

                SensorCommand::Record {
                    temperature,
                    humidity,
                    smoke,
                    gas,
                } => {
                    let reading = SensorReading {
                        temperature,
                        humidity,
                        smoke_level: smoke,
                        gas_level: gas,
                    };
                    store.record_sensor_reading(&reading).await?;
                    tracing::info!("Stored sensor reading");
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
