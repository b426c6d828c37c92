use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pollwatch::config::AppConfig;
use pollwatch::{LocationHandlers, PollingStationService, FAILURE_SENTINEL};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "pollwatch", about = "Polling-station lookup and administration")]
struct Cli {
    /// Path to config file
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Resolve a polling-station id by county code or county id
    Station {
        #[arg(long, conflicts_with = "county_id", required_unless_present = "county_id")]
        county_code: Option<String>,
        #[arg(long)]
        county_id: Option<i32>,
        #[arg(long)]
        number: i32,
    },
    /// List per-county polling-station limits
    Limits {
        #[arg(long)]
        diaspora: Option<bool>,
    },
    /// Delete all polling stations and their answers, notes and infos
    ClearAll,
    /// Show row counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let now = Instant::now();
    if let Err(e) = pollwatch::telemetry::init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)?;
    tracing::info!("Configuration '{}' loaded successfully", &cli.config);

    let service = Arc::new(PollingStationService::from_config(&config).await?);
    let handlers = LocationHandlers::new(service.clone());

    tracing::info!("Service ready in {}ms", now.elapsed().as_millis());

    let outcome = run(cli.command, &handlers).await;

    if let Err(e) = service.close().await {
        tracing::error!("Error closing store: {}", e);
    }

    outcome
}

async fn run(command: Command, handlers: &LocationHandlers) -> Result<()> {
    match command {
        // Migrations already ran while opening the store
        Command::Migrate => println!("migrations applied"),
        Command::Station {
            county_code,
            county_id,
            number,
        } => {
            let id = match (county_code, county_id) {
                (Some(code), _) => handlers.polling_station_by_county_code(number, &code).await,
                (None, Some(county_id)) => {
                    handlers.polling_station_by_county_id(number, county_id).await
                }
                (None, None) => bail!("either --county-code or --county-id is required"),
            };
            if id == FAILURE_SENTINEL {
                bail!("polling station {} could not be resolved", number);
            }
            match handlers.service().store().get_polling_station(id).await? {
                Some(station) => println!(
                    "{}\t{}",
                    station.id,
                    station.address.as_deref().unwrap_or("")
                ),
                None => println!("{}", id),
            }
        }
        Command::Limits { diaspora } => {
            for county in handlers.county_limits(diaspora).await {
                println!(
                    "{}\t{}\t{}\t{}",
                    county.order, county.code, county.name, county.limit
                );
            }
        }
        Command::ClearAll => {
            let cancel = CancellationToken::new();
            let watcher = tokio::spawn(cancel_on_signal(cancel.clone()));

            let deleted = handlers.clear_all(cancel).await;
            watcher.abort();

            if deleted == i64::from(FAILURE_SENTINEL) {
                bail!("clear-all failed, no rows were changed");
            }
            println!("deleted {} polling stations", deleted);
        }
        Command::Stats => {
            let stats = handlers.service().store().stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling clear-all...");
    token.cancel();
}
