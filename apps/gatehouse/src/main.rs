mod config;
mod prompt;

use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{ApiEndpoint, DirectorySnapshot, GateClient, MovementRegistry, SubmissionOutcome};
use shared::{
    domain::{Movement, MovementKind, Vehicle, VehicleId},
    error::ValidationError,
    protocol::HistoryFilter,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{config::load_settings, prompt::TerminalPrompt};

#[derive(Parser, Debug)]
#[command(name = "gatehouse", about = "Vehicle gate console")]
struct Cli {
    /// Overrides the configured backend API url.
    #[arg(long)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Vehicle totals and today's entries/exits.
    Dashboard,
    Vehicles {
        #[arg(value_enum, default_value_t = Presence::All)]
        presence: Presence,
        /// Plate fragment (only with `all`).
        #[arg(long)]
        search: Option<String>,
    },
    Register {
        /// Plate or numeric id.
        #[arg(long)]
        vehicle: String,
        #[arg(long, value_parser = parse_kind)]
        kind: MovementKind,
        /// Defaults to the last recorded reading.
        #[arg(long)]
        odometer: Option<f64>,
        /// Defaults to the last recorded driver.
        #[arg(long)]
        driver: Option<String>,
        #[arg(long)]
        operator: Option<String>,
        /// "YYYY-MM-DD HH:MM", defaults to now.
        #[arg(long, value_parser = parse_at)]
        at: Option<NaiveDateTime>,
    },
    History {
        #[arg(long)]
        plate: Option<String>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long)]
        size: Option<u32>,
    },
    Drivers {
        term: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Presence {
    Present,
    Absent,
    All,
}

fn parse_kind(raw: &str) -> Result<MovementKind, String> {
    MovementKind::parse(raw).ok_or_else(|| format!("expected entry or exit, got '{raw}'"))
}

fn parse_at(raw: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M")
        .map_err(|err| format!("expected \"YYYY-MM-DD HH:MM\": {err}"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings().context("failed to load settings")?;
    if let Some(api_url) = cli.api_url {
        settings.api_url = api_url;
    }
    let endpoint = ApiEndpoint::parse(&settings.api_url)
        .with_context(|| format!("invalid api url '{}'", settings.api_url))?;
    info!(api = endpoint.as_str(), "connecting");

    let client = GateClient::connect(endpoint).await;

    match cli.command {
        Command::Dashboard => {
            let summary = client.dashboard().summary().await;
            println!("Veículos cadastrados: {}", summary.total_vehicles);
            println!("Veículos presentes:   {}", summary.present_vehicles);
            println!("Entradas hoje:        {}", count_or_dash(summary.entries_today));
            println!("Saídas hoje:          {}", count_or_dash(summary.exits_today));
        }
        Command::Vehicles { presence, search } => {
            let vehicles = match presence {
                Presence::All => client.vehicles.search_by_plate(search.as_deref().unwrap_or("")),
                Presence::Present => {
                    let view = client.vehicles.present_vehicles();
                    view.wait_for_generation(1).await.value.unwrap_or_default()
                }
                Presence::Absent => {
                    let view = client.vehicles.absent_vehicles();
                    view.wait_for_generation(1).await.value.unwrap_or_default()
                }
            };
            for vehicle in &vehicles {
                print_vehicle(vehicle);
            }
            println!("{} veículo(s)", vehicles.len());
        }
        Command::Register {
            vehicle,
            kind,
            odometer,
            driver,
            operator,
            at,
        } => {
            let coordinator = client.coordinator(Arc::new(TerminalPrompt));
            let outcome = match resolve_vehicle(&client.vehicles.snapshot(), &vehicle) {
                Ok(id) => {
                    coordinator.select_vehicle(id).await;
                    let operator = operator.unwrap_or_else(|| settings.operator_name.clone());
                    coordinator
                        .edit_form(|form| {
                            form.kind = kind;
                            if odometer.is_some() {
                                form.odometer = odometer;
                            }
                            if let Some(driver) = driver {
                                form.driver_name = driver;
                            }
                            form.gate_operator_name = operator;
                            form.date = at.map(|at| at.date());
                            form.time = at.map(|at| at.time());
                        })
                        .await;
                    coordinator.submit().await?
                }
                Err(err) => SubmissionOutcome::Invalid(err),
            };

            println!("{}", outcome.message());
            match outcome {
                SubmissionOutcome::Committed(Some(movement)) => print_movement(&movement),
                SubmissionOutcome::Committed(None) => {}
                SubmissionOutcome::Failed(reason) => {
                    eprintln!("{reason}");
                    return Ok(ExitCode::FAILURE);
                }
                _ => return Ok(ExitCode::FAILURE),
            }
        }
        Command::History {
            plate,
            from,
            to,
            page,
            size,
        } => {
            let filter = HistoryFilter { plate, from, to };
            let size = size.unwrap_or(settings.page_size).max(1);
            let history = client
                .registry
                .history(&filter, page, size)
                .await
                .context("failed to load history")?;
            for movement in &history.content {
                print_movement(movement);
            }
            println!(
                "página {} de {} ({} registros)",
                history.number + 1,
                history.total_pages.max(1),
                history.total_elements
            );
        }
        Command::Drivers { term } => {
            let coordinator = client.coordinator(Arc::new(TerminalPrompt));
            for name in coordinator.suggest_drivers(term.as_deref().unwrap_or("")).await {
                println!("{name}");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn resolve_vehicle(snapshot: &DirectorySnapshot, raw: &str) -> Result<VehicleId, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::MissingVehicle);
    }
    match raw.parse::<i64>() {
        Ok(id) => snapshot
            .find(VehicleId(id))
            .map(|vehicle| vehicle.id)
            .ok_or(ValidationError::UnknownVehicle(VehicleId(id))),
        Err(_) => snapshot
            .find_by_plate(raw)
            .map(|vehicle| vehicle.id)
            .ok_or_else(|| ValidationError::UnknownPlate(raw.to_string())),
    }
}

fn count_or_dash(count: Option<u64>) -> String {
    count.map_or_else(|| "-".into(), |c| c.to_string())
}

fn print_vehicle(vehicle: &Vehicle) {
    let last = vehicle
        .last_movement_at
        .map(|at| at.format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|| "-".into());
    println!(
        "{:<10} {:<8} {:<24} {:<16} {}",
        vehicle.plate,
        vehicle.status.as_wire(),
        vehicle.driver_name,
        format!("{} {}", vehicle.make, vehicle.model).trim(),
        last
    );
}

fn print_movement(movement: &Movement) {
    println!(
        "#{:<6} {} {:<10} {:<8} {:>10.1} km  {:<24} porteiro: {}",
        movement.id,
        movement.occurred_at.format("%d/%m/%Y %H:%M"),
        movement.vehicle.plate.as_deref().unwrap_or("-"),
        movement.kind.as_wire(),
        movement.odometer_reading,
        movement.driver_name,
        movement.gate_operator_name
    );
}
