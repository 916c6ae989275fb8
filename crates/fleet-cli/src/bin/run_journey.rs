//! Run a simulated journey from the command line.
//!
//! With no arguments this replays the demo scenario: a truck driving
//! Kalyani -> Kanchrapara -> Naihati with two known traffic spots.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleet_core::models::{GeoPoint, JourneyEventKind, Waypoint, Zone, ZoneEffect};
use fleet_journey::{DirectPlanner, JourneyConfig, JourneyController, OsrmPlanner, RoutePlanner};

// Demo itinerary and traffic spots (West Bengal).
const DEMO_STOPS: [(f64, f64); 3] = [
    (22.9751, 88.4345), // Kalyani
    (22.9473, 88.4312), // Kanchrapara
    (22.8895, 88.4220), // Naihati
];
const DEMO_HAZARDS: [(f64, f64); 2] = [(22.9351, 88.5294), (22.9823, 88.4467)];
const DEMO_HAZARD_RADIUS_M: f64 = 100.0;
const HAZARD_DWELL_MS: u64 = 5000;

/// Simulate a vehicle driving a multi-stop route.
#[derive(Parser, Debug)]
#[command(name = "run_journey")]
struct Args {
    /// Stop as "lat,lon"; repeat in order, origin first, destination last.
    /// Defaults to the demo itinerary.
    #[arg(long = "stop", value_parser = parse_point)]
    stops: Vec<GeoPoint>,

    /// Hazard zone as "lat,lon[,radius_m]"; repeatable.
    #[arg(long = "hazard", value_parser = parse_hazard)]
    hazards: Vec<Hazard>,

    /// Vehicle speed in meters per second.
    #[arg(long, default_value_t = 80.0)]
    speed: f64,

    /// Milliseconds between ticks.
    #[arg(long, default_value_t = 200)]
    tick_ms: u64,

    /// OSRM base URL (e.g. https://router.project-osrm.org); omit to use
    /// straight-line routing.
    #[arg(long)]
    osrm_url: Option<String>,

    /// Pause at hazards instead of rerouting around them.
    #[arg(long)]
    pause_on_hazard: bool,
}

#[derive(Debug, Clone)]
struct Hazard {
    center: GeoPoint,
    radius_m: f64,
}

fn parse_point(value: &str) -> Result<GeoPoint, String> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 2 {
        return Err("expected \"lat,lon\"".to_string());
    }
    let lat: f64 = parts[0].trim().parse().map_err(|_| "invalid latitude")?;
    let lon: f64 = parts[1].trim().parse().map_err(|_| "invalid longitude")?;
    Ok(GeoPoint::new(lat, lon))
}

fn parse_hazard(value: &str) -> Result<Hazard, String> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err("expected \"lat,lon[,radius_m]\"".to_string());
    }
    let center = parse_point(&parts[..2].join(","))?;
    let radius_m = match parts.get(2) {
        Some(raw) => raw.trim().parse().map_err(|_| "invalid radius")?,
        None => DEMO_HAZARD_RADIUS_M,
    };
    Ok(Hazard { center, radius_m })
}

fn build_itinerary(stops: &[GeoPoint]) -> Vec<Waypoint> {
    stops
        .iter()
        .enumerate()
        .map(|(index, point)| {
            if index == 0 {
                Waypoint::origin(point.lat, point.lon)
            } else if index + 1 == stops.len() {
                Waypoint::destination(point.lat, point.lon)
            } else {
                Waypoint::checkpoint(point.lat, point.lon)
            }
        })
        .collect()
}

fn build_zones(hazards: &[Hazard], pause_on_hazard: bool) -> Vec<Zone> {
    hazards
        .iter()
        .enumerate()
        .map(|(index, hazard)| Zone {
            id: format!("hazard-{index}"),
            center: hazard.center,
            radius_m: hazard.radius_m,
            effect: if pause_on_hazard {
                ZoneEffect::Pause {
                    dwell_ms: HAZARD_DWELL_MS,
                }
            } else {
                ZoneEffect::Reroute
            },
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("run_journey=info".parse()?)
                .add_directive("fleet_journey=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let stops: Vec<GeoPoint> = if args.stops.is_empty() {
        DEMO_STOPS
            .iter()
            .map(|&(lat, lon)| GeoPoint::new(lat, lon))
            .collect()
    } else {
        args.stops.clone()
    };
    let hazards: Vec<Hazard> = if args.stops.is_empty() && args.hazards.is_empty() {
        DEMO_HAZARDS
            .iter()
            .map(|&(lat, lon)| Hazard {
                center: GeoPoint::new(lat, lon),
                radius_m: DEMO_HAZARD_RADIUS_M,
            })
            .collect()
    } else {
        args.hazards.clone()
    };

    let planner: Arc<dyn RoutePlanner> = match &args.osrm_url {
        Some(url) => {
            tracing::info!(%url, "routing via OSRM");
            Arc::new(OsrmPlanner::new(url.clone()))
        }
        None => {
            tracing::info!("routing via straight legs");
            Arc::new(DirectPlanner::default())
        }
    };

    let mut controller = JourneyController::new(
        planner,
        build_itinerary(&stops),
        build_zones(&hazards, args.pause_on_hazard),
        args.speed,
        JourneyConfig::from_env(),
    )?;

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let lat = event.position.lat;
            let lon = event.position.lon;
            match event.kind {
                JourneyEventKind::CheckpointArrived { waypoint_index } => {
                    tracing::info!(lat, lon, waypoint_index, "checkpoint arrived");
                }
                JourneyEventKind::Paused { zone_id, resume_at } => {
                    tracing::info!(lat, lon, %zone_id, %resume_at, "paused");
                }
                JourneyEventKind::Resumed => tracing::info!(lat, lon, "resumed"),
                JourneyEventKind::RouteChanged { reason, points } => {
                    tracing::info!(lat, lon, ?reason, points, "route changed");
                }
                JourneyEventKind::Completed => {
                    tracing::info!(lat, lon, "destination reached");
                }
                JourneyEventKind::Cancelled => tracing::info!(lat, lon, "journey cancelled"),
                JourneyEventKind::Failed { reason } => {
                    tracing::error!(lat, lon, %reason, "journey failed");
                }
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    controller.start(Utc::now()).await?;
    let status = controller
        .run(Duration::from_millis(args.tick_ms), shutdown_rx)
        .await;
    tracing::info!(?status, "journey finished");
    Ok(())
}
