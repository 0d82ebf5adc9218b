#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line driver for the safety map.
//!
//! ```text
//! safety_map seed
//! safety_map view [--bbox west,south,east,north] [--category accident]
//! safety_map --user u1 report --title "Broken light" --category infrastructure [--location lat,lng]
//! safety_map --user u1 message <incident-id> "Still broken"
//! safety_map thread <incident-id>
//! safety_map region
//! ```
//!
//! Running with no subcommand enters interactive mode. `--at lat,lng`
//! stands in for the device position; without it the configured fallback
//! location is used.

mod interactive;
mod session;
mod terminal;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use safety_map_incident_models::{GeoPoint, IncidentCategory, ViewportBounds};
use safety_map_store::sqlite::DEFAULT_DB_PATH;
use safety_map_sync::SyncConfig;
use safety_map_sync::filter::CategoryFilter;

use crate::session::{Session, SessionOptions};

#[derive(Parser)]
#[command(name = "safety_map", about = "Report and browse community safety incidents")]
struct Cli {
    /// Path to the `SQLite` database
    #[arg(long, env = "SAFETY_MAP_DB", default_value = DEFAULT_DB_PATH, global = true)]
    db: PathBuf,

    /// Act as this signed-in user id
    #[arg(long, global = true)]
    user: Option<String>,

    /// Display name shown on your messages
    #[arg(long, global = true)]
    name: Option<String>,

    /// Your current position as `lat,lng`
    #[arg(long, global = true, value_parser = parse_point, allow_hyphen_values = true)]
    at: Option<GeoPoint>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the incidents on the map
    View {
        /// Viewport as `west,south,east,north`; omit for the global view
        #[arg(long, allow_hyphen_values = true)]
        bbox: Option<ViewportBounds>,
        /// Only show this category (`all` for everything)
        #[arg(long, default_value = "all")]
        category: CategoryFilter,
    },
    /// Report a new incident
    Report {
        /// Short headline
        #[arg(long)]
        title: String,
        /// Details
        #[arg(long, default_value = "")]
        description: String,
        /// safety, accident, infrastructure, noise, or other
        #[arg(long, default_value = "other")]
        category: IncidentCategory,
        /// Where it happened as `lat,lng`; defaults to your position
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        location: Option<GeoPoint>,
    },
    /// Post a message to an incident's thread
    Message {
        /// Incident ID
        incident_id: String,
        /// Message text
        text: String,
    },
    /// Show an incident's thread
    Thread {
        /// Incident ID
        incident_id: String,
    },
    /// Show the shared current region
    Region,
    /// Insert demo incidents
    Seed,
}

fn parse_point(value: &str) -> Result<GeoPoint, String> {
    let (lat, lng) = value
        .split_once(',')
        .ok_or_else(|| format!("expected `lat,lng`, got `{value}`"))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("bad latitude: {e}"))?;
    let lng: f64 = lng.trim().parse().map_err(|e| format!("bad longitude: {e}"))?;
    GeoPoint::new(lat, lng).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;

    let options = SessionOptions {
        db: cli.db,
        user: cli.user,
        name: cli.name,
        at: cli.at,
    };

    let Some(command) = cli.command else {
        return interactive::run(options, config).await;
    };

    if matches!(command, Commands::Seed) {
        let count = session::seed(&options.db).await?;
        println!("Seeded {count} incidents into {}", options.db.display());
        return Ok(());
    }

    let mut session = Session::open(options, config).await?;

    match command {
        Commands::View { bbox, category } => session.view(bbox, category).await?,
        Commands::Report {
            title,
            description,
            category,
            location,
        } => {
            session
                .report(title, description, category, location)
                .await?;
        }
        Commands::Message { incident_id, text } => session.message(&incident_id, &text).await?,
        Commands::Thread { incident_id } => session.thread(&incident_id).await?,
        Commands::Region => session.region().await?,
        Commands::Seed => {}
    }

    Ok(())
}
