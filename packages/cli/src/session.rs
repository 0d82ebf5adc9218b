//! One CLI invocation's view of the map.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use safety_map_incident_models::{
    CurrentUser, GeoPoint, Incident, IncidentCategory, NewIncident, ViewportBounds,
};
use safety_map_store::RemoteStore;
use safety_map_store::sqlite::SqliteStore;
use safety_map_sync::filter::CategoryFilter;
use safety_map_sync::identity::StaticIdentity;
use safety_map_sync::location::{
    FixedGeolocation, GeolocationProvider, LocationError, UnavailableGeolocation,
};
use safety_map_sync::region::RegionalInsights;
use safety_map_sync::renderer::{MapEvent, format_reported};
use safety_map_sync::report::ReportDraft;
use safety_map_sync::{Collaborators, MapController, SyncConfig, SyncError};

use crate::terminal::{ConsoleNotifier, TerminalRenderer};

/// Who is acting and where they are.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// `SQLite` database path.
    pub db: PathBuf,
    /// Signed-in user id, if any.
    pub user: Option<String>,
    /// Display name for the signed-in user.
    pub name: Option<String>,
    /// Device position, if known.
    pub at: Option<GeoPoint>,
}

/// A started [`MapController`] over the `SQLite` store.
pub struct Session {
    controller: MapController,
    renderer: TerminalRenderer,
    store: Arc<SqliteStore>,
}

impl Session {
    /// Opens the store, resolves the position, and renders the global view.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the map cannot be
    /// initialized.
    pub async fn open(
        options: SessionOptions,
        config: SyncConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let store = Arc::new(SqliteStore::open(&options.db).await?);
        let renderer = TerminalRenderer::default();

        let identity = options.user.map_or_else(StaticIdentity::anonymous, |id| {
            StaticIdentity::signed_in(CurrentUser {
                id,
                display_name: options.name,
            })
        });
        let geolocation: Arc<dyn GeolocationProvider> = match options.at {
            Some(point) => Arc::new(FixedGeolocation(point)),
            None => Arc::new(UnavailableGeolocation(LocationError::Unsupported)),
        };

        let mut controller = MapController::new(
            config,
            Collaborators {
                store: store.clone(),
                renderer: Box::new(renderer.clone()),
                identity: Arc::new(identity),
                geolocation,
                notifier: Arc::new(ConsoleNotifier),
            },
        );
        controller.start().await?;

        Ok(Self {
            controller,
            renderer,
            store,
        })
    }

    /// Applies `category`, syncs `bounds` (if given), and prints the map.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails.
    pub async fn view(
        &mut self,
        bounds: Option<ViewportBounds>,
        category: CategoryFilter,
    ) -> Result<(), SyncError> {
        if let Some(bounds) = bounds {
            self.renderer.set_bounds(bounds);
        }
        self.controller.show(bounds, category).await?;
        if bounds.is_some()
            && let Some(region) = self.controller.current_region()
        {
            println!("{}", region.label);
        }
        self.renderer.print();
        Ok(())
    }

    /// Reports an incident at `location`, or at the user's position.
    ///
    /// # Errors
    ///
    /// Returns an error if nobody is signed in, the title is blank, or the
    /// write fails.
    pub async fn report(
        &mut self,
        title: String,
        description: String,
        category: IncidentCategory,
        location: Option<GeoPoint>,
    ) -> Result<Incident, SyncError> {
        let location = match location {
            Some(point) => {
                self.controller.handle_event(MapEvent::Clicked(point)).await?;
                point
            }
            None => self.controller.report_at_user_location()?,
        };

        let incident = self
            .controller
            .report_incident(ReportDraft {
                title,
                description,
                category,
                location,
            })
            .await?;
        println!("Reported {} at {}", incident.id, incident.location);
        Ok(incident)
    }

    /// Posts `text` to an incident's thread and prints the thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the incident is unknown, nobody is signed in,
    /// or the write fails.
    pub async fn message(&mut self, incident_id: &str, text: &str) -> Result<(), SyncError> {
        self.open_thread(incident_id)?;
        self.controller.send_message(text).await?;
        self.controller.pump_commands().await?;
        self.print_thread().await;
        Ok(())
    }

    /// Prints an incident's thread.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidInput`] if the incident is unknown.
    pub async fn thread(&mut self, incident_id: &str) -> Result<(), SyncError> {
        self.open_thread(incident_id)?;
        self.print_thread().await;
        Ok(())
    }

    fn open_thread(&mut self, incident_id: &str) -> Result<(), SyncError> {
        if self.controller.select_incident(incident_id) {
            Ok(())
        } else {
            Err(SyncError::InvalidInput {
                message: format!("unknown incident {incident_id}"),
            })
        }
    }

    async fn print_thread(&self) {
        let Some(incident) = self.controller.thread().incident() else {
            return;
        };
        println!("{} [{}]", incident.title, incident.category);
        if !incident.description.is_empty() {
            println!("{}", incident.description);
        }
        println!("Reported: {}", format_reported(incident.reported_at));
        println!();

        let entries = self.controller.thread_entries().await;
        if entries.is_empty() {
            println!("No messages yet.");
        }
        for entry in entries {
            let who = if entry.is_own {
                "you".to_string()
            } else {
                entry.message.author_display_name.clone()
            };
            println!(
                "{} {}: {}",
                entry.message.sent_at.format("%Y-%m-%d %H:%M"),
                who,
                entry.message.text
            );
        }
    }

    /// Prints what the shared region snapshot currently lists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn region(&self) -> Result<(), SyncError> {
        let insights = RegionalInsights::load(self.store.as_ref()).await?;

        match &insights.snapshot {
            Some(snapshot) => println!("{} (v{})", snapshot.label, snapshot.version),
            None => println!("No region has been viewed yet."),
        }
        println!("{} incident(s) in view", insights.visible_count());
        for incident in &insights.incidents {
            println!("  {:<15} {}", incident.category.as_ref(), incident.title);
        }
        Ok(())
    }

    /// The controller, for interactive use.
    pub const fn controller(&mut self) -> &mut MapController {
        &mut self.controller
    }
}

/// Inserts a handful of demo incidents around lower Manhattan.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or written.
pub async fn seed(db: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    let store = SqliteStore::open(db).await?;
    let now = Utc::now();

    let demo = [
        ("Car collision", IncidentCategory::Accident, 40.7100, -74.0000, Some(1)),
        ("Broken streetlight", IncidentCategory::Infrastructure, 40.7150, -74.0100, Some(30)),
        ("Loud construction at night", IncidentCategory::Noise, 40.7200, -73.9950, Some(2)),
        ("Suspicious activity", IncidentCategory::Safety, 40.7080, -74.0120, None),
        ("Flooded crosswalk", IncidentCategory::Other, 41.0000, -73.0000, Some(5)),
    ];

    for (title, category, lat, lng, hours_ago) in demo {
        let incident = store
            .insert_incident(NewIncident {
                title: title.to_string(),
                description: String::new(),
                category,
                location: GeoPoint::new(lat, lng)?,
                reported_at: hours_ago.map(|h| now - Duration::hours(h)),
                reporter_id: "seed".to_string(),
            })
            .await?;
        log::debug!("Seeded {} {}", incident.id, incident.title);
    }

    Ok(demo.len())
}
