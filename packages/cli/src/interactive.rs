//! Menu-driven session over the map using `dialoguer`.

use dialoguer::{Confirm, Input, Select};
use safety_map_incident_models::{IncidentCategory, ViewportBounds};
use safety_map_sync::SyncConfig;
use safety_map_sync::filter::CategoryFilter;

use crate::session::{Session, SessionOptions};

/// Top-level actions in the interactive menu.
enum Action {
    View,
    Report,
    Thread,
    Region,
    Quit,
}

impl Action {
    const ALL: &[Self] = &[
        Self::View,
        Self::Report,
        Self::Thread,
        Self::Region,
        Self::Quit,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::View => "View the map",
            Self::Report => "Report an incident",
            Self::Thread => "Open an incident thread",
            Self::Region => "Show the current region",
            Self::Quit => "Quit",
        }
    }
}

/// Runs the interactive menu until the user quits.
///
/// # Errors
///
/// Returns an error if the session cannot be opened or a prompt fails.
/// Failed actions are reported and the menu continues.
pub async fn run(
    options: SessionOptions,
    config: SyncConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::open(options, config).await?;
    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();

    loop {
        println!();
        let idx = Select::new()
            .with_prompt("Safety map")
            .items(&labels)
            .default(0)
            .interact()?;

        let result = match Action::ALL[idx] {
            Action::View => handle_view(&mut session).await,
            Action::Report => handle_report(&mut session).await,
            Action::Thread => handle_thread(&mut session).await,
            Action::Region => session.region().await.map_err(Into::into),
            Action::Quit => return Ok(()),
        };

        if let Err(e) = result {
            log::error!("{e}");
        }
    }
}

async fn handle_view(session: &mut Session) -> Result<(), Box<dyn std::error::Error>> {
    let bbox: String = Input::new()
        .with_prompt("Viewport as west,south,east,north (blank for everything)")
        .allow_empty(true)
        .interact_text()?;
    let bounds = if bbox.trim().is_empty() {
        None
    } else {
        Some(bbox.parse::<ViewportBounds>()?)
    };

    let mut filters = vec![CategoryFilter::All];
    filters.extend(IncidentCategory::all().iter().copied().map(CategoryFilter::Only));
    let filter_labels: Vec<String> = filters.iter().map(ToString::to_string).collect();
    let current = filters
        .iter()
        .position(|f| *f == session.controller().filter())
        .unwrap_or(0);

    let idx = Select::new()
        .with_prompt("Category")
        .items(&filter_labels)
        .default(current)
        .interact()?;

    session.view(bounds, filters[idx]).await?;
    Ok(())
}

async fn handle_report(session: &mut Session) -> Result<(), Box<dyn std::error::Error>> {
    let title: String = Input::new().with_prompt("Title").interact_text()?;
    let description: String = Input::new()
        .with_prompt("Description")
        .allow_empty(true)
        .interact_text()?;

    let categories = IncidentCategory::all();
    let category_labels: Vec<String> = categories.iter().map(ToString::to_string).collect();
    let idx = Select::new()
        .with_prompt("Category")
        .items(&category_labels)
        .default(categories.len() - 1)
        .interact()?;

    let here = Confirm::new()
        .with_prompt("Report at your current location?")
        .default(true)
        .interact()?;
    let location = if here {
        None
    } else {
        let point: String = Input::new()
            .with_prompt("Location as lat,lng")
            .interact_text()?;
        Some(crate::parse_point(&point)?)
    };

    session
        .report(title, description, categories[idx], location)
        .await?;
    Ok(())
}

async fn handle_thread(session: &mut Session) -> Result<(), Box<dyn std::error::Error>> {
    let incidents: Vec<(String, String)> = session
        .controller()
        .visible()
        .iter()
        .map(|i| (i.id.clone(), format!("[{}] {}", i.category, i.title)))
        .collect();

    if incidents.is_empty() {
        println!("No incidents on the map.");
        return Ok(());
    }

    let labels: Vec<&str> = incidents.iter().map(|(_, label)| label.as_str()).collect();
    let idx = Select::new()
        .with_prompt("Incident")
        .items(&labels)
        .default(0)
        .interact()?;
    let incident_id = &incidents[idx].0;

    session.thread(incident_id).await?;

    let text: String = Input::new()
        .with_prompt("Reply (blank to go back)")
        .allow_empty(true)
        .interact_text()?;
    if !text.trim().is_empty() {
        session.message(incident_id, &text).await?;
    }

    session.controller().close_thread();
    Ok(())
}
