//! Map renderer interface.
//!
//! Tile rendering is out of scope. The engine drives an opaque renderer
//! through marker add/update/remove commands and receives [`MapEvent`]s
//! back from it.

use chrono::{DateTime, Utc};
use safety_map_incident_models::{GeoPoint, Incident, IncidentCategory, ViewportBounds};

/// Opaque reference to a marker placed on the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkerHandle(pub u64);

/// Visual style of a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerStyle {
    /// [`IncidentCategory::Safety`]
    Safety,
    /// [`IncidentCategory::Accident`]
    Accident,
    /// [`IncidentCategory::Infrastructure`]
    Infrastructure,
    /// [`IncidentCategory::Noise`]
    Noise,
    /// [`IncidentCategory::Other`] and anything unrecognized
    Other,
    /// The user's own position
    SelfLocation,
}

impl MarkerStyle {
    /// Fixed category to style mapping.
    #[must_use]
    pub const fn for_category(category: IncidentCategory) -> Self {
        match category {
            IncidentCategory::Safety => Self::Safety,
            IncidentCategory::Accident => Self::Accident,
            IncidentCategory::Infrastructure => Self::Infrastructure,
            IncidentCategory::Noise => Self::Noise,
            IncidentCategory::Other => Self::Other,
        }
    }
}

/// What a marker represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerKind {
    /// An incident marker.
    Incident {
        /// The incident shown.
        incident_id: String,
    },
    /// The distinguished marker at the user's position.
    SelfLocation,
}

/// Hover preview content for an incident marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupContent {
    /// Incident title.
    pub title: String,
    /// Incident description.
    pub description: String,
    /// Category label, e.g. `"accident"`.
    pub category: String,
    /// Formatted report time or `"Date not available"`.
    pub reported: String,
    /// Show the "Recent incident!" line.
    pub recent: bool,
}

impl PopupContent {
    /// Builds the preview for an incident.
    #[must_use]
    pub fn for_incident(incident: &Incident, recent: bool) -> Self {
        Self {
            title: incident.title.clone(),
            description: incident.description.clone(),
            category: incident.category.to_string(),
            reported: format_reported(incident.reported_at),
            recent,
        }
    }
}

/// Formats a report time for display, e.g. `"Mar 4, 2025, 2:07:09 PM"`.
#[must_use]
pub fn format_reported(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(
        || "Date not available".to_string(),
        |at| at.format("%b %-d, %Y, %-I:%M:%S %p").to_string(),
    )
}

/// Interaction wired onto a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerBehavior {
    /// Show the popup while hovered.
    pub hover_preview: bool,
    /// Emit [`MapEvent::MarkerClicked`] on click.
    pub click_to_select: bool,
}

/// Everything the renderer needs to draw one marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSpec {
    /// What the marker represents.
    pub kind: MarkerKind,
    /// Where to draw it.
    pub position: GeoPoint,
    /// How to draw it.
    pub style: MarkerStyle,
    /// Draw with the "recent" emphasis (blinking).
    pub recent: bool,
    /// Hover preview, if any.
    pub popup: Option<PopupContent>,
    /// Attached interactions.
    pub behavior: MarkerBehavior,
}

impl MarkerSpec {
    /// Returns the incident id for incident markers.
    #[must_use]
    pub fn incident_id(&self) -> Option<&str> {
        match &self.kind {
            MarkerKind::Incident { incident_id } => Some(incident_id),
            MarkerKind::SelfLocation => None,
        }
    }
}

/// Events emitted by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    /// The visible rectangle settled on new bounds.
    ViewportChanged(ViewportBounds),
    /// The map background was clicked.
    Clicked(GeoPoint),
    /// A marker was clicked.
    MarkerClicked(MarkerHandle),
    /// The pointer entered a marker.
    MarkerHovered(MarkerHandle),
    /// The pointer left a marker.
    MarkerUnhovered(MarkerHandle),
}

/// Errors from the renderer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RendererError {
    /// Initialization failed.
    #[error("Failed to initialize map: {0}")]
    Initialization(String),
    /// The handle does not refer to a live marker.
    #[error("Unknown marker {0:?}")]
    UnknownMarker(MarkerHandle),
}

/// A map that accepts marker commands.
pub trait MapRenderer: Send {
    /// Creates (or recreates) the map centred on `center`.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::Initialization`] if the map cannot be
    /// created.
    fn initialize(&mut self, center: GeoPoint, zoom: f64) -> Result<(), RendererError>;

    /// Returns `true` once [`MapRenderer::initialize`] has succeeded.
    fn is_initialized(&self) -> bool;

    /// Places a marker and returns its handle.
    fn add_marker(&mut self, spec: MarkerSpec) -> MarkerHandle;

    /// Replaces an existing marker's spec in place.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::UnknownMarker`] if the handle is not live.
    fn update_marker(&mut self, handle: MarkerHandle, spec: MarkerSpec)
    -> Result<(), RendererError>;

    /// Removes a marker. Removing an unknown handle is a no-op.
    fn remove_marker(&mut self, handle: MarkerHandle);

    /// The currently visible bounds, if the map is initialized.
    fn current_bounds(&self) -> Option<ViewportBounds>;
}
