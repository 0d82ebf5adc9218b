#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Incident, message, and viewport data model for the safety map.
//!
//! These types are shared by the remote store backends and the viewport
//! synchronization engine. Coordinates are WGS84 degrees. Bounding boxes
//! are plain rectangles; wraparound at the antimeridian is not supported.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Key of the single process-wide region snapshot record.
pub const REGION_SLOT: i32 = 1;

/// How long after being reported an incident counts as recent.
pub const RECENT_WINDOW_MINUTES: i64 = 3 * 60;

/// Error returned when a coordinate is outside the WGS84 range.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("invalid coordinate ({lat}, {lng}): lat must be in [-90, 90] and lng in [-180, 180]")]
pub struct InvalidCoordinateError {
    /// The rejected latitude.
    pub lat: f64,
    /// The rejected longitude.
    pub lng: f64,
}

/// Error returned when a pair of corners does not form a valid viewport.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidBoundsError {
    /// The south-west corner lies north of the north-east corner.
    #[error("south-west latitude is greater than north-east latitude")]
    Inverted,
    /// The south-west corner lies east of the north-east corner. Bounds
    /// crossing the antimeridian are not supported.
    #[error("south-west longitude is greater than north-east longitude")]
    CrossesAntimeridian,
    /// A corner is out of range.
    #[error(transparent)]
    Coordinate(#[from] InvalidCoordinateError),
    /// A `west,south,east,north` string could not be parsed.
    #[error("malformed bounding box: {message}")]
    Malformed {
        /// Description of what went wrong.
        message: String,
    },
}

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, `[-90, 90]`.
    pub lat: f64,
    /// Longitude in degrees, `[-180, 180]`.
    pub lng: f64,
}

impl GeoPoint {
    /// Creates a point, validating the coordinate range.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCoordinateError`] if either coordinate is out of
    /// range or not finite.
    pub fn new(lat: f64, lng: f64) -> Result<Self, InvalidCoordinateError> {
        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) {
            Ok(Self { lat, lng })
        } else {
            Err(InvalidCoordinateError { lat, lng })
        }
    }

    /// Creates a point without validation. Intended for constants.
    #[must_use]
    pub const fn new_unchecked(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lat, self.lng)
    }
}

/// The rectangular region currently visible on the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportBounds {
    /// South-west corner.
    pub south_west: GeoPoint,
    /// North-east corner.
    pub north_east: GeoPoint,
}

impl ViewportBounds {
    /// Creates bounds from two corners.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidBoundsError`] if a corner is out of range or the
    /// corners do not form a non-wrapping rectangle.
    pub fn new(south_west: GeoPoint, north_east: GeoPoint) -> Result<Self, InvalidBoundsError> {
        GeoPoint::new(south_west.lat, south_west.lng)?;
        GeoPoint::new(north_east.lat, north_east.lng)?;

        if south_west.lat > north_east.lat {
            return Err(InvalidBoundsError::Inverted);
        }
        if south_west.lng > north_east.lng {
            return Err(InvalidBoundsError::CrossesAntimeridian);
        }

        Ok(Self {
            south_west,
            north_east,
        })
    }

    /// Creates bounds from `west, south, east, north` edges.
    ///
    /// # Errors
    ///
    /// See [`ViewportBounds::new`].
    pub fn from_edges(
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    ) -> Result<Self, InvalidBoundsError> {
        Self::new(
            GeoPoint::new_unchecked(south, west),
            GeoPoint::new_unchecked(north, east),
        )
    }

    /// Western longitude edge.
    #[must_use]
    pub const fn west(&self) -> f64 {
        self.south_west.lng
    }

    /// Southern latitude edge.
    #[must_use]
    pub const fn south(&self) -> f64 {
        self.south_west.lat
    }

    /// Eastern longitude edge.
    #[must_use]
    pub const fn east(&self) -> f64 {
        self.north_east.lng
    }

    /// Northern latitude edge.
    #[must_use]
    pub const fn north(&self) -> f64 {
        self.north_east.lat
    }

    /// Returns `true` if the point lies inside the rectangle. All four
    /// edges are inclusive.
    #[must_use]
    pub fn contains(&self, point: GeoPoint) -> bool {
        self.west() <= point.lng
            && point.lng <= self.east()
            && self.south() <= point.lat
            && point.lat <= self.north()
    }
}

impl std::str::FromStr for ViewportBounds {
    type Err = InvalidBoundsError;

    /// Parses `west,south,east,north`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| InvalidBoundsError::Malformed {
                message: format!("{s}: {e}"),
            })?;

        let [west, south, east, north] = parts[..] else {
            return Err(InvalidBoundsError::Malformed {
                message: format!("{s}: expected 4 comma-separated values"),
            });
        };

        Self::from_edges(west, south, east, north)
    }
}

/// Incident category.
///
/// Unknown category strings coming back from the store deserialize to
/// [`IncidentCategory::Other`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum IncidentCategory {
    /// Personal safety concern
    Safety,
    /// Traffic or other accident
    Accident,
    /// Broken or hazardous infrastructure
    Infrastructure,
    /// Noise complaint
    Noise,
    /// Anything else
    #[serde(other)]
    Other,
}

impl IncidentCategory {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Safety,
            Self::Accident,
            Self::Infrastructure,
            Self::Noise,
            Self::Other,
        ]
    }

    /// Parses a stored category label, mapping anything unrecognized to
    /// [`IncidentCategory::Other`].
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        label.trim().parse().unwrap_or(Self::Other)
    }
}

/// A reported safety-relevant event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Stable opaque identifier.
    pub id: String,
    /// Short headline, never empty.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Category used for filtering and marker style.
    pub category: IncidentCategory,
    /// Where it happened.
    pub location: GeoPoint,
    /// When it was reported, if known.
    pub reported_at: Option<DateTime<Utc>>,
    /// Identity of the reporting user.
    pub reporter_id: String,
    /// Discussion thread in insertion order.
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Incident {
    /// Returns `true` if the incident was reported less than `window` before
    /// `now`. Incidents without a timestamp are never recent.
    #[must_use]
    pub fn is_recent_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.reported_at.is_some_and(|at| now - at < window)
    }

    /// [`Incident::is_recent_at`] with the default three hour window.
    #[must_use]
    pub fn is_recent(&self, now: DateTime<Utc>) -> bool {
        self.is_recent_at(now, Duration::minutes(RECENT_WINDOW_MINUTES))
    }
}

/// A single message in an incident's thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier.
    pub id: String,
    /// Owning incident.
    pub incident_id: String,
    /// Message body, never empty.
    pub text: String,
    /// Name shown next to the message.
    pub author_display_name: String,
    /// Identity of the author.
    pub author_id: String,
    /// When the message was sent.
    pub sent_at: DateTime<Utc>,
}

/// The shared record describing the most recently synchronized viewport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSnapshot {
    /// Always [`REGION_SLOT`].
    pub slot: i32,
    /// Display label for the region.
    pub label: String,
    /// Ids of the incidents visible in the region.
    pub incident_ids: BTreeSet<String>,
    /// Incremented by the store on every write.
    pub version: u64,
}

impl RegionSnapshot {
    /// Creates an unversioned snapshot for the singleton slot.
    #[must_use]
    pub fn new(label: impl Into<String>, incident_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            slot: REGION_SLOT,
            label: label.into(),
            incident_ids: incident_ids.into_iter().collect(),
            version: 0,
        }
    }
}

/// An authenticated user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    /// Stable user identifier.
    pub id: String,
    /// Name shown on messages, typically the email address.
    pub display_name: Option<String>,
}

/// Fields needed to insert an incident. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIncident {
    /// Short headline.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Category.
    pub category: IncidentCategory,
    /// Location.
    pub location: GeoPoint,
    /// Report time.
    pub reported_at: Option<DateTime<Utc>>,
    /// Reporting user.
    pub reporter_id: String,
}

/// Fields needed to insert a message. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// Owning incident.
    pub incident_id: String,
    /// Message body.
    pub text: String,
    /// Name shown next to the message.
    pub author_display_name: String,
    /// Identity of the author.
    pub author_id: String,
    /// Send time.
    pub sent_at: DateTime<Utc>,
}

/// Sorts incidents newest first. Incidents without a report time go last;
/// ties keep their relative order.
pub fn sort_newest_first(incidents: &mut [Incident]) {
    incidents.sort_by(|a, b| match (a.reported_at, b.reported_at) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}
