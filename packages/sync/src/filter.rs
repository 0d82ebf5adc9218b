//! Client-side category filter.

use std::fmt;
use std::str::FromStr;

use safety_map_incident_models::{Incident, IncidentCategory};

/// The active category selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CategoryFilter {
    /// Identity filter.
    #[default]
    All,
    /// Keep only incidents of this category.
    Only(IncidentCategory),
}

impl CategoryFilter {
    /// Returns `true` if `incident` passes the filter.
    #[must_use]
    pub fn matches(self, incident: &Incident) -> bool {
        match self {
            Self::All => true,
            Self::Only(category) => incident.category == category,
        }
    }
}

impl From<Option<IncidentCategory>> for CategoryFilter {
    fn from(category: Option<IncidentCategory>) -> Self {
        category.map_or(Self::All, Self::Only)
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(category) => write!(f, "{category}"),
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = strum::ParseError;

    /// `"all"` (or an empty string) is the identity filter; anything else
    /// must name a category.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse().map(Self::Only)
    }
}

/// Holds the chosen category and narrows incident sets by it.
#[derive(Debug, Clone, Default)]
pub struct FilterOverlay {
    category: CategoryFilter,
}

impl FilterOverlay {
    /// Creates an overlay with the given selection.
    #[must_use]
    pub const fn new(category: CategoryFilter) -> Self {
        Self { category }
    }

    /// The current selection.
    #[must_use]
    pub const fn category(&self) -> CategoryFilter {
        self.category
    }

    /// Changes the selection. Returns `true` if it actually changed.
    pub fn set(&mut self, category: CategoryFilter) -> bool {
        let changed = self.category != category;
        self.category = category;
        changed
    }

    /// Order-preserving filter by the current selection.
    #[must_use]
    pub fn apply(&self, incidents: &[Incident]) -> Vec<Incident> {
        apply(incidents, self.category)
    }
}

/// Order-preserving filter of `incidents` by `category`.
#[must_use]
pub fn apply(incidents: &[Incident], category: CategoryFilter) -> Vec<Incident> {
    incidents
        .iter()
        .filter(|incident| category.matches(incident))
        .cloned()
        .collect()
}
