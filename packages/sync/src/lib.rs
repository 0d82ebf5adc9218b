#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Viewport-scoped incident synchronization engine.
//!
//! Keeps four things consistent while the user pans, zooms, filters, and
//! posts new data:
//!
//! 1. the synchronized incident set fetched for the current viewport
//!    ([`query::ViewportQueryService`]),
//! 2. the markers on the map ([`markers::MarkerReconciliationEngine`]),
//! 3. the shared "current region" record ([`region::RegionSnapshotPublisher`]),
//! 4. the open incident's message thread ([`thread::IncidentDetailThread`]).
//!
//! [`controller::MapController`] wires these together and owns the
//! external collaborators: the [`safety_map_store::RemoteStore`], a
//! [`renderer::MapRenderer`], an [`identity::IdentityProvider`], a
//! [`location::GeolocationProvider`], and a [`notice::Notifier`] for
//! user-visible notices.
//!
//! Everything runs on a single cooperative event loop. Nothing here spawns
//! threads or tasks; in-flight viewport fetches are never cancelled.

pub mod bus;
pub mod config;
pub mod controller;
pub mod filter;
pub mod identity;
pub mod location;
pub mod markers;
pub mod notice;
pub mod query;
pub mod region;
pub mod renderer;
pub mod report;
pub mod testing;
pub mod thread;

use safety_map_store::StoreError;

pub use config::SyncConfig;
pub use controller::{Collaborators, MapController, SyncOutcome};

/// Errors surfaced by the synchronization engine.
///
/// Only [`SyncError::PreconditionViolation`] aborts an operation outright;
/// the controller recovers every other variant locally and reports it with
/// a notice.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The store failed while fetching incidents. The last good incident
    /// set is kept.
    #[error("Failed to fetch incidents: {0}")]
    TransientFetch(#[source] StoreError),

    /// A write was attempted without an authenticated user.
    #[error("You must be logged in to {action}")]
    AuthRequired {
        /// What the user tried to do, e.g. `"send messages"`.
        action: &'static str,
    },

    /// The region snapshot upsert failed.
    #[error("Failed to publish region snapshot: {0}")]
    Publish(#[source] StoreError),

    /// A write (incident or message insert) failed.
    #[error("Failed to write to store: {0}")]
    Write(#[source] StoreError),

    /// The renderer was used before it was initialized.
    #[error("Renderer precondition violated: {message}")]
    PreconditionViolation {
        /// Description of the violated precondition.
        message: String,
    },

    /// User input failed validation.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of what was wrong.
        message: String,
    },

    /// "Report at my location" was requested before a location was known.
    #[error("Could not get your location. Please try again.")]
    LocationRequired,
}

impl SyncError {
    /// Returns `true` if this error must abort the calling operation rather
    /// than being recovered with a notice.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::PreconditionViolation { .. })
    }
}
