#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Remote data store interface for the safety map.
//!
//! The store exposes three logical tables: `incidents`, `messages`, and the
//! single-row `current_region`. The sync engine only talks to the
//! [`RemoteStore`] trait; two backends are provided:
//!
//! - [`memory::MemoryStore`] keeps everything in process and indexes
//!   incident locations in an R-tree. It can be switched unavailable to
//!   simulate an unreachable backend.
//! - [`sqlite::SqliteStore`] persists to a `SQLite` file through
//!   `switchy_database`.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use safety_map_incident_models::{
    Incident, Message, NewIncident, NewMessage, RegionSnapshot, ViewportBounds,
};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of what went wrong.
        message: String,
    },

    /// A database query or command failed.
    #[error("Database error: {0}")]
    Database(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of row that was looked up.
        entity: &'static str,
        /// The missing id.
        id: String,
    },

    /// A conditional region write saw a different version.
    #[error("Region snapshot version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        /// Version the caller expected.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// A stored value could not be converted into a model type.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl StoreError {
    /// Returns `true` for failures a caller may reasonably retry later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Database(_) | Self::Io(_))
    }
}

/// Query/mutation interface over the remote store.
///
/// Incident reads always eager-load each incident's messages in insertion
/// order and return incidents newest first, undated ones last.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Selects incidents, optionally restricted to an inclusive bounding
    /// box.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn select_incidents(
        &self,
        bounds: Option<ViewportBounds>,
    ) -> Result<Vec<Incident>, StoreError>;

    /// Selects the incidents with the given ids. Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn select_incidents_by_ids(&self, ids: &[String]) -> Result<Vec<Incident>, StoreError>;

    /// Inserts an incident and returns it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn insert_incident(&self, incident: NewIncident) -> Result<Incident, StoreError>;

    /// Appends a message to an incident's thread.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the incident does not exist, or
    /// another [`StoreError`] if the backend fails.
    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Selects an incident's messages in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn select_messages(&self, incident_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Inserts or overwrites the singleton region snapshot and returns the
    /// new version. Last writer wins.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn upsert_region(&self, snapshot: &RegionSnapshot) -> Result<u64, StoreError>;

    /// Overwrites the region snapshot only if the stored version equals
    /// `expected` (0 meaning "no snapshot yet"), returning the new version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionConflict`] on a version mismatch, or
    /// another [`StoreError`] if the backend fails.
    async fn upsert_region_if_version(
        &self,
        snapshot: &RegionSnapshot,
        expected: u64,
    ) -> Result<u64, StoreError>;

    /// Reads the region snapshot, if one has been written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn select_region(&self) -> Result<Option<RegionSnapshot>, StoreError>;
}

/// Generates a new opaque row id.
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
