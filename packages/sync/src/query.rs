//! Viewport-scoped incident queries.
//!
//! A viewport fetch is split in two so that several can be in flight at
//! once: [`ViewportQueryService::begin`] stamps a [`ViewportRequest`] with
//! the next sequence number, and [`ViewportRequest::run`] performs the
//! store round trip without borrowing the service. Responses may therefore
//! complete in any order; the controller decides what to do with late
//! ones.

use std::sync::Arc;

use safety_map_incident_models::{Incident, ViewportBounds, sort_newest_first};
use safety_map_store::RemoteStore;

use crate::SyncError;

/// Fetches incidents from the remote store.
pub struct ViewportQueryService {
    store: Arc<dyn RemoteStore>,
    cache: Option<Vec<Incident>>,
    next_seq: u64,
}

impl ViewportQueryService {
    /// Creates a service over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            cache: None,
            next_seq: 0,
        }
    }

    /// Incidents inside the inclusive rectangle `bounds`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransientFetch`] if the store fails.
    pub async fn fetch(&self, bounds: ViewportBounds) -> Result<Vec<Incident>, SyncError> {
        fetch_bounded(self.store.as_ref(), bounds).await
    }

    /// Every incident, newest first. The result is cached until
    /// [`ViewportQueryService::invalidate`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransientFetch`] if the store fails. A failed
    /// fetch leaves the cache untouched.
    pub async fn fetch_all(&mut self) -> Result<Vec<Incident>, SyncError> {
        if let Some(cached) = &self.cache {
            log::trace!("fetch_all: serving {} cached incidents", cached.len());
            return Ok(cached.clone());
        }

        let mut incidents = self
            .store
            .select_incidents(None)
            .await
            .map_err(SyncError::TransientFetch)?;
        sort_newest_first(&mut incidents);

        log::debug!("fetch_all: fetched {} incidents", incidents.len());
        self.cache = Some(incidents.clone());
        Ok(incidents)
    }

    /// Drops the cached [`ViewportQueryService::fetch_all`] result.
    pub fn invalidate(&mut self) {
        if self.cache.take().is_some() {
            log::debug!("Invalidated cached incident set");
        }
    }

    /// Returns `true` if a cached global result is held.
    #[must_use]
    pub const fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Stamps a new viewport fetch with the next sequence number.
    pub fn begin(&mut self, bounds: ViewportBounds) -> ViewportRequest {
        self.next_seq += 1;
        ViewportRequest {
            seq: self.next_seq,
            bounds,
            store: Arc::clone(&self.store),
        }
    }
}

/// A dispatched viewport fetch.
pub struct ViewportRequest {
    seq: u64,
    bounds: ViewportBounds,
    store: Arc<dyn RemoteStore>,
}

impl ViewportRequest {
    /// Dispatch order of this request, starting at 1.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Performs the fetch.
    pub async fn run(self) -> ViewportResponse {
        let result = fetch_bounded(self.store.as_ref(), self.bounds).await;
        ViewportResponse {
            seq: self.seq,
            bounds: self.bounds,
            result,
        }
    }
}

/// A completed viewport fetch.
#[derive(Debug)]
pub struct ViewportResponse {
    /// Dispatch order of the request.
    pub seq: u64,
    /// The requested bounds.
    pub bounds: ViewportBounds,
    /// Incidents, or the store failure.
    pub result: Result<Vec<Incident>, SyncError>,
}

async fn fetch_bounded(
    store: &dyn RemoteStore,
    bounds: ViewportBounds,
) -> Result<Vec<Incident>, SyncError> {
    let mut incidents = store.select_incidents(Some(bounds)).await.map_err(|e| {
        log::warn!("Viewport fetch for {bounds:?} failed: {e}");
        SyncError::TransientFetch(e)
    })?;

    // Backends may over-select.
    incidents.retain(|incident| bounds.contains(incident.location));
    sort_newest_first(&mut incidents);

    log::debug!(
        "Fetched {} incidents for bounds sw={} ne={}",
        incidents.len(),
        bounds.south_west,
        bounds.north_east
    );
    Ok(incidents)
}
