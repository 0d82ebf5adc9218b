//! The shared "current region" record and its readers.

use std::sync::Arc;

use safety_map_incident_models::{Incident, RegionSnapshot, ViewportBounds};
use safety_map_store::RemoteStore;

use crate::SyncError;

/// Writes the singleton [`RegionSnapshot`] after each viewport sync.
///
/// Writes are last-writer-wins across every session sharing the store.
pub struct RegionSnapshotPublisher {
    store: Arc<dyn RemoteStore>,
    label: String,
}

impl RegionSnapshotPublisher {
    /// Creates a publisher writing snapshots labelled `label`.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>, label: impl Into<String>) -> Self {
        Self {
            store,
            label: label.into(),
        }
    }

    /// Overwrites the snapshot with the ids of `incidents` and returns the
    /// new version. An empty slice clears the previous membership.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Publish`] if the upsert fails. Nothing is rolled
    /// back; the next successful sync overwrites the snapshot again.
    pub async fn publish(
        &self,
        bounds: ViewportBounds,
        incidents: &[Incident],
    ) -> Result<u64, SyncError> {
        let snapshot = RegionSnapshot::new(
            self.label.clone(),
            incidents.iter().map(|incident| incident.id.clone()),
        );

        match self.store.upsert_region(&snapshot).await {
            Ok(version) => {
                log::debug!(
                    "Published region snapshot v{version} with {} incidents for sw={} ne={}",
                    snapshot.incident_ids.len(),
                    bounds.south_west,
                    bounds.north_east
                );
                Ok(version)
            }
            Err(e) => {
                log::error!("Error updating current region: {e}");
                Err(SyncError::Publish(e))
            }
        }
    }

    /// Reads the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransientFetch`] if the store fails.
    pub async fn read(&self) -> Result<Option<RegionSnapshot>, SyncError> {
        self.store
            .select_region()
            .await
            .map_err(SyncError::TransientFetch)
    }
}

/// What is currently visible, as last published by any session.
#[derive(Debug, Clone, Default)]
pub struct RegionalInsights {
    /// The snapshot read, if any.
    pub snapshot: Option<RegionSnapshot>,
    /// The incidents the snapshot lists, newest first.
    pub incidents: Vec<Incident>,
}

impl RegionalInsights {
    /// Reads the region snapshot and the incidents it names.
    ///
    /// A missing or empty snapshot yields no incidents.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransientFetch`] if either read fails.
    pub async fn load(store: &dyn RemoteStore) -> Result<Self, SyncError> {
        let snapshot = store
            .select_region()
            .await
            .map_err(SyncError::TransientFetch)?;

        let ids: Vec<String> = snapshot
            .as_ref()
            .map(|s| s.incident_ids.iter().cloned().collect())
            .unwrap_or_default();

        if ids.is_empty() {
            log::warn!("No current region data found");
            return Ok(Self {
                snapshot,
                incidents: vec![],
            });
        }

        let incidents = store
            .select_incidents_by_ids(&ids)
            .await
            .map_err(SyncError::TransientFetch)?;

        log::debug!(
            "Loaded regional insights: {} of {} listed incidents",
            incidents.len(),
            ids.len()
        );
        Ok(Self {
            snapshot,
            incidents,
        })
    }

    /// Number of incidents in view.
    #[must_use]
    pub fn visible_count(&self) -> usize {
        self.incidents.len()
    }

    /// The snapshot label, if a snapshot exists.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.snapshot.as_ref().map(|s| s.label.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use safety_map_incident_models::{GeoPoint, IncidentCategory};
    use safety_map_store::memory::MemoryStore;

    use super::*;

    fn incident(id: &str) -> Incident {
        Incident {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            category: IncidentCategory::Noise,
            location: GeoPoint::new_unchecked(40.71, -74.0),
            reported_at: None,
            reporter_id: "u1".to_string(),
            messages: vec![],
        }
    }

    fn bounds() -> ViewportBounds {
        ViewportBounds::from_edges(-74.02, 40.70, -73.99, 40.73).unwrap()
    }

    fn ids(snapshot: &RegionSnapshot) -> BTreeSet<&str> {
        snapshot.incident_ids.iter().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn publish_overwrites_membership_exactly() {
        let store = Arc::new(MemoryStore::new());
        let publisher = RegionSnapshotPublisher::new(store, "Current View");

        let first = publisher
            .publish(bounds(), &[incident("a"), incident("b")])
            .await
            .unwrap();
        let second = publisher.publish(bounds(), &[incident("c")]).await.unwrap();
        assert!(second > first);

        let snapshot = publisher.read().await.unwrap().unwrap();
        assert_eq!(ids(&snapshot), BTreeSet::from(["c"]));
        assert_eq!(snapshot.label, "Current View");
    }

    #[tokio::test]
    async fn publishing_nothing_clears_the_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let publisher = RegionSnapshotPublisher::new(store, "Current View");

        publisher.publish(bounds(), &[incident("a")]).await.unwrap();
        publisher.publish(bounds(), &[]).await.unwrap();

        let snapshot = publisher.read().await.unwrap().unwrap();
        assert!(snapshot.incident_ids.is_empty());
    }

    #[tokio::test]
    async fn publish_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let publisher = RegionSnapshotPublisher::new(store, "Current View");

        assert!(matches!(
            publisher.publish(bounds(), &[incident("a")]).await,
            Err(SyncError::Publish(_))
        ));
    }

    #[tokio::test]
    async fn insights_follow_the_snapshot() {
        let store = Arc::new(MemoryStore::new());
        for id in ["a", "b", "c"] {
            store.seed(incident(id)).unwrap();
        }

        let empty = RegionalInsights::load(store.as_ref()).await.unwrap();
        assert!(empty.snapshot.is_none());
        assert_eq!(empty.visible_count(), 0);

        RegionSnapshotPublisher::new(store.clone(), "Current View")
            .publish(bounds(), &[incident("a"), incident("c"), incident("gone")])
            .await
            .unwrap();

        let insights = RegionalInsights::load(store.as_ref()).await.unwrap();
        assert_eq!(insights.label(), Some("Current View"));
        assert_eq!(insights.visible_count(), 2);
    }
}
