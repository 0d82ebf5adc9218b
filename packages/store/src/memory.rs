//! In-process [`RemoteStore`] backend.
//!
//! Incident locations are indexed in an R-tree so bounding box queries do
//! not scan every row. Envelope intersection is inclusive on every edge,
//! which matches the viewport filter semantics for points.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree};
use safety_map_incident_models::{
    Incident, Message, NewIncident, NewMessage, RegionSnapshot, ViewportBounds, sort_newest_first,
};

use crate::{RemoteStore, StoreError, new_id};

type IndexedPoint = GeomWithData<[f64; 2], String>;

#[derive(Default)]
struct State {
    /// incident id -> incident without messages
    incidents: BTreeMap<String, Incident>,
    /// `[lng, lat]` -> incident id
    index: RTree<IndexedPoint>,
    /// incident id -> thread in insertion order
    messages: BTreeMap<String, Vec<Message>>,
    region: Option<RegionSnapshot>,
}

impl State {
    fn with_messages(&self, incident: &Incident) -> Incident {
        let mut incident = incident.clone();
        incident.messages = self
            .messages
            .get(&incident.id)
            .cloned()
            .unwrap_or_default();
        incident
    }

    fn insert(&mut self, mut incident: Incident) {
        let messages = std::mem::take(&mut incident.messages);
        if let Some(previous) = self.incidents.get(&incident.id) {
            self.index.remove(&GeomWithData::new(
                [previous.location.lng, previous.location.lat],
                previous.id.clone(),
            ));
        }
        self.index.insert(GeomWithData::new(
            [incident.location.lng, incident.location.lat],
            incident.id.clone(),
        ));
        self.messages
            .entry(incident.id.clone())
            .or_default()
            .extend(messages);
        self.incidents.insert(incident.id.clone(), incident);
    }

    fn region_version(&self) -> u64 {
        self.region.as_ref().map_or(0, |r| r.version)
    }

    fn write_region(&mut self, snapshot: &RegionSnapshot) -> u64 {
        let version = self.region_version() + 1;
        let mut stored = snapshot.clone();
        stored.version = version;
        self.region = Some(stored);
        version
    }
}

/// A [`RemoteStore`] that keeps all rows in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fully-formed incident (including any messages) as-is.
    /// Seeding an existing id replaces its row and location.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the internal lock is poisoned.
    pub fn seed(&self, incident: Incident) -> Result<(), StoreError> {
        self.write()?.insert(incident);
        Ok(())
    }

    /// Simulates the backend going away (`false`) or coming back (`true`).
    /// While unavailable every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "memory store is switched off".to_string(),
            });
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.check_available()?;
        self.state
            .read()
            .map_err(|e| StoreError::Database(format!("memory store lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|e| StoreError::Database(format!("memory store lock poisoned: {e}")))
    }

    fn select_sync(&self, bounds: Option<ViewportBounds>) -> Result<Vec<Incident>, StoreError> {
        let state = self.read()?;

        let mut incidents: Vec<Incident> = match bounds {
            Some(bounds) => {
                let envelope = AABB::from_corners(
                    [bounds.west(), bounds.south()],
                    [bounds.east(), bounds.north()],
                );
                state
                    .index
                    .locate_in_envelope_intersecting(&envelope)
                    .filter_map(|entry| state.incidents.get(&entry.data))
                    .map(|incident| state.with_messages(incident))
                    .collect()
            }
            None => state
                .incidents
                .values()
                .map(|incident| state.with_messages(incident))
                .collect(),
        };
        drop(state);

        sort_newest_first(&mut incidents);
        Ok(incidents)
    }

    fn select_by_ids_sync(&self, ids: &[String]) -> Result<Vec<Incident>, StoreError> {
        let state = self.read()?;
        let mut incidents: Vec<Incident> = ids
            .iter()
            .filter_map(|id| state.incidents.get(id))
            .map(|incident| state.with_messages(incident))
            .collect();
        drop(state);

        sort_newest_first(&mut incidents);
        Ok(incidents)
    }

    fn insert_incident_sync(&self, incident: NewIncident) -> Result<Incident, StoreError> {
        self.check_available()?;

        let incident = Incident {
            id: new_id(),
            title: incident.title,
            description: incident.description,
            category: incident.category,
            location: incident.location,
            reported_at: incident.reported_at,
            reporter_id: incident.reporter_id,
            messages: Vec::new(),
        };
        self.write()?.insert(incident.clone());

        Ok(incident)
    }

    fn insert_message_sync(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.check_available()?;
        let mut state = self.write()?;

        if !state.incidents.contains_key(&message.incident_id) {
            return Err(StoreError::NotFound {
                entity: "incident",
                id: message.incident_id,
            });
        }

        let message = Message {
            id: new_id(),
            incident_id: message.incident_id,
            text: message.text,
            author_display_name: message.author_display_name,
            author_id: message.author_id,
            sent_at: message.sent_at,
        };
        state
            .messages
            .entry(message.incident_id.clone())
            .or_default()
            .push(message.clone());

        Ok(message)
    }

    fn select_messages_sync(&self, incident_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .read()?
            .messages
            .get(incident_id)
            .cloned()
            .unwrap_or_default())
    }

    fn upsert_region_sync(
        &self,
        snapshot: &RegionSnapshot,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut state = self.write()?;

        if let Some(expected) = expected {
            let actual = state.region_version();
            if actual != expected {
                return Err(StoreError::VersionConflict { expected, actual });
            }
        }

        Ok(state.write_region(snapshot))
    }

    fn select_region_sync(&self) -> Result<Option<RegionSnapshot>, StoreError> {
        Ok(self.read()?.region.clone())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn select_incidents(
        &self,
        bounds: Option<ViewportBounds>,
    ) -> Result<Vec<Incident>, StoreError> {
        self.select_sync(bounds)
    }

    async fn select_incidents_by_ids(&self, ids: &[String]) -> Result<Vec<Incident>, StoreError> {
        self.select_by_ids_sync(ids)
    }

    async fn insert_incident(&self, incident: NewIncident) -> Result<Incident, StoreError> {
        self.insert_incident_sync(incident)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.insert_message_sync(message)
    }

    async fn select_messages(&self, incident_id: &str) -> Result<Vec<Message>, StoreError> {
        self.select_messages_sync(incident_id)
    }

    async fn upsert_region(&self, snapshot: &RegionSnapshot) -> Result<u64, StoreError> {
        self.upsert_region_sync(snapshot, None)
    }

    async fn upsert_region_if_version(
        &self,
        snapshot: &RegionSnapshot,
        expected: u64,
    ) -> Result<u64, StoreError> {
        self.upsert_region_sync(snapshot, Some(expected))
    }

    async fn select_region(&self) -> Result<Option<RegionSnapshot>, StoreError> {
        self.select_region_sync()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use safety_map_incident_models::{GeoPoint, IncidentCategory};

    use super::*;

    fn incident(id: &str, lat: f64, lng: f64, hours_ago: Option<i64>) -> Incident {
        Incident {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            category: IncidentCategory::Safety,
            location: GeoPoint::new_unchecked(lat, lng),
            reported_at: hours_ago.map(|h| Utc::now() - Duration::hours(h)),
            reporter_id: "reporter".to_string(),
            messages: Vec::new(),
        }
    }

    fn store_with(incidents: Vec<Incident>) -> MemoryStore {
        let store = MemoryStore::new();
        for incident in incidents {
            store.seed(incident).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn bounded_select_is_inclusive_and_ordered() {
        let store = store_with(vec![
            incident("edge", 40.70, -74.02, Some(5)),
            incident("inside", 40.71, -74.00, Some(1)),
            incident("undated", 40.72, -74.01, None),
            incident("outside", 41.00, -73.00, Some(0)),
        ]);
        let bounds = ViewportBounds::from_edges(-74.02, 40.70, -73.99, 40.73).unwrap();

        let ids: Vec<String> = store
            .select_incidents(Some(bounds))
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();

        assert_eq!(ids, ["inside", "edge", "undated"]);
    }

    #[tokio::test]
    async fn unbounded_select_returns_everything() {
        let store = store_with(vec![
            incident("a", 10.0, 10.0, Some(2)),
            incident("b", -10.0, -10.0, Some(1)),
        ]);

        let incidents = store.select_incidents(None).await.unwrap();
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].id, "b");
    }

    #[tokio::test]
    async fn messages_are_eager_loaded_in_insertion_order() {
        let store = store_with(vec![incident("a", 0.0, 0.0, Some(1))]);

        for text in ["first", "second"] {
            store
                .insert_message(NewMessage {
                    incident_id: "a".to_string(),
                    text: text.to_string(),
                    author_display_name: "someone".to_string(),
                    author_id: "u1".to_string(),
                    sent_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let incidents = store.select_incidents(None).await.unwrap();
        let texts: Vec<&str> = incidents[0]
            .messages
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(texts, ["first", "second"]);
    }

    #[tokio::test]
    async fn message_for_unknown_incident_is_rejected() {
        let store = MemoryStore::new();
        let result = store
            .insert_message(NewMessage {
                incident_id: "missing".to_string(),
                text: "hello".to_string(),
                author_display_name: "someone".to_string(),
                author_id: "u1".to_string(),
                sent_at: Utc::now(),
            })
            .await;

        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn region_upsert_overwrites_and_bumps_version() {
        let store = MemoryStore::new();

        let v1 = store
            .upsert_region(&RegionSnapshot::new("Current View", ["a".to_string()]))
            .await
            .unwrap();
        let v2 = store
            .upsert_region(&RegionSnapshot::new("Current View", Vec::<String>::new()))
            .await
            .unwrap();

        assert_eq!((v1, v2), (1, 2));
        let region = store.select_region().await.unwrap().unwrap();
        assert!(region.incident_ids.is_empty());
        assert_eq!(region.version, 2);
    }

    #[tokio::test]
    async fn conditional_region_write_rejects_stale_version() {
        let store = MemoryStore::new();
        let snapshot = RegionSnapshot::new("Current View", ["a".to_string()]);

        assert_eq!(store.upsert_region_if_version(&snapshot, 0).await.unwrap(), 1);
        let conflict = store.upsert_region_if_version(&snapshot, 0).await;
        assert!(matches!(
            conflict,
            Err(StoreError::VersionConflict {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = store_with(vec![incident("a", 0.0, 0.0, None)]);
        store.set_available(false);

        let err = store.select_incidents(None).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.select_region().await.is_err());

        store.set_available(true);
        assert_eq!(store.select_incidents(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reseeding_an_id_moves_it() {
        let store = store_with(vec![incident("moved", 40.71, -74.00, Some(1))]);
        store
            .seed(incident("moved", 41.00, -73.00, Some(1)))
            .unwrap();

        let manhattan = ViewportBounds::from_edges(-74.02, 40.70, -73.99, 40.73).unwrap();
        assert!(store.select_incidents(Some(manhattan)).await.unwrap().is_empty());

        let wide = ViewportBounds::from_edges(-75.0, 40.0, -72.0, 42.0).unwrap();
        let found = store.select_incidents(Some(wide)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!((found[0].location.lat - 41.00).abs() < f64::EPSILON);
    }
}
