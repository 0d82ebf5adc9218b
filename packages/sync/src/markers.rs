//! Keeps the renderer's markers in line with the rendered incident set.
//!
//! Every pass removes all incident markers and rebuilds them from scratch.
//! Marker counts are small, so no attempt is made to keep marker identity
//! stable across passes. The self-location marker is the exception: it is
//! updated in place when it already exists.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use safety_map_incident_models::{GeoPoint, Incident, RECENT_WINDOW_MINUTES};

use crate::SyncError;
use crate::renderer::{
    MapRenderer, MarkerBehavior, MarkerHandle, MarkerKind, MarkerSpec, MarkerStyle, PopupContent,
};

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Incident markers removed.
    pub removed: usize,
    /// Incident markers created.
    pub created: usize,
    /// Incident markers flagged recent.
    pub recent: usize,
    /// A self-location marker is on the map after the pass.
    pub self_marker: bool,
}

/// Owner of the incident id to marker handle mapping.
pub struct MarkerReconciliationEngine {
    current_markers: BTreeMap<String, MarkerHandle>,
    by_handle: BTreeMap<MarkerHandle, String>,
    self_marker: Option<MarkerHandle>,
    recent_window: Duration,
}

impl Default for MarkerReconciliationEngine {
    fn default() -> Self {
        Self::new(Duration::minutes(RECENT_WINDOW_MINUTES))
    }
}

impl MarkerReconciliationEngine {
    /// Creates an engine flagging incidents newer than `recent_window`.
    #[must_use]
    pub const fn new(recent_window: Duration) -> Self {
        Self {
            current_markers: BTreeMap::new(),
            by_handle: BTreeMap::new(),
            self_marker: None,
            recent_window,
        }
    }

    /// [`MarkerReconciliationEngine::reconcile_at`] using the wall clock.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PreconditionViolation`] if the renderer has not
    /// been initialized.
    pub fn reconcile(
        &mut self,
        renderer: &mut dyn MapRenderer,
        incidents: &[Incident],
        user_location: Option<GeoPoint>,
    ) -> Result<ReconcileReport, SyncError> {
        self.reconcile_at(renderer, incidents, user_location, Utc::now())
    }

    /// Makes the renderer show exactly one marker per distinct incident id
    /// in `incidents`, plus one self-location marker when `user_location`
    /// is present.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PreconditionViolation`] if the renderer has not
    /// been initialized. The renderer is left untouched in that case.
    pub fn reconcile_at(
        &mut self,
        renderer: &mut dyn MapRenderer,
        incidents: &[Incident],
        user_location: Option<GeoPoint>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, SyncError> {
        if !renderer.is_initialized() {
            return Err(SyncError::PreconditionViolation {
                message: "reconcile called before the map renderer was initialized".to_string(),
            });
        }

        let mut report = ReconcileReport::default();

        for (_, handle) in std::mem::take(&mut self.current_markers) {
            renderer.remove_marker(handle);
            report.removed += 1;
        }
        self.by_handle.clear();

        let mut seen = BTreeSet::new();
        for incident in incidents {
            if !seen.insert(incident.id.as_str()) {
                log::warn!("Skipping duplicate incident {} in render set", incident.id);
                continue;
            }

            let recent = incident.is_recent_at(now, self.recent_window);
            let handle = renderer.add_marker(incident_marker(incident, recent));
            self.current_markers.insert(incident.id.clone(), handle);
            self.by_handle.insert(handle, incident.id.clone());

            report.created += 1;
            if recent {
                report.recent += 1;
            }
        }

        self.place_self_marker(renderer, user_location);
        report.self_marker = self.self_marker.is_some();

        log::debug!(
            "Reconciled markers: removed={} created={} recent={} self={}",
            report.removed,
            report.created,
            report.recent,
            report.self_marker
        );
        Ok(report)
    }

    fn place_self_marker(&mut self, renderer: &mut dyn MapRenderer, location: Option<GeoPoint>) {
        let Some(location) = location else {
            if let Some(handle) = self.self_marker.take() {
                renderer.remove_marker(handle);
            }
            return;
        };

        let spec = self_marker(location);
        if let Some(handle) = self.self_marker {
            match renderer.update_marker(handle, spec.clone()) {
                Ok(()) => return,
                Err(e) => log::debug!("Self marker {handle:?} is gone ({e}); re-adding"),
            }
        }
        self.self_marker = Some(renderer.add_marker(spec));
    }

    /// Forgets all handles without touching the renderer. Used after the
    /// renderer itself has been recreated.
    pub fn forget(&mut self) {
        self.current_markers.clear();
        self.by_handle.clear();
        self.self_marker = None;
    }

    /// The incident shown by `handle`, if it is a live incident marker.
    #[must_use]
    pub fn incident_for(&self, handle: MarkerHandle) -> Option<&str> {
        self.by_handle.get(&handle).map(String::as_str)
    }

    /// The live marker for `incident_id`.
    #[must_use]
    pub fn handle_for(&self, incident_id: &str) -> Option<MarkerHandle> {
        self.current_markers.get(incident_id).copied()
    }

    /// Number of live incident markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current_markers.len()
    }

    /// Returns `true` if no incident markers are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current_markers.is_empty()
    }
}

fn incident_marker(incident: &Incident, recent: bool) -> MarkerSpec {
    MarkerSpec {
        kind: MarkerKind::Incident {
            incident_id: incident.id.clone(),
        },
        position: incident.location,
        style: MarkerStyle::for_category(incident.category),
        recent,
        popup: Some(PopupContent::for_incident(incident, recent)),
        behavior: MarkerBehavior {
            hover_preview: true,
            click_to_select: true,
        },
    }
}

const fn self_marker(location: GeoPoint) -> MarkerSpec {
    MarkerSpec {
        kind: MarkerKind::SelfLocation,
        position: location,
        style: MarkerStyle::SelfLocation,
        recent: false,
        popup: None,
        behavior: MarkerBehavior {
            hover_preview: false,
            click_to_select: false,
        },
    }
}
