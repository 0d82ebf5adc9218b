//! In-process doubles for the external collaborators.
//!
//! Each double is cheaply cloneable and shares its state between clones, so
//! a test can hand one clone to the [`crate::MapController`] and inspect
//! the other.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use safety_map_incident_models::{GeoPoint, ViewportBounds};

use crate::notice::{Notice, Notifier};
use crate::renderer::{MapRenderer, MarkerHandle, MarkerKind, MarkerSpec, RendererError};

#[derive(Default)]
struct RendererState {
    initialized: bool,
    fail_initialization: bool,
    center: Option<GeoPoint>,
    zoom: Option<f64>,
    bounds: Option<ViewportBounds>,
    markers: BTreeMap<MarkerHandle, MarkerSpec>,
    next_handle: u64,
    removals: usize,
}

/// A [`MapRenderer`] that records the markers placed on it.
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    state: Arc<Mutex<RendererState>>,
}

impl RecordingRenderer {
    /// Creates a renderer that initializes successfully.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a renderer whose initialization always fails.
    #[must_use]
    pub fn failing() -> Self {
        let renderer = Self::default();
        renderer.lock().fail_initialization = true;
        renderer
    }

    fn lock(&self) -> MutexGuard<'_, RendererState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Sets the bounds reported by [`MapRenderer::current_bounds`].
    pub fn set_bounds(&self, bounds: ViewportBounds) {
        self.lock().bounds = Some(bounds);
    }

    /// All live markers in creation order.
    #[must_use]
    pub fn markers(&self) -> Vec<(MarkerHandle, MarkerSpec)> {
        self.lock()
            .markers
            .iter()
            .map(|(handle, spec)| (*handle, spec.clone()))
            .collect()
    }

    /// Live incident markers only.
    #[must_use]
    pub fn incident_markers(&self) -> Vec<MarkerSpec> {
        self.markers()
            .into_iter()
            .map(|(_, spec)| spec)
            .filter(|spec| spec.incident_id().is_some())
            .collect()
    }

    /// Live self-location markers only.
    #[must_use]
    pub fn self_markers(&self) -> Vec<MarkerSpec> {
        self.markers()
            .into_iter()
            .map(|(_, spec)| spec)
            .filter(|spec| spec.kind == MarkerKind::SelfLocation)
            .collect()
    }

    /// Centre and zoom passed to the last successful initialization.
    #[must_use]
    pub fn view(&self) -> Option<(GeoPoint, f64)> {
        let state = self.lock();
        state.center.zip(state.zoom)
    }

    /// Number of remove calls that hit a live marker.
    #[must_use]
    pub fn removals(&self) -> usize {
        self.lock().removals
    }
}

impl MapRenderer for RecordingRenderer {
    fn initialize(&mut self, center: GeoPoint, zoom: f64) -> Result<(), RendererError> {
        let mut state = self.lock();
        if state.fail_initialization {
            return Err(RendererError::Initialization(
                "renderer configured to fail".to_string(),
            ));
        }
        state.initialized = true;
        state.center = Some(center);
        state.zoom = Some(zoom);
        state.markers.clear();
        drop(state);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    fn add_marker(&mut self, spec: MarkerSpec) -> MarkerHandle {
        let mut state = self.lock();
        state.next_handle += 1;
        let handle = MarkerHandle(state.next_handle);
        state.markers.insert(handle, spec);
        handle
    }

    fn update_marker(
        &mut self,
        handle: MarkerHandle,
        spec: MarkerSpec,
    ) -> Result<(), RendererError> {
        let mut state = self.lock();
        let slot = state
            .markers
            .get_mut(&handle)
            .ok_or(RendererError::UnknownMarker(handle))?;
        *slot = spec;
        drop(state);
        Ok(())
    }

    fn remove_marker(&mut self, handle: MarkerHandle) {
        let mut state = self.lock();
        if state.markers.remove(&handle).is_some() {
            state.removals += 1;
        }
    }

    fn current_bounds(&self) -> Option<ViewportBounds> {
        let state = self.lock();
        if state.initialized { state.bounds } else { None }
    }
}

/// A [`Notifier`] that keeps every notice.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All notices received so far.
    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|notices| notices.clone())
            .unwrap_or_default()
    }

    /// The most recent notice.
    #[must_use]
    pub fn last(&self) -> Option<Notice> {
        self.notices().pop()
    }

    /// Forgets all notices.
    pub fn clear(&self) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.clear();
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice);
        }
    }
}
