//! The map view: owns the collaborators and drives one sync cycle per
//! event.
//!
//! ```text
//! resolve location -> initialize renderer -> fetch_all -> render
//! ViewportChanged -> fetch(bounds) -> filter -> reconcile -> publish
//! MarkerClicked -> open thread -> send_message -> InvalidateIncidents -> refresh
//! ```

use std::sync::Arc;

use chrono::Utc;
use safety_map_incident_models::{CurrentUser, GeoPoint, Incident, Message, ViewportBounds};
use safety_map_store::RemoteStore;

use crate::bus::{Command, CommandBus, CommandSender};
use crate::filter::{CategoryFilter, FilterOverlay};
use crate::identity::{IdentityError, IdentityProvider};
use crate::location::{GeolocationProvider, LocationResolver, ResolvedLocation};
use crate::markers::MarkerReconciliationEngine;
use crate::notice::{Notice, Notifier};
use crate::query::{ViewportQueryService, ViewportRequest, ViewportResponse};
use crate::region::RegionSnapshotPublisher;
use crate::renderer::{MapEvent, MapRenderer, MarkerHandle, PopupContent};
use crate::report::{ReportDraft, submit_report};
use crate::thread::{IncidentDetailThread, ThreadEntry};
use crate::{SyncConfig, SyncError};

/// The external systems the controller talks to.
pub struct Collaborators {
    /// Remote data store.
    pub store: Arc<dyn RemoteStore>,
    /// Map renderer.
    pub renderer: Box<dyn MapRenderer>,
    /// Identity provider.
    pub identity: Arc<dyn IdentityProvider>,
    /// Platform position source.
    pub geolocation: Arc<dyn GeolocationProvider>,
    /// User-visible notices.
    pub notifier: Arc<dyn Notifier>,
}

/// What happened to a completed incident fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The fetch replaced the synchronized set and was rendered.
    Applied {
        /// Request sequence number, 0 for the global view.
        seq: u64,
        /// Incidents fetched.
        fetched: usize,
        /// Incidents left after filtering.
        rendered: usize,
    },
    /// The fetch failed; the previous set stays on screen.
    Retained {
        /// Request sequence number, 0 for the global view.
        seq: u64,
    },
    /// The response was older than one already applied and was dropped.
    DiscardedStale {
        /// Request sequence number.
        seq: u64,
        /// Sequence number of the newest applied response.
        last_applied: u64,
    },
}

/// The viewport overlay shown over the map.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentRegion {
    /// Region label.
    pub label: String,
    /// Visible bounds.
    pub bounds: ViewportBounds,
}

/// Coordinates location, queries, markers, the region snapshot, and the
/// incident thread for a single map view.
pub struct MapController {
    config: SyncConfig,
    store: Arc<dyn RemoteStore>,
    renderer: Box<dyn MapRenderer>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn Notifier>,
    resolver: LocationResolver,
    query: ViewportQueryService,
    markers: MarkerReconciliationEngine,
    publisher: RegionSnapshotPublisher,
    filter: FilterOverlay,
    thread: IncidentDetailThread,
    bus: CommandBus,
    synchronized: Vec<Incident>,
    visible: Vec<Incident>,
    user_location: Option<GeoPoint>,
    viewport: Option<ViewportBounds>,
    current_region: Option<CurrentRegion>,
    pending_report_location: Option<GeoPoint>,
    hovered: Option<MarkerHandle>,
    last_applied_seq: u64,
}

impl MapController {
    /// Creates a controller. Nothing is fetched or drawn until
    /// [`MapController::start`].
    #[must_use]
    pub fn new(config: SyncConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            renderer,
            identity,
            geolocation,
            notifier,
        } = collaborators;

        let bus = CommandBus::new();
        let resolver = LocationResolver::new(
            geolocation,
            config.fallback_location,
            config.fallback_name.clone(),
            Arc::clone(&notifier),
        );
        let thread = IncidentDetailThread::new(bus.sender(), config.anonymous_author_name.clone());

        Self {
            query: ViewportQueryService::new(Arc::clone(&store)),
            markers: MarkerReconciliationEngine::new(config.recent_window()),
            publisher: RegionSnapshotPublisher::new(
                Arc::clone(&store),
                config.region_label.clone(),
            ),
            filter: FilterOverlay::default(),
            config,
            store,
            renderer,
            identity,
            notifier,
            resolver,
            thread,
            bus,
            synchronized: vec![],
            visible: vec![],
            user_location: None,
            viewport: None,
            current_region: None,
            pending_report_location: None,
            hovered: None,
            last_applied_seq: 0,
        }
    }

    /// Resolves the user's position, initializes the map around it, and
    /// renders the global incident set.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PreconditionViolation`] if the renderer cannot
    /// be initialized.
    pub async fn start(&mut self) -> Result<SyncOutcome, SyncError> {
        let ResolvedLocation { point, .. } = self.resolver.resolve().await;
        self.user_location = Some(point);

        if let Err(e) = self.renderer.initialize(point, self.config.initial_zoom) {
            log::error!("Error initializing map: {e}");
            self.notifier
                .notify(Notice::error("Failed to initialize map. Please try again."));
            return Err(SyncError::PreconditionViolation {
                message: e.to_string(),
            });
        }
        self.markers.forget();
        self.notifier
            .notify(Notice::success("Map initialized successfully"));

        self.load_all().await
    }

    /// Re-runs the most recent fetch: the last synced viewport, else the
    /// renderer's current bounds, else the global view.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PreconditionViolation`] if rendering fails.
    pub async fn refresh(&mut self) -> Result<SyncOutcome, SyncError> {
        match self.viewport.or_else(|| self.renderer.current_bounds()) {
            Some(bounds) => self.sync_viewport(bounds).await,
            None => self.load_all().await,
        }
    }

    async fn load_all(&mut self) -> Result<SyncOutcome, SyncError> {
        self.ensure_renderer()?;
        match self.query.fetch_all().await {
            Ok(incidents) => {
                let fetched = incidents.len();
                self.replace_synchronized(incidents);
                let rendered = self.render()?;
                Ok(SyncOutcome::Applied {
                    seq: 0,
                    fetched,
                    rendered,
                })
            }
            Err(e) => {
                self.fetch_failed(&e);
                Ok(SyncOutcome::Retained { seq: 0 })
            }
        }
    }

    /// Fetches `bounds`, renders the result, and publishes the region
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PreconditionViolation`] if rendering fails.
    /// Fetch and publish failures are recovered.
    pub async fn sync_viewport(&mut self, bounds: ViewportBounds) -> Result<SyncOutcome, SyncError> {
        let request = self.begin_viewport_sync(bounds);
        let response = request.run().await;
        self.complete_viewport_sync(response).await
    }

    /// First half of [`MapController::sync_viewport`]: records the new
    /// viewport and dispatches a numbered fetch. Several may be outstanding
    /// at once; in-flight requests are never cancelled.
    pub fn begin_viewport_sync(&mut self, bounds: ViewportBounds) -> ViewportRequest {
        self.viewport = Some(bounds);
        self.current_region = Some(CurrentRegion {
            label: self.config.region_label.clone(),
            bounds,
        });

        let request = self.query.begin(bounds);
        log::debug!(
            "Dispatched viewport fetch #{} for sw={} ne={}",
            request.seq(),
            bounds.south_west,
            bounds.north_east
        );
        request
    }

    /// Second half of [`MapController::sync_viewport`].
    ///
    /// Responses are applied in the order they complete, so a slow older
    /// fetch can overwrite a newer one. With
    /// [`SyncConfig::discard_stale_viewports`] set, responses older than
    /// the last applied one are dropped instead.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PreconditionViolation`] if rendering fails.
    pub async fn complete_viewport_sync(
        &mut self,
        response: ViewportResponse,
    ) -> Result<SyncOutcome, SyncError> {
        let ViewportResponse {
            seq,
            bounds,
            result,
        } = response;
        self.ensure_renderer()?;

        if self.config.discard_stale_viewports && seq < self.last_applied_seq {
            log::debug!(
                "Dropping stale viewport response #{seq} (last applied #{})",
                self.last_applied_seq
            );
            return Ok(SyncOutcome::DiscardedStale {
                seq,
                last_applied: self.last_applied_seq,
            });
        }

        let incidents = match result {
            Ok(incidents) => incidents,
            Err(e) => {
                self.fetch_failed(&e);
                return Ok(SyncOutcome::Retained { seq });
            }
        };

        self.last_applied_seq = seq;
        let fetched = incidents.len();
        self.replace_synchronized(incidents);
        let rendered = self.render()?;

        if let Err(e) = self.publisher.publish(bounds, &self.visible).await {
            log::warn!("Region snapshot left stale after viewport #{seq}: {e}");
        }

        Ok(SyncOutcome::Applied {
            seq,
            fetched,
            rendered,
        })
    }

    fn replace_synchronized(&mut self, incidents: Vec<Incident>) {
        self.thread.reconcile_with(&incidents);
        self.synchronized = incidents;
    }

    fn fetch_failed(&self, error: &SyncError) {
        log::error!("Error fetching incidents: {error}");
        self.notifier
            .notify(Notice::error("Failed to load incidents. Please try again."));
    }

    fn ensure_renderer(&self) -> Result<(), SyncError> {
        if self.renderer.is_initialized() {
            Ok(())
        } else {
            Err(SyncError::PreconditionViolation {
                message: "map renderer is not initialized".to_string(),
            })
        }
    }

    fn render(&mut self) -> Result<usize, SyncError> {
        let visible = self.filter.apply(&self.synchronized);
        self.markers
            .reconcile(self.renderer.as_mut(), &visible, self.user_location)?;
        self.visible = visible;
        if self
            .hovered
            .is_some_and(|h| self.markers.incident_for(h).is_none())
        {
            self.hovered = None;
        }
        Ok(self.visible.len())
    }

    /// Applies `category`, then syncs `bounds` when given, so the published
    /// region snapshot lists exactly the rendered incidents.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PreconditionViolation`] if the renderer is not
    /// initialized.
    pub async fn show(
        &mut self,
        bounds: Option<ViewportBounds>,
        category: CategoryFilter,
    ) -> Result<(), SyncError> {
        self.apply_filter(category)?;
        if let Some(bounds) = bounds {
            self.handle_event(MapEvent::ViewportChanged(bounds)).await?;
        }
        Ok(())
    }

    /// Handles one renderer event.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PreconditionViolation`] if a viewport change
    /// arrives before the renderer is initialized.
    pub async fn handle_event(&mut self, event: MapEvent) -> Result<(), SyncError> {
        match event {
            MapEvent::ViewportChanged(bounds) => {
                self.sync_viewport(bounds).await?;
            }
            MapEvent::Clicked(point) => {
                log::debug!("Selected report location {point}");
                self.pending_report_location = Some(point);
            }
            MapEvent::MarkerClicked(handle) => {
                if let Some(id) = self.markers.incident_for(handle).map(str::to_owned) {
                    self.select_incident(&id);
                }
            }
            MapEvent::MarkerHovered(handle) => {
                if self.markers.incident_for(handle).is_some() {
                    self.hovered = Some(handle);
                }
            }
            MapEvent::MarkerUnhovered(handle) => {
                if self.hovered == Some(handle) {
                    self.hovered = None;
                }
            }
        }
        Ok(())
    }

    /// Opens the thread for a rendered incident. Returns `false` if no
    /// rendered incident has that id.
    pub fn select_incident(&mut self, incident_id: &str) -> bool {
        let Some(incident) = self.visible.iter().find(|i| i.id == incident_id) else {
            log::debug!("Cannot select incident {incident_id}: not rendered");
            return false;
        };
        self.thread.open(incident.clone());
        true
    }

    /// Closes the incident thread.
    pub fn close_thread(&mut self) {
        self.thread.close();
    }

    /// Posts a message to the open incident.
    ///
    /// # Errors
    ///
    /// Returns the [`SyncError`] from
    /// [`IncidentDetailThread::send_message`]; a notice has already been
    /// shown for it.
    pub async fn send_message(&mut self, text: &str) -> Result<Message, SyncError> {
        let result = self
            .thread
            .send_message(
                self.store.as_ref(),
                self.identity.as_ref(),
                text,
                Utc::now(),
            )
            .await;

        match &result {
            Ok(_) => self
                .notifier
                .notify(Notice::success("Message sent successfully")),
            Err(e @ SyncError::AuthRequired { .. }) => {
                self.notifier.notify(Notice::error(e.to_string()));
            }
            Err(SyncError::InvalidInput { message }) => {
                log::debug!("Ignoring message: {message}");
            }
            Err(_) => self.notifier.notify(Notice::error("Failed to send message")),
        }

        result
    }

    /// Writes a new incident and refreshes the map.
    ///
    /// # Errors
    ///
    /// Returns the [`SyncError`] from [`submit_report`]; a notice has
    /// already been shown for it.
    pub async fn report_incident(&mut self, draft: ReportDraft) -> Result<Incident, SyncError> {
        let result = submit_report(
            self.store.as_ref(),
            self.identity.as_ref(),
            draft,
            Utc::now(),
        )
        .await;

        match result {
            Ok(incident) => {
                self.pending_report_location = None;
                self.query.invalidate();
                self.notifier
                    .notify(Notice::success("Incident reported successfully"));
                if let Err(e) = self.refresh().await {
                    log::error!("Reported {} but could not refresh the map: {e}", incident.id);
                }
                Ok(incident)
            }
            Err(e) => {
                match &e {
                    SyncError::AuthRequired { .. } | SyncError::InvalidInput { .. } => {
                        self.notifier.notify(Notice::error(e.to_string()));
                    }
                    _ => self.notifier.notify(Notice::error("Failed to submit incident")),
                }
                Err(e)
            }
        }
    }

    /// Uses the resolved user location as the pending report location.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LocationRequired`] if no location is known yet.
    pub fn report_at_user_location(&mut self) -> Result<GeoPoint, SyncError> {
        let Some(point) = self.user_location else {
            let e = SyncError::LocationRequired;
            self.notifier.notify(Notice::error(e.to_string()));
            return Err(e);
        };
        self.pending_report_location = Some(point);
        Ok(point)
    }

    /// Changes the category filter and re-renders the synchronized set.
    /// The region snapshot is not republished.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PreconditionViolation`] if the renderer is not
    /// initialized.
    pub fn apply_filter(&mut self, category: CategoryFilter) -> Result<usize, SyncError> {
        if !self.filter.set(category) {
            return Ok(self.visible.len());
        }
        log::debug!("Filtering incidents by {category}");
        self.render()
    }

    /// Processes every queued [`Command`], then refreshes once if any of
    /// them invalidated the incident set. Returns the number processed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PreconditionViolation`] if rendering fails.
    pub async fn pump_commands(&mut self) -> Result<usize, SyncError> {
        let commands = self.bus.drain();
        let mut invalidated = false;

        for command in &commands {
            log::trace!("Handling command {command:?}");
            match command {
                Command::ApplyFilter(category) => {
                    self.apply_filter(*category)?;
                }
                Command::ReportAtUserLocation => {
                    if let Err(e) = self.report_at_user_location() {
                        log::debug!("Ignoring report-at-location command: {e}");
                    }
                }
                Command::InvalidateIncidents => {
                    self.query.invalidate();
                    invalidated = true;
                }
            }
        }

        if invalidated {
            self.refresh().await?;
        }
        Ok(commands.len())
    }

    /// Ends the session and closes any open thread.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the provider rejects the sign-out.
    pub async fn sign_out(&mut self) -> Result<(), IdentityError> {
        if let Err(e) = self.identity.sign_out().await {
            log::error!("Error signing out: {e}");
            self.notifier.notify(Notice::error("Failed to sign out"));
            return Err(e);
        }
        self.thread.close();
        log::info!("Signed out");
        Ok(())
    }

    /// A producer handle for the command bus.
    #[must_use]
    pub fn commands(&self) -> CommandSender {
        self.bus.sender()
    }

    /// The last successfully fetched incident set, unfiltered.
    #[must_use]
    pub fn synchronized(&self) -> &[Incident] {
        &self.synchronized
    }

    /// The incidents currently rendered.
    #[must_use]
    pub fn visible(&self) -> &[Incident] {
        &self.visible
    }

    /// The active category filter.
    #[must_use]
    pub const fn filter(&self) -> CategoryFilter {
        self.filter.category()
    }

    /// The viewport overlay, once a viewport has been seen.
    #[must_use]
    pub const fn current_region(&self) -> Option<&CurrentRegion> {
        self.current_region.as_ref()
    }

    /// The resolved user position.
    #[must_use]
    pub const fn user_location(&self) -> Option<GeoPoint> {
        self.user_location
    }

    /// Where the next report will be placed, if chosen.
    #[must_use]
    pub const fn pending_report_location(&self) -> Option<GeoPoint> {
        self.pending_report_location
    }

    /// The incident thread.
    #[must_use]
    pub const fn thread(&self) -> &IncidentDetailThread {
        &self.thread
    }

    /// The open thread's messages as seen by the current user.
    pub async fn thread_entries(&self) -> Vec<ThreadEntry> {
        let viewer: Option<CurrentUser> = self.identity.current_user().await;
        self.thread.entries(viewer.as_ref())
    }

    /// Preview content for the hovered marker.
    #[must_use]
    pub fn preview(&self) -> Option<PopupContent> {
        let id = self.markers.incident_for(self.hovered?)?;
        let incident = self.visible.iter().find(|i| i.id == id)?;
        let recent = incident.is_recent_at(Utc::now(), self.config.recent_window());
        Some(PopupContent::for_incident(incident, recent))
    }

    /// The marker showing `incident_id`.
    #[must_use]
    pub fn marker_for(&self, incident_id: &str) -> Option<MarkerHandle> {
        self.markers.handle_for(incident_id)
    }

    /// Sequence number of the last applied viewport response.
    #[must_use]
    pub const fn last_applied_seq(&self) -> u64 {
        self.last_applied_seq
    }

    /// The renderer.
    #[must_use]
    pub fn renderer(&self) -> &dyn MapRenderer {
        self.renderer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Duration;
    use safety_map_incident_models::IncidentCategory;
    use safety_map_store::memory::MemoryStore;

    use super::*;
    use crate::identity::StaticIdentity;
    use crate::location::{FixedGeolocation, LocationError, UnavailableGeolocation};
    use crate::renderer::MarkerStyle;
    use crate::testing::{RecordingNotifier, RecordingRenderer};

    const HOME: GeoPoint = GeoPoint::new_unchecked(40.7128, -74.006);

    struct Harness {
        controller: MapController,
        store: Arc<MemoryStore>,
        renderer: RecordingRenderer,
        notifier: RecordingNotifier,
    }

    fn incident(id: &str, lat: f64, lng: f64, category: IncidentCategory) -> Incident {
        Incident {
            id: id.to_string(),
            title: format!("Incident {id}"),
            description: String::new(),
            category,
            location: GeoPoint::new_unchecked(lat, lng),
            reported_at: Some(Utc::now() - Duration::hours(1)),
            reporter_id: "reporter".to_string(),
            messages: vec![],
        }
    }

    fn manhattan() -> ViewportBounds {
        ViewportBounds::from_edges(-74.02, 40.70, -73.99, 40.73).unwrap()
    }

    fn wide() -> ViewportBounds {
        ViewportBounds::from_edges(-75.0, 40.0, -72.0, 42.0).unwrap()
    }

    fn harness_with(config: SyncConfig, identity: StaticIdentity) -> Harness {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(incident("near", 40.71, -74.00, IncidentCategory::Accident))
            .unwrap();
        store
            .seed(incident("far", 41.00, -73.00, IncidentCategory::Noise))
            .unwrap();

        let renderer = RecordingRenderer::new();
        let notifier = RecordingNotifier::new();
        let controller = MapController::new(
            config,
            Collaborators {
                store: store.clone(),
                renderer: Box::new(renderer.clone()),
                identity: Arc::new(identity),
                geolocation: Arc::new(FixedGeolocation(HOME)),
                notifier: Arc::new(notifier.clone()),
            },
        );

        Harness {
            controller,
            store,
            renderer,
            notifier,
        }
    }

    fn harness() -> Harness {
        harness_with(
            SyncConfig::default(),
            StaticIdentity::signed_in(CurrentUser {
                id: "me".to_string(),
                display_name: Some("me@example.com".to_string()),
            }),
        )
    }

    fn rendered_ids(renderer: &RecordingRenderer) -> BTreeSet<String> {
        renderer
            .incident_markers()
            .iter()
            .filter_map(|m| m.incident_id().map(str::to_owned))
            .collect()
    }

    #[tokio::test]
    async fn start_renders_the_global_view_around_the_user() {
        let mut h = harness();

        let outcome = h.controller.start().await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Applied {
                seq: 0,
                fetched: 2,
                rendered: 2
            }
        );
        assert_eq!(h.renderer.view(), Some((HOME, 12.0)));
        assert_eq!(h.renderer.incident_markers().len(), 2);
        assert_eq!(h.renderer.self_markers().len(), 1);
        let descriptions: Vec<String> = h
            .notifier
            .notices()
            .into_iter()
            .map(|n| n.description)
            .collect();
        assert!(descriptions.contains(&"Located your position successfully".to_string()));
        assert!(descriptions.contains(&"Map initialized successfully".to_string()));
    }

    #[tokio::test]
    async fn end_to_end_viewport_sync() {
        let mut h = harness();
        h.controller.start().await.unwrap();

        h.controller
            .handle_event(MapEvent::ViewportChanged(manhattan()))
            .await
            .unwrap();

        let markers = h.renderer.incident_markers();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].incident_id(), Some("near"));
        assert_eq!(markers[0].style, MarkerStyle::Accident);
        assert!(markers[0].recent);
        assert_eq!(h.renderer.self_markers().len(), 1);

        let snapshot = h.store.select_region().await.unwrap().unwrap();
        assert_eq!(snapshot.incident_ids, BTreeSet::from(["near".to_string()]));

        let region = h.controller.current_region().unwrap();
        assert_eq!(region.label, "Current View");
        assert_eq!(region.bounds, manhattan());
    }

    #[tokio::test]
    async fn location_fallback_still_starts_the_map() {
        let store = Arc::new(MemoryStore::new());
        let renderer = RecordingRenderer::new();
        let notifier = RecordingNotifier::new();
        let mut controller = MapController::new(
            SyncConfig::default(),
            Collaborators {
                store,
                renderer: Box::new(renderer.clone()),
                identity: Arc::new(StaticIdentity::anonymous()),
                geolocation: Arc::new(UnavailableGeolocation(LocationError::Denied)),
                notifier: Arc::new(notifier.clone()),
            },
        );

        controller.start().await.unwrap();

        assert_eq!(controller.user_location(), Some(HOME));
        assert_eq!(renderer.view(), Some((HOME, 12.0)));
        assert!(notifier.notices()[0].is_error());
    }

    #[tokio::test]
    async fn renderer_failure_aborts_start() {
        let renderer = RecordingRenderer::failing();
        let notifier = RecordingNotifier::new();
        let mut controller = MapController::new(
            SyncConfig::default(),
            Collaborators {
                store: Arc::new(MemoryStore::new()),
                renderer: Box::new(renderer),
                identity: Arc::new(StaticIdentity::anonymous()),
                geolocation: Arc::new(FixedGeolocation(HOME)),
                notifier: Arc::new(notifier.clone()),
            },
        );

        let err = controller.start().await.unwrap_err();

        assert!(err.is_fatal());
        assert!(notifier.last().unwrap().is_error());
    }

    #[tokio::test]
    async fn viewport_before_start_is_a_precondition_violation() {
        let mut h = harness();

        let err = h
            .controller
            .handle_event(MapEvent::ViewportChanged(manhattan()))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::PreconditionViolation { .. }));
        assert!(h.store.select_region().await.unwrap().is_none());
        assert!(h.controller.synchronized().is_empty());
        assert!(h.controller.visible().is_empty());
        assert_eq!(h.controller.last_applied_seq(), 0);
        assert!(!h.controller.select_incident("near"));
    }

    #[tokio::test]
    async fn refresh_uses_the_renderer_bounds_before_any_viewport_event() {
        let mut h = harness();
        h.controller.start().await.unwrap();
        h.renderer.set_bounds(manhattan());

        let outcome = h.controller.refresh().await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Applied {
                seq: 1,
                fetched: 1,
                rendered: 1
            }
        );
        let snapshot = h.store.select_region().await.unwrap().unwrap();
        assert_eq!(snapshot.incident_ids, BTreeSet::from(["near".to_string()]));
    }

    #[tokio::test]
    async fn filtered_view_publishes_the_rendered_ids() {
        let mut h = harness();
        h.controller.start().await.unwrap();

        h.controller
            .show(Some(wide()), CategoryFilter::Only(IncidentCategory::Noise))
            .await
            .unwrap();

        let snapshot = h.store.select_region().await.unwrap().unwrap();
        assert_eq!(snapshot.incident_ids, rendered_ids(&h.renderer));
        assert_eq!(snapshot.incident_ids, BTreeSet::from(["far".to_string()]));
    }

    #[tokio::test]
    async fn stored_report_is_ok_even_if_the_map_cannot_refresh() {
        let mut h = harness();

        let incident = h
            .controller
            .report_incident(ReportDraft {
                title: "Fallen tree".to_string(),
                description: String::new(),
                category: IncidentCategory::Other,
                location: HOME,
            })
            .await
            .unwrap();

        assert_eq!(h.store.select_incidents(None).await.unwrap().len(), 3);
        assert_eq!(
            h.notifier.last().unwrap().description,
            "Incident reported successfully"
        );
        assert_eq!(incident.title, "Fallen tree");
    }

    #[tokio::test]
    async fn fetch_failure_keeps_the_last_good_set() {
        let mut h = harness();
        h.controller.start().await.unwrap();
        h.controller.sync_viewport(manhattan()).await.unwrap();
        h.notifier.clear();

        h.store.set_available(false);
        let outcome = h.controller.sync_viewport(wide()).await.unwrap();

        assert_eq!(outcome, SyncOutcome::Retained { seq: 2 });
        assert_eq!(rendered_ids(&h.renderer), BTreeSet::from(["near".to_string()]));
        assert_eq!(h.controller.synchronized().len(), 1);
        assert!(h.notifier.last().unwrap().is_error());
    }

    #[tokio::test]
    async fn publish_failure_does_not_undo_rendering() {
        let mut h = harness();
        h.controller.start().await.unwrap();

        let request = h.controller.begin_viewport_sync(manhattan());
        let response = request.run().await;
        h.store.set_available(false);
        let outcome = h.controller.complete_viewport_sync(response).await.unwrap();

        assert!(matches!(outcome, SyncOutcome::Applied { rendered: 1, .. }));
        assert_eq!(rendered_ids(&h.renderer), BTreeSet::from(["near".to_string()]));
    }

    #[tokio::test]
    async fn out_of_order_responses_apply_in_completion_order() {
        let mut h = harness();
        h.controller.start().await.unwrap();

        let older = h.controller.begin_viewport_sync(wide());
        let newer = h.controller.begin_viewport_sync(manhattan());

        let newer = newer.run().await;
        h.controller.complete_viewport_sync(newer).await.unwrap();
        let older = older.run().await;
        let outcome = h.controller.complete_viewport_sync(older).await.unwrap();

        assert!(matches!(outcome, SyncOutcome::Applied { seq: 1, .. }));
        assert_eq!(h.renderer.incident_markers().len(), 2);
        assert_eq!(h.controller.last_applied_seq(), 1);
    }

    #[tokio::test]
    async fn stale_responses_are_dropped_when_configured() {
        let config = SyncConfig {
            discard_stale_viewports: true,
            ..SyncConfig::default()
        };
        let mut h = harness_with(config, StaticIdentity::anonymous());
        h.controller.start().await.unwrap();

        let older = h.controller.begin_viewport_sync(wide());
        let newer = h.controller.begin_viewport_sync(manhattan());

        let newer = newer.run().await;
        h.controller.complete_viewport_sync(newer).await.unwrap();
        let older = older.run().await;
        let outcome = h.controller.complete_viewport_sync(older).await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::DiscardedStale {
                seq: 1,
                last_applied: 2
            }
        );
        assert_eq!(rendered_ids(&h.renderer), BTreeSet::from(["near".to_string()]));
    }

    #[tokio::test]
    async fn filter_commands_narrow_the_rendered_set() {
        let mut h = harness();
        h.controller.start().await.unwrap();

        h.controller
            .commands()
            .send(Command::ApplyFilter(CategoryFilter::Only(
                IncidentCategory::Noise,
            )));
        assert_eq!(h.controller.pump_commands().await.unwrap(), 1);

        assert_eq!(rendered_ids(&h.renderer), BTreeSet::from(["far".to_string()]));
        assert_eq!(h.controller.synchronized().len(), 2);

        h.controller.apply_filter(CategoryFilter::All).unwrap();
        assert_eq!(h.renderer.incident_markers().len(), 2);
    }

    #[tokio::test]
    async fn marker_click_opens_thread_and_message_round_trips() {
        let mut h = harness();
        h.controller.start().await.unwrap();
        let handle = h.controller.marker_for("near").unwrap();

        h.controller
            .handle_event(MapEvent::MarkerClicked(handle))
            .await
            .unwrap();
        assert_eq!(h.controller.thread().incident().unwrap().id, "near");

        h.controller.send_message("Saw it too").await.unwrap();
        assert_eq!(h.controller.thread().incident().unwrap().messages.len(), 1);
        assert_eq!(
            h.notifier.last().unwrap().description,
            "Message sent successfully"
        );

        assert_eq!(h.controller.pump_commands().await.unwrap(), 1);
        let near = h
            .controller
            .synchronized()
            .iter()
            .find(|i| i.id == "near")
            .unwrap();
        assert_eq!(near.messages.len(), 1);

        let entries = h.controller.thread_entries().await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_own);
    }

    #[tokio::test]
    async fn anonymous_writes_are_refused_with_a_notice() {
        let mut h = harness_with(SyncConfig::default(), StaticIdentity::anonymous());
        h.controller.start().await.unwrap();
        assert!(h.controller.select_incident("near"));

        let err = h.controller.send_message("hello").await.unwrap_err();
        assert!(matches!(err, SyncError::AuthRequired { .. }));
        assert_eq!(
            h.notifier.last().unwrap().description,
            "You must be logged in to send messages"
        );
        assert!(h.controller.thread().incident().unwrap().messages.is_empty());

        let draft = ReportDraft {
            title: "Pothole".to_string(),
            description: String::new(),
            category: IncidentCategory::Infrastructure,
            location: HOME,
        };
        h.controller.report_incident(draft).await.unwrap_err();
        assert_eq!(
            h.notifier.last().unwrap().description,
            "You must be logged in to report incidents"
        );
        assert_eq!(h.store.select_incidents(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reporting_at_a_clicked_point_refreshes_the_map() {
        let mut h = harness();
        h.controller.start().await.unwrap();
        h.controller.sync_viewport(manhattan()).await.unwrap();

        let spot = GeoPoint::new_unchecked(40.715, -74.01);
        h.controller
            .handle_event(MapEvent::Clicked(spot))
            .await
            .unwrap();
        assert_eq!(h.controller.pending_report_location(), Some(spot));

        let incident = h
            .controller
            .report_incident(ReportDraft {
                title: "Broken streetlight".to_string(),
                description: "Corner is dark".to_string(),
                category: IncidentCategory::Infrastructure,
                location: spot,
            })
            .await
            .unwrap();

        assert_eq!(incident.reporter_id, "me");
        assert_eq!(h.controller.pending_report_location(), None);
        assert_eq!(h.renderer.incident_markers().len(), 2);
        let snapshot = h.store.select_region().await.unwrap().unwrap();
        assert!(snapshot.incident_ids.contains(&incident.id));
    }

    #[tokio::test]
    async fn report_at_user_location_uses_the_resolved_point() {
        let mut h = harness();

        assert!(matches!(
            h.controller.report_at_user_location(),
            Err(SyncError::LocationRequired)
        ));
        h.controller.commands().send(Command::ReportAtUserLocation);
        assert_eq!(h.controller.pump_commands().await.unwrap(), 1);
        assert_eq!(h.controller.pending_report_location(), None);

        h.controller.start().await.unwrap();
        h.controller.commands().send(Command::ReportAtUserLocation);
        h.controller.pump_commands().await.unwrap();

        assert_eq!(h.controller.pending_report_location(), Some(HOME));
    }

    #[tokio::test]
    async fn hover_shows_a_preview() {
        let mut h = harness();
        h.controller.start().await.unwrap();
        let handle = h.controller.marker_for("near").unwrap();

        h.controller
            .handle_event(MapEvent::MarkerHovered(handle))
            .await
            .unwrap();
        let preview = h.controller.preview().unwrap();
        assert_eq!(preview.title, "Incident near");
        assert!(preview.recent);

        h.controller
            .handle_event(MapEvent::MarkerUnhovered(handle))
            .await
            .unwrap();
        assert!(h.controller.preview().is_none());
    }

    #[tokio::test]
    async fn sign_out_closes_the_thread() {
        let mut h = harness();
        h.controller.start().await.unwrap();
        h.controller.select_incident("near");

        h.controller.sign_out().await.unwrap();

        assert!(!h.controller.thread().is_open());
        assert!(h.controller.send_message("hi").await.is_err());
    }
}
