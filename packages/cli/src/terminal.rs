//! Terminal stand-ins for the map renderer and toast notices.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use safety_map_incident_models::{GeoPoint, ViewportBounds};
use safety_map_sync::notice::{Notice, NoticeLevel, Notifier};
use safety_map_sync::renderer::{MapRenderer, MarkerHandle, MarkerSpec, RendererError};

#[derive(Default)]
struct Canvas {
    center: Option<(GeoPoint, f64)>,
    bounds: Option<ViewportBounds>,
    markers: BTreeMap<MarkerHandle, MarkerSpec>,
    next_handle: u64,
}

/// Keeps marker state in memory and prints it on demand.
#[derive(Clone, Default)]
pub struct TerminalRenderer {
    canvas: Arc<Mutex<Canvas>>,
}

impl TerminalRenderer {
    fn lock(&self) -> MutexGuard<'_, Canvas> {
        self.canvas.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the bounds the user asked to look at.
    pub fn set_bounds(&self, bounds: ViewportBounds) {
        self.lock().bounds = Some(bounds);
    }

    /// Prints the map centre, the self marker, and one row per incident
    /// marker.
    pub fn print(&self) {
        let canvas = self.lock();

        if let Some((center, zoom)) = canvas.center {
            println!("Map centred on {center} at zoom {zoom}");
        }
        if let Some(bounds) = canvas.bounds {
            println!("Viewport sw={} ne={}", bounds.south_west, bounds.north_east);
        }

        let mut incidents = 0;
        for spec in canvas.markers.values() {
            let Some(id) = spec.incident_id() else {
                println!("You are here: {}", spec.position);
                continue;
            };
            if incidents == 0 {
                println!();
                println!(
                    "{:<38} {:<15} {:<7} {:<26} TITLE",
                    "ID", "CATEGORY", "RECENT", "REPORTED"
                );
                println!("{}", "-".repeat(110));
            }
            incidents += 1;

            let (category, reported, title) = spec.popup.as_ref().map_or(("", "", ""), |p| {
                (p.category.as_str(), p.reported.as_str(), p.title.as_str())
            });
            println!(
                "{:<38} {:<15} {:<7} {:<26} {}",
                id,
                category,
                if spec.recent { "yes" } else { "" },
                reported,
                title
            );
        }
        drop(canvas);

        println!("\n{incidents} incident(s) on the map");
    }
}

impl MapRenderer for TerminalRenderer {
    fn initialize(&mut self, center: GeoPoint, zoom: f64) -> Result<(), RendererError> {
        let mut canvas = self.lock();
        canvas.center = Some((center, zoom));
        canvas.markers.clear();
        drop(canvas);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.lock().center.is_some()
    }

    fn add_marker(&mut self, spec: MarkerSpec) -> MarkerHandle {
        let mut canvas = self.lock();
        canvas.next_handle += 1;
        let handle = MarkerHandle(canvas.next_handle);
        canvas.markers.insert(handle, spec);
        handle
    }

    fn update_marker(
        &mut self,
        handle: MarkerHandle,
        spec: MarkerSpec,
    ) -> Result<(), RendererError> {
        let mut canvas = self.lock();
        let slot = canvas
            .markers
            .get_mut(&handle)
            .ok_or(RendererError::UnknownMarker(handle))?;
        *slot = spec;
        drop(canvas);
        Ok(())
    }

    fn remove_marker(&mut self, handle: MarkerHandle) {
        self.lock().markers.remove(&handle);
    }

    fn current_bounds(&self) -> Option<ViewportBounds> {
        self.lock().bounds
    }
}

/// Prints notices to stderr so they do not mix with command output.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        let marker = match notice.level {
            NoticeLevel::Success => "ok",
            NoticeLevel::Error => "error",
        };
        eprintln!("[{marker}] {}", notice.description);
    }
}
