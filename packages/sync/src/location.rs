//! Location resolution with a fixed fallback.
//!
//! [`LocationResolver::resolve`] makes exactly one attempt at the platform
//! position. Any failure substitutes the configured fallback coordinate
//! and shows a notice; it never fails and never retries.

use std::sync::Arc;

use async_trait::async_trait;
use safety_map_incident_models::GeoPoint;

use crate::notice::{Notice, Notifier};

/// Why the platform position could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// The platform has no location capability.
    #[error("geolocation is not supported")]
    Unsupported,
    /// The user refused access.
    #[error("permission to read the location was denied")]
    Denied,
    /// The platform call failed.
    #[error("location lookup failed: {0}")]
    Failed(String),
}

/// Platform position source.
#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    /// Reads the current position.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError`] if the position is unavailable.
    async fn current_position(&self) -> Result<GeoPoint, LocationError>;
}

/// A [`GeolocationProvider`] that always reports the same point.
pub struct FixedGeolocation(pub GeoPoint);

#[async_trait]
impl GeolocationProvider for FixedGeolocation {
    async fn current_position(&self) -> Result<GeoPoint, LocationError> {
        Ok(self.0)
    }
}

/// A [`GeolocationProvider`] that always fails with the given error.
pub struct UnavailableGeolocation(pub LocationError);

#[async_trait]
impl GeolocationProvider for UnavailableGeolocation {
    async fn current_position(&self) -> Result<GeoPoint, LocationError> {
        Err(self.0.clone())
    }
}

/// Outcome of [`LocationResolver::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    /// The point to use.
    pub point: GeoPoint,
    /// Set when `point` is the fallback, with the reason.
    pub fallback: Option<LocationError>,
}

impl ResolvedLocation {
    /// Returns `true` if the platform position was unavailable.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Resolves the user's position, falling back to a fixed point.
pub struct LocationResolver {
    provider: Arc<dyn GeolocationProvider>,
    fallback: GeoPoint,
    fallback_name: String,
    notifier: Arc<dyn Notifier>,
}

impl LocationResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(
        provider: Arc<dyn GeolocationProvider>,
        fallback: GeoPoint,
        fallback_name: impl Into<String>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            provider,
            fallback,
            fallback_name: fallback_name.into(),
            notifier,
        }
    }

    /// Makes a single attempt at the platform position.
    pub async fn resolve(&self) -> ResolvedLocation {
        match self.provider.current_position().await {
            Ok(point) => {
                log::debug!("Resolved user location {point}");
                self.notifier
                    .notify(Notice::success("Located your position successfully"));
                ResolvedLocation {
                    point,
                    fallback: None,
                }
            }
            Err(e) => {
                log::warn!(
                    "Error getting location: {e}; falling back to {} {}",
                    self.fallback_name,
                    self.fallback
                );
                let description = match e {
                    LocationError::Unsupported => format!(
                        "Geolocation is not supported by your device. Defaulting to {}.",
                        self.fallback_name
                    ),
                    LocationError::Denied | LocationError::Failed(_) => format!(
                        "Could not get your location. Defaulting to {}.",
                        self.fallback_name
                    ),
                };
                self.notifier.notify(Notice::error(description));
                ResolvedLocation {
                    point: self.fallback,
                    fallback: Some(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;

    const NYC: GeoPoint = GeoPoint::new_unchecked(40.7128, -74.006);

    #[tokio::test]
    async fn device_position_is_used_when_available() {
        let notifier = RecordingNotifier::new();
        let here = GeoPoint::new_unchecked(51.5, -0.12);
        let resolver = LocationResolver::new(
            Arc::new(FixedGeolocation(here)),
            NYC,
            "NYC",
            Arc::new(notifier.clone()),
        );

        let resolved = resolver.resolve().await;

        assert_eq!(resolved.point, here);
        assert!(!resolved.is_fallback());
        assert!(!notifier.notices()[0].is_error());
    }

    #[tokio::test]
    async fn denied_position_falls_back_with_error_notice() {
        let notifier = RecordingNotifier::new();
        let resolver = LocationResolver::new(
            Arc::new(UnavailableGeolocation(LocationError::Denied)),
            NYC,
            "NYC",
            Arc::new(notifier.clone()),
        );

        let resolved = resolver.resolve().await;

        assert_eq!(resolved.point, NYC);
        assert_eq!(resolved.fallback, Some(LocationError::Denied));
        let notices = notifier.notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].is_error());
        assert!(notices[0].description.contains("Defaulting to NYC"));
    }

    #[tokio::test]
    async fn unsupported_platform_gets_its_own_notice() {
        let notifier = RecordingNotifier::new();
        let resolver = LocationResolver::new(
            Arc::new(UnavailableGeolocation(LocationError::Unsupported)),
            NYC,
            "NYC",
            Arc::new(notifier.clone()),
        );

        resolver.resolve().await;

        assert!(notifier.notices()[0].description.contains("not supported"));
    }
}
