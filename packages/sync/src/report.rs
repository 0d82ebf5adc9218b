//! Incident reporting.

use chrono::{DateTime, Utc};
use safety_map_incident_models::{GeoPoint, Incident, IncidentCategory, NewIncident};
use safety_map_store::RemoteStore;

use crate::SyncError;
use crate::identity::IdentityProvider;

/// A filled-in report form.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDraft {
    /// Headline.
    pub title: String,
    /// Details.
    pub description: String,
    /// Category.
    pub category: IncidentCategory,
    /// Where it happened.
    pub location: GeoPoint,
}

/// Writes a new incident reported by the current user at `now`.
///
/// # Errors
///
/// * [`SyncError::InvalidInput`] if the title is blank
/// * [`SyncError::AuthRequired`] if nobody is signed in
/// * [`SyncError::Write`] if the store rejects the insert
///
/// Nothing is written in the first two cases.
pub async fn submit_report(
    store: &dyn RemoteStore,
    identity: &dyn IdentityProvider,
    draft: ReportDraft,
    now: DateTime<Utc>,
) -> Result<Incident, SyncError> {
    let title = draft.title.trim();
    if title.is_empty() {
        return Err(SyncError::InvalidInput {
            message: "incident title must not be empty".to_string(),
        });
    }

    let Some(user) = identity.current_user().await else {
        return Err(SyncError::AuthRequired {
            action: "report incidents",
        });
    };

    let incident = store
        .insert_incident(NewIncident {
            title: title.to_string(),
            description: draft.description.trim().to_string(),
            category: draft.category,
            location: draft.location,
            reported_at: Some(now),
            reporter_id: user.id,
        })
        .await
        .map_err(|e| {
            log::error!("Error submitting incident: {e}");
            SyncError::Write(e)
        })?;

    log::info!(
        "Reported {} incident {} at {}",
        incident.category,
        incident.id,
        incident.location
    );
    Ok(incident)
}

#[cfg(test)]
mod tests {
    use safety_map_incident_models::CurrentUser;
    use safety_map_store::memory::MemoryStore;

    use super::*;
    use crate::identity::StaticIdentity;

    fn draft(title: &str) -> ReportDraft {
        ReportDraft {
            title: title.to_string(),
            description: " Pothole on the corner ".to_string(),
            category: IncidentCategory::Infrastructure,
            location: GeoPoint::new_unchecked(40.71, -74.0),
        }
    }

    fn signed_in() -> StaticIdentity {
        StaticIdentity::signed_in(CurrentUser {
            id: "u1".to_string(),
            display_name: None,
        })
    }

    #[tokio::test]
    async fn report_is_stamped_with_reporter_and_time() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let incident = submit_report(&store, &signed_in(), draft("Pothole"), now)
            .await
            .unwrap();

        assert_eq!(incident.reporter_id, "u1");
        assert_eq!(incident.reported_at, Some(now));
        assert_eq!(incident.description, "Pothole on the corner");
        assert_eq!(store.select_incidents(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn anonymous_report_writes_nothing() {
        let store = MemoryStore::new();

        let result =
            submit_report(&store, &StaticIdentity::anonymous(), draft("Pothole"), Utc::now()).await;

        assert!(matches!(
            result,
            Err(SyncError::AuthRequired {
                action: "report incidents"
            })
        ));
        assert!(store.select_incidents(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let store = MemoryStore::new();

        assert!(matches!(
            submit_report(&store, &signed_in(), draft("  "), Utc::now()).await,
            Err(SyncError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn store_failure_is_a_write_error() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(matches!(
            submit_report(&store, &signed_in(), draft("Pothole"), Utc::now()).await,
            Err(SyncError::Write(_))
        ));
    }
}
