//! The selected incident's message thread.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use safety_map_incident_models::{CurrentUser, Incident, Message, NewMessage};
use safety_map_store::RemoteStore;

use crate::SyncError;
use crate::bus::{Command, CommandSender};
use crate::identity::IdentityProvider;

#[derive(Debug, Clone, Default, PartialEq)]
enum ThreadState {
    #[default]
    Closed,
    Open(Incident),
}

/// A message as displayed to a particular user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEntry {
    /// The message.
    pub message: Message,
    /// Sent by the viewing user.
    pub is_own: bool,
}

/// Detail view state for the selected incident.
pub struct IncidentDetailThread {
    state: ThreadState,
    anonymous_author_name: String,
    commands: CommandSender,
}

impl IncidentDetailThread {
    /// Creates a closed thread. Successful sends queue
    /// [`Command::InvalidateIncidents`] on `commands`.
    #[must_use]
    pub fn new(commands: CommandSender, anonymous_author_name: impl Into<String>) -> Self {
        Self {
            state: ThreadState::Closed,
            anonymous_author_name: anonymous_author_name.into(),
            commands,
        }
    }

    /// The open incident, if any.
    #[must_use]
    pub const fn incident(&self) -> Option<&Incident> {
        match &self.state {
            ThreadState::Open(incident) => Some(incident),
            ThreadState::Closed => None,
        }
    }

    /// Returns `true` while an incident is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, ThreadState::Open(_))
    }

    /// Opens `incident`, replacing whatever was open.
    pub fn open(&mut self, incident: Incident) {
        log::debug!("Opening incident {}", incident.id);
        self.state = ThreadState::Open(incident);
    }

    /// Closes the thread.
    pub fn close(&mut self) {
        if let ThreadState::Open(incident) = std::mem::take(&mut self.state) {
            log::debug!("Closing incident {}", incident.id);
        }
    }

    /// Posts `text` to the open incident as the current user.
    ///
    /// The write happens first; the message is appended locally only once
    /// the store has accepted it. Its `sent_at` is never earlier than the
    /// previous message's.
    ///
    /// # Errors
    ///
    /// * [`SyncError::InvalidInput`] if `text` is blank or no incident is
    ///   open
    /// * [`SyncError::AuthRequired`] if nobody is signed in
    /// * [`SyncError::Write`] if the store rejects the message
    ///
    /// No write is attempted in the first two cases, and the thread is
    /// unchanged in all three.
    pub async fn send_message(
        &mut self,
        store: &dyn RemoteStore,
        identity: &dyn IdentityProvider,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::InvalidInput {
                message: "message text must not be empty".to_string(),
            });
        }

        let Some(incident) = self.incident() else {
            return Err(SyncError::InvalidInput {
                message: "no incident is open".to_string(),
            });
        };

        let Some(user) = identity.current_user().await else {
            return Err(SyncError::AuthRequired {
                action: "send messages",
            });
        };

        let sent_at = incident
            .messages
            .last()
            .map_or(now, |last| last.sent_at.max(now));

        let message = store
            .insert_message(NewMessage {
                incident_id: incident.id.clone(),
                text: text.to_string(),
                author_display_name: user
                    .display_name
                    .unwrap_or_else(|| self.anonymous_author_name.clone()),
                author_id: user.id,
                sent_at,
            })
            .await
            .map_err(|e| {
                log::error!("Error sending message: {e}");
                SyncError::Write(e)
            })?;

        if let ThreadState::Open(open) = &mut self.state {
            open.messages.push(message.clone());
            log::debug!(
                "Appended message {} to incident {} ({} messages)",
                message.id,
                open.id,
                open.messages.len()
            );
        }

        self.commands.send(Command::InvalidateIncidents);
        Ok(message)
    }

    /// Swaps the open incident for its authoritative copy from a fresh
    /// fetch, keeping any locally appended messages the copy lacks.
    pub fn reconcile_with(&mut self, incidents: &[Incident]) {
        let ThreadState::Open(open) = &mut self.state else {
            return;
        };
        let Some(fresh) = incidents.iter().find(|i| i.id == open.id) else {
            return;
        };

        let known: BTreeSet<&str> = fresh.messages.iter().map(|m| m.id.as_str()).collect();
        let pending: Vec<Message> = open
            .messages
            .iter()
            .filter(|m| !known.contains(m.id.as_str()))
            .cloned()
            .collect();

        let mut merged = fresh.clone();
        merged.messages.extend(pending);
        *open = merged;
    }

    /// The open incident's messages, flagged with whether `viewer` wrote
    /// them.
    #[must_use]
    pub fn entries(&self, viewer: Option<&CurrentUser>) -> Vec<ThreadEntry> {
        self.incident()
            .map(|incident| {
                incident
                    .messages
                    .iter()
                    .map(|message| ThreadEntry {
                        is_own: viewer.is_some_and(|v| v.id == message.author_id),
                        message: message.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use safety_map_incident_models::{GeoPoint, IncidentCategory};
    use safety_map_store::memory::MemoryStore;

    use super::*;
    use crate::bus::CommandBus;
    use crate::identity::StaticIdentity;

    fn incident(id: &str) -> Incident {
        Incident {
            id: id.to_string(),
            title: "Broken light".to_string(),
            description: String::new(),
            category: IncidentCategory::Infrastructure,
            location: GeoPoint::new_unchecked(40.71, -74.0),
            reported_at: None,
            reporter_id: "u1".to_string(),
            messages: vec![],
        }
    }

    fn alice() -> CurrentUser {
        CurrentUser {
            id: "alice".to_string(),
            display_name: Some("alice@example.com".to_string()),
        }
    }

    fn setup() -> (Arc<MemoryStore>, CommandBus, IncidentDetailThread) {
        let store = Arc::new(MemoryStore::new());
        store.seed(incident("i1")).unwrap();
        let bus = CommandBus::new();
        let mut thread = IncidentDetailThread::new(bus.sender(), "Anonymous User");
        thread.open(incident("i1"));
        (store, bus, thread)
    }

    #[tokio::test]
    async fn successful_send_appends_exactly_one_message() {
        let (store, mut bus, mut thread) = setup();
        let identity = StaticIdentity::signed_in(alice());

        let message = thread
            .send_message(store.as_ref(), &identity, "Still broken", Utc::now())
            .await
            .unwrap();

        let open = thread.incident().unwrap();
        assert_eq!(open.messages.len(), 1);
        assert_eq!(open.messages[0].text, "Still broken");
        assert_eq!(open.messages[0].author_display_name, "alice@example.com");
        assert_eq!(message.author_id, "alice");
        assert_eq!(bus.drain(), vec![Command::InvalidateIncidents]);
        assert_eq!(store.select_messages("i1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_write_leaves_thread_unchanged() {
        let (store, mut bus, mut thread) = setup();
        store.set_available(false);
        let identity = StaticIdentity::signed_in(alice());

        let result = thread
            .send_message(store.as_ref(), &identity, "hello", Utc::now())
            .await;

        assert!(matches!(result, Err(SyncError::Write(_))));
        assert!(thread.incident().unwrap().messages.is_empty());
        assert!(bus.drain().is_empty());
    }

    #[tokio::test]
    async fn anonymous_send_is_rejected_without_a_write() {
        let (store, _bus, mut thread) = setup();

        let result = thread
            .send_message(
                store.as_ref(),
                &StaticIdentity::anonymous(),
                "hello",
                Utc::now(),
            )
            .await;

        assert!(matches!(
            result,
            Err(SyncError::AuthRequired {
                action: "send messages"
            })
        ));
        assert!(store.select_messages("i1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_text_and_closed_thread_are_invalid() {
        let (store, _bus, mut thread) = setup();
        let identity = StaticIdentity::signed_in(alice());

        assert!(matches!(
            thread
                .send_message(store.as_ref(), &identity, "   ", Utc::now())
                .await,
            Err(SyncError::InvalidInput { .. })
        ));

        thread.close();
        assert!(matches!(
            thread
                .send_message(store.as_ref(), &identity, "hi", Utc::now())
                .await,
            Err(SyncError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn sent_at_never_goes_backwards() {
        let (store, _bus, mut thread) = setup();
        let identity = StaticIdentity::signed_in(alice());
        let now = Utc::now();

        thread
            .send_message(store.as_ref(), &identity, "first", now)
            .await
            .unwrap();
        let second = thread
            .send_message(
                store.as_ref(),
                &identity,
                "second",
                now - Duration::minutes(5),
            )
            .await
            .unwrap();

        assert_eq!(second.sent_at, now);
    }

    #[tokio::test]
    async fn reconcile_keeps_unconfirmed_messages() {
        let (store, _bus, mut thread) = setup();
        let identity = StaticIdentity::signed_in(alice());
        thread
            .send_message(store.as_ref(), &identity, "mine", Utc::now())
            .await
            .unwrap();

        let mut stale = incident("i1");
        stale.title = "Broken light (updated)".to_string();
        thread.reconcile_with(&[stale]);

        let open = thread.incident().unwrap();
        assert_eq!(open.title, "Broken light (updated)");
        assert_eq!(open.messages.len(), 1);
    }

    #[tokio::test]
    async fn entries_flag_own_messages() {
        let (store, _bus, mut thread) = setup();
        thread
            .send_message(
                store.as_ref(),
                &StaticIdentity::signed_in(alice()),
                "from alice",
                Utc::now(),
            )
            .await
            .unwrap();
        let bob = CurrentUser {
            id: "bob".to_string(),
            display_name: None,
        };
        thread
            .send_message(
                store.as_ref(),
                &StaticIdentity::signed_in(bob.clone()),
                "from bob",
                Utc::now(),
            )
            .await
            .unwrap();

        let entries = thread.entries(Some(&bob));
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].is_own);
        assert!(entries[1].is_own);
        assert_eq!(entries[1].message.author_display_name, "Anonymous User");
        assert!(thread.entries(None).iter().all(|e| !e.is_own));
    }
}
