//! Identity provider interface.
//!
//! Authentication itself lives outside this crate. The engine only asks
//! who the current user is, and treats "nobody" as a precondition failure
//! for writes.

use std::sync::Mutex;

use async_trait::async_trait;
use safety_map_incident_models::CurrentUser;

/// Errors from the identity provider.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Signing out failed.
    #[error("Sign out failed: {0}")]
    SignOut(String),
}

/// Source of the authenticated user.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the signed-in user, or `None`.
    async fn current_user(&self) -> Option<CurrentUser>;

    /// Ends the current session.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the provider rejects the sign-out.
    async fn sign_out(&self) -> Result<(), IdentityError>;
}

/// An [`IdentityProvider`] holding a fixed user until signed out.
#[derive(Default)]
pub struct StaticIdentity {
    user: Mutex<Option<CurrentUser>>,
}

impl StaticIdentity {
    /// A session signed in as `user`.
    #[must_use]
    pub const fn signed_in(user: CurrentUser) -> Self {
        Self {
            user: Mutex::new(Some(user)),
        }
    }

    /// A session with nobody signed in.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Option<CurrentUser> {
        self.user.lock().ok().and_then(|user| user.clone())
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.user
            .lock()
            .map_err(|e| IdentityError::SignOut(e.to_string()))?
            .take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_out_clears_the_user() {
        let identity = StaticIdentity::signed_in(CurrentUser {
            id: "u1".to_string(),
            display_name: Some("a@example.com".to_string()),
        });
        assert!(identity.current_user().await.is_some());

        identity.sign_out().await.unwrap();
        assert!(identity.current_user().await.is_none());
    }
}
