use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use crate::error::AppResult;

/// Source of the signed-in user and their bearer token.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Id of the signed-in user, if any.
    fn current_user_id(&self) -> Option<String>;

    /// Bearer token for the signed-in user. `force_refresh` asks the provider to mint a
    /// new token even if the cached one is still valid.
    async fn current_token(&self, force_refresh: bool) -> AppResult<Option<String>>;

    /// Signed-in user id, updated whenever it changes.
    fn auth_state(&self) -> watch::Receiver<Option<String>>;
}

#[derive(Debug, Clone)]
struct Session {
    user_id: String,
    token: String,
}

/// In-memory identity fed explicitly by whoever owns the credentials (a login flow,
/// the CLI environment, tests).
#[derive(Clone)]
pub struct SessionIdentity {
    session: Arc<RwLock<Option<Session>>>,
    state: Arc<watch::Sender<Option<String>>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            session: Arc::new(RwLock::new(None)),
            state: Arc::new(state),
        }
    }

    pub fn signed_in(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        let identity = Self::new();
        identity.sign_in(user_id, token);
        identity
    }

    pub fn sign_in(&self, user_id: impl Into<String>, token: impl Into<String>) {
        let session = Session {
            user_id: user_id.into(),
            token: token.into(),
        };
        let user_id = session.user_id.clone();
        *self.write() = Some(session);
        self.publish(Some(user_id));
    }

    pub fn sign_out(&self) {
        *self.write() = None;
        self.publish(None);
    }

    /// Replaces the token of the current session without touching the user id.
    pub fn set_token(&self, token: impl Into<String>) {
        if let Some(session) = self.write().as_mut() {
            session.token = token.into();
        }
    }

    // Every write is a single assignment, so a poisoned lock still holds a whole session.
    fn read(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, user_id: Option<String>) {
        self.state.send_if_modified(|current| {
            if *current == user_id {
                false
            } else {
                tracing::info!("Auth state changed: {:?} -> {:?}", current, user_id);
                *current = user_id;
                true
            }
        });
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for SessionIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.read().as_ref().map(|s| s.user_id.clone())
    }

    async fn current_token(&self, _force_refresh: bool) -> AppResult<Option<String>> {
        Ok(self
            .read()
            .as_ref()
            .map(|s| s.token.clone())
            .filter(|t| !t.is_empty()))
    }

    fn auth_state(&self) -> watch::Receiver<Option<String>> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let identity = SessionIdentity::new();
        assert_eq!(identity.current_user_id(), None);
        assert_eq!(identity.current_token(false).await.unwrap(), None);

        identity.sign_in("u1", "tok-1");
        assert_eq!(identity.current_user_id().as_deref(), Some("u1"));
        assert_eq!(identity.current_token(false).await.unwrap().as_deref(), Some("tok-1"));

        identity.sign_out();
        assert_eq!(identity.current_user_id(), None);
    }

    #[tokio::test]
    async fn test_auth_state_ticks_only_on_user_change() {
        let identity = SessionIdentity::new();
        let mut state = identity.auth_state();
        assert_eq!(*state.borrow_and_update(), None);

        identity.sign_in("u1", "tok-1");
        assert!(state.has_changed().unwrap());
        assert_eq!(state.borrow_and_update().as_deref(), Some("u1"));

        identity.sign_in("u1", "tok-2");
        identity.set_token("tok-3");
        assert!(!state.has_changed().unwrap());
        assert_eq!(identity.current_token(true).await.unwrap().as_deref(), Some("tok-3"));

        identity.sign_in("u2", "tok-4");
        assert_eq!(state.borrow_and_update().as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn test_poisoned_session_still_accepts_sign_in() {
        let identity = SessionIdentity::signed_in("u1", "tok-1");
        let session = identity.session.clone();
        let _ = std::thread::spawn(move || {
            let _guard = session.write().unwrap();
            panic!("poison the session lock");
        })
        .join();
        assert!(identity.session.is_poisoned());

        identity.sign_in("u2", "tok-2");
        assert_eq!(identity.current_user_id().as_deref(), Some("u2"));
        assert_eq!(identity.current_token(false).await.unwrap().as_deref(), Some("tok-2"));

        identity.sign_out();
        assert_eq!(identity.current_user_id(), None);
    }
}
