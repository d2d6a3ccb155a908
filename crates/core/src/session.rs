//! Shared user and authentication state.
//!
//! [`SessionStore`] is handed by reference to whatever needs the signed-in user. Each field
//! has exactly one writer method and every write is broadcast to subscribers.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::errors::ErrorClass;
use crate::ports::{
    KeyValueStore, ProfileGateway, StorageError, TransportError, TOKEN_KEY, USER_KEY,
};

const EVENT_CAPACITY: usize = 16;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub phone_verified: bool,
    /// Server-side facts the engine does not model, such as completed steps.
    #[serde(flatten, default)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_name: full_name.into(),
            email: None,
            phone_number: None,
            phone_verified: false,
            extra: Map::new(),
        }
    }

    /// Returns a copy with the keys of `patch` written over this profile.
    pub fn merged_with(&self, patch: &Value) -> Result<Self, String> {
        let Value::Object(patch) = patch else {
            return Err("profile update must be a JSON object".to_string());
        };
        let mut current = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err("profile did not serialize to an object".to_string()),
            Err(error) => return Err(error.to_string()),
        };
        for (key, value) in patch {
            current.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(current))
            .map_err(|error| format!("profile update rejected: {error}"))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    TokenChanged { authenticated: bool },
    ProfileChanged(Option<UserProfile>),
    Cleared,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("profile request rejected: {0}")]
    Rejected(String),
}

impl SessionError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Transport
    }
}

pub struct SessionStore {
    token: Option<SecretString>,
    profile: Option<UserProfile>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { token: None, profile: None, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<&SecretString> {
        self.token.as_ref()
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        let token: String = token.into();
        self.token = Some(SecretString::from(token));
        self.notify(SessionEvent::TokenChanged { authenticated: true });
    }

    pub fn set_profile(&mut self, profile: UserProfile) {
        self.profile = Some(profile.clone());
        self.notify(SessionEvent::ProfileChanged(Some(profile)));
    }

    pub fn clear(&mut self) {
        self.token = None;
        self.profile = None;
        self.notify(SessionEvent::Cleared);
    }

    /// Writes the token and cached profile under the fixed storage keys. Absent values
    /// are removed so a later restore does not resurrect them.
    pub async fn persist(&self, store: &dyn KeyValueStore) -> Result<(), SessionError> {
        match &self.token {
            Some(token) => store.set(TOKEN_KEY, token.expose_secret().to_string()).await?,
            None => store.remove(TOKEN_KEY).await?,
        }
        match &self.profile {
            Some(profile) => {
                let encoded = serde_json::to_string(profile).map_err(|error| {
                    StorageError::Decode { key: USER_KEY.to_string(), reason: error.to_string() }
                })?;
                store.set(USER_KEY, encoded).await?;
            }
            None => store.remove(USER_KEY).await?,
        }
        debug!(event_name = "kyc.session.persisted", authenticated = self.is_authenticated());
        Ok(())
    }

    /// Loads token and profile from storage. Nothing is replaced unless both reads and
    /// the profile decode succeed.
    pub async fn restore(&mut self, store: &dyn KeyValueStore) -> Result<(), SessionError> {
        let token = store.get(TOKEN_KEY).await?;
        let profile = match store.get(USER_KEY).await? {
            Some(raw) => Some(serde_json::from_str::<UserProfile>(&raw).map_err(|error| {
                StorageError::Decode { key: USER_KEY.to_string(), reason: error.to_string() }
            })?),
            None => None,
        };

        self.token = token.map(SecretString::from);
        self.notify(SessionEvent::TokenChanged { authenticated: self.token.is_some() });
        self.profile = profile.clone();
        self.notify(SessionEvent::ProfileChanged(profile));
        Ok(())
    }

    pub async fn refresh_profile(
        &mut self,
        gateway: &dyn ProfileGateway,
    ) -> Result<&UserProfile, SessionError> {
        let envelope = gateway.get_current_user().await.map_err(|error| {
            warn!(
                event_name = "kyc.session.refresh_failed",
                error = %error,
                "profile refresh failed"
            );
            SessionError::from(error)
        })?;
        let profile = envelope
            .into_result()
            .map_err(SessionError::Rejected)?
            .ok_or_else(|| SessionError::Rejected("response carried no profile".to_string()))?;

        self.set_profile(profile);
        self.profile.as_ref().ok_or_else(|| SessionError::Rejected("profile missing".to_string()))
    }

    fn notify(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("profile", &self.profile)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;
    use serde_json::json;

    use super::{SessionError, SessionEvent, SessionStore, UserProfile};
    use crate::ports::{
        InMemoryKeyValueStore, InMemoryProfileGateway, KeyValueStore, StorageError,
        TransportError, TOKEN_KEY, USER_KEY,
    };

    fn profile() -> UserProfile {
        UserProfile {
            phone_number: Some("11987654321".to_string()),
            ..UserProfile::new("u-1", "Ana Souza")
        }
    }

    #[tokio::test]
    async fn writes_are_broadcast_to_subscribers() {
        let mut session = SessionStore::new();
        let mut events = session.subscribe();

        session.set_token("tok-123");
        session.set_profile(profile());
        session.clear();

        let expected = SessionEvent::TokenChanged { authenticated: true };
        assert_eq!(events.recv().await.ok(), Some(expected));
        let expected = SessionEvent::ProfileChanged(Some(profile()));
        assert_eq!(events.recv().await.ok(), Some(expected));
        assert_eq!(events.recv().await.ok(), Some(SessionEvent::Cleared));
        assert!(!session.is_authenticated());
    }

    #[test]
    fn debug_output_redacts_token() {
        let mut session = SessionStore::new();
        session.set_token("super-secret-token");

        let rendered = format!("{session:?}");
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("[redacted]"));
    }

    #[tokio::test]
    async fn persisted_session_restores_from_storage() {
        let store = InMemoryKeyValueStore::default();
        let mut session = SessionStore::new();
        session.set_token("tok-123");
        session.set_profile(profile());
        session.persist(&store).await.expect("persist");

        let mut restored = SessionStore::new();
        restored.restore(&store).await.expect("restore");

        let token = restored.token().map(|token| token.expose_secret().to_string());
        assert_eq!(token.as_deref(), Some("tok-123"));
        assert_eq!(restored.profile(), Some(&profile()));
    }

    #[tokio::test]
    async fn persisting_cleared_session_removes_keys() {
        let store = InMemoryKeyValueStore::default();
        store.set(TOKEN_KEY, "stale".to_string()).await.expect("seed token");

        SessionStore::new().persist(&store).await.expect("persist");

        assert_eq!(store.get(TOKEN_KEY).await.expect("get"), None);
        assert_eq!(store.get(USER_KEY).await.expect("get"), None);
    }

    #[tokio::test]
    async fn corrupt_cached_profile_leaves_session_untouched() {
        let store = InMemoryKeyValueStore::default();
        store.set(TOKEN_KEY, "tok-new".to_string()).await.expect("seed token");
        store.set(USER_KEY, "{not json".to_string()).await.expect("seed user");
        let mut session = SessionStore::new();
        session.set_token("tok-old");

        let error = session.restore(&store).await.expect_err("decode fails");

        assert!(matches!(
            error,
            SessionError::Storage(StorageError::Decode { ref key, .. }) if key == USER_KEY
        ));
        let token = session.token().map(|token| token.expose_secret().to_string());
        assert_eq!(token.as_deref(), Some("tok-old"));
    }

    #[tokio::test]
    async fn refresh_failure_keeps_cached_profile() {
        let gateway = InMemoryProfileGateway::with_profile(UserProfile::new("u-1", "Renamed"));
        gateway.fail_next(TransportError::TimedOut).await;
        let mut session = SessionStore::new();
        session.set_profile(profile());

        let error = session.refresh_profile(&gateway).await.expect_err("transport fails");
        assert_eq!(error, SessionError::Transport(TransportError::TimedOut));
        assert!(error.class().is_recoverable());
        assert_eq!(session.profile(), Some(&profile()));

        let refreshed = session.refresh_profile(&gateway).await.expect("second attempt");
        assert_eq!(refreshed.full_name, "Renamed");
    }

    #[test]
    fn merge_keeps_unknown_keys_and_rejects_non_objects() {
        let merged = profile()
            .merged_with(&json!({ "phone_verified": true, "completed_steps": ["personal_data"] }))
            .expect("merge");

        assert!(merged.phone_verified);
        assert_eq!(merged.extra.get("completed_steps"), Some(&json!(["personal_data"])));
        assert!(profile().merged_with(&json!([1, 2])).is_err());
        assert!(profile().merged_with(&json!({ "phone_verified": "yes" })).is_err());
    }
}
