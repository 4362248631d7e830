use crate::api::{ApiError, DashboardApi};
use crate::models::{LoginResponse, UserProfile};
use crate::store::{KeyValueStore, StorageError};
use crate::topic::Topic;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

pub const DEFAULT_TOKEN_KEY: &str = "auth_token";

/// In-memory mirror of the current credential, shared with the REST client and
/// the realtime connection so both always see the session's token.
#[derive(Clone, Default)]
pub struct CredentialCell {
    inner: Arc<RwLock<Option<String>>>,
}

impl CredentialCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        self.inner.read().clone()
    }

    pub fn set(&self, token: Option<String>) {
        *self.inner.write() = token;
    }

    pub fn clear(&self) {
        self.set(None);
    }
}

/// Durable copy of the credential. Storage failures never escape this type:
/// they are logged and read as "no token".
#[derive(Clone)]
pub struct TokenStore {
    backend: Option<Arc<dyn KeyValueStore>>,
    key: String,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend: Some(backend),
            key: DEFAULT_TOKEN_KEY.to_string(),
        }
    }

    /// A token store with nowhere to persist; tokens live only in memory.
    pub fn detached() -> Self {
        Self {
            backend: None,
            key: DEFAULT_TOKEN_KEY.to_string(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn read(&self) -> Option<String> {
        match self.try_read() {
            Ok(token) => token.filter(|token| !token.trim().is_empty()),
            Err(err) => {
                warn!(error = %err, key = %self.key, "token storage unreadable, treating as signed out");
                None
            }
        }
    }

    /// Persist `token`, or remove the stored value when `None`.
    pub fn write(&self, token: Option<&str>) {
        if let Err(err) = self.try_write(token) {
            warn!(error = %err, key = %self.key, "token storage write skipped");
        }
    }

    pub fn clear(&self) {
        self.write(None);
    }

    fn try_read(&self) -> Result<Option<String>, StorageError> {
        match &self.backend {
            Some(backend) => backend.get(&self.key),
            None => Ok(None),
        }
    }

    fn try_write(&self, token: Option<&str>) -> Result<(), StorageError> {
        let Some(backend) = &self.backend else {
            debug!("no token storage configured");
            return Ok(());
        };
        match token {
            Some(token) => backend.set(&self.key, token),
            None => backend.remove(&self.key),
        }
    }
}

/// Immutable authentication snapshot. `is_authenticated` always mirrors the
/// presence of a token because the only constructors keep them in step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    is_authenticated: bool,
    #[serde(skip_serializing)]
    token: Option<String>,
    user: Option<UserProfile>,
}

impl AuthState {
    pub fn signed_out() -> Self {
        Self {
            is_authenticated: false,
            token: None,
            user: None,
        }
    }

    pub fn signed_in(token: impl Into<String>, user: Option<UserProfile>) -> Self {
        Self {
            is_authenticated: true,
            token: Some(token.into()),
            user,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    /// Same authentication, different profile.
    pub fn with_user(&self, user: Option<UserProfile>) -> Self {
        Self {
            is_authenticated: self.is_authenticated,
            token: self.token.clone(),
            user,
        }
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::signed_out()
    }
}

/// Owns the authentication state of one client session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<RwLock<SessionInner>>,
    api: Arc<dyn DashboardApi>,
    tokens: TokenStore,
    credentials: CredentialCell,
    states: Topic<AuthState>,
}

struct SessionInner {
    state: AuthState,
    // Bumped on every login/logout so late profile fetches can tell they are stale.
    epoch: u64,
}

impl SessionManager {
    pub fn new(api: Arc<dyn DashboardApi>, tokens: TokenStore) -> Self {
        Self::with_credentials(api, tokens, CredentialCell::new())
    }

    /// Build the session synchronously from whatever token is persisted.
    pub fn with_credentials(
        api: Arc<dyn DashboardApi>,
        tokens: TokenStore,
        credentials: CredentialCell,
    ) -> Self {
        let token = tokens.read();
        credentials.set(token.clone());
        let state = match token {
            Some(token) => AuthState::signed_in(token, None),
            None => AuthState::signed_out(),
        };
        Self {
            inner: Arc::new(RwLock::new(SessionInner {
                state: state.clone(),
                epoch: 0,
            })),
            api,
            tokens,
            credentials,
            states: Topic::replaying(state),
        }
    }

    /// Build the session and, when a token was persisted, load the profile.
    pub async fn open(
        api: Arc<dyn DashboardApi>,
        tokens: TokenStore,
        credentials: CredentialCell,
    ) -> Self {
        let session = Self::with_credentials(api, tokens, credentials);
        if session.is_authenticated() {
            session.refresh_profile().await;
        }
        session
    }

    pub fn snapshot(&self) -> AuthState {
        self.inner.read().state.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read().state.is_authenticated()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.read().state.token.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.read().state.user.clone()
    }

    /// Live snapshot stream; the current state is delivered first.
    pub fn subscribe(&self) -> UnboundedReceiver<AuthState> {
        self.states.subscribe()
    }

    pub fn credentials(&self) -> CredentialCell {
        self.credentials.clone()
    }

    pub fn api(&self) -> Arc<dyn DashboardApi> {
        self.api.clone()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let response = match self.api.login(username, password).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, username, "login rejected");
                return Err(err);
            }
        };
        let token = response
            .token
            .clone()
            .filter(|token| !token.trim().is_empty());

        let mut inner = self.inner.write();
        inner.epoch += 1;
        self.tokens.write(token.as_deref());
        self.credentials.set(token.clone());
        let next = match token {
            Some(token) => {
                info!(username, "signed in");
                AuthState::signed_in(token, response.user.clone())
            }
            None => {
                warn!(username, "login succeeded without a token");
                AuthState::signed_out()
            }
        };
        self.transition(&mut inner, next);
        Ok(response)
    }

    pub fn logout(&self) {
        self.api.logout();
        let mut inner = self.inner.write();
        inner.epoch += 1;
        self.tokens.clear();
        self.credentials.clear();
        self.transition(&mut inner, AuthState::signed_out());
        info!("signed out");
    }

    /// Reload the profile of the signed-in user. Failures only drop the
    /// profile; the session stays authenticated.
    pub async fn refresh_profile(&self) -> Option<UserProfile> {
        let epoch = {
            let inner = self.inner.read();
            if inner.state.token.is_none() {
                return None;
            }
            inner.epoch
        };

        let result = self.api.me().await;

        let mut inner = self.inner.write();
        if inner.epoch != epoch {
            debug!("discarding profile fetched for a previous session");
            return None;
        }
        match result {
            Ok(profile) => {
                let next = inner.state.with_user(Some(profile.clone()));
                self.transition(&mut inner, next);
                Some(profile)
            }
            Err(err) => {
                warn!(error = %err, "profile fetch failed, keeping token-only session");
                let next = inner.state.with_user(None);
                self.transition(&mut inner, next);
                None
            }
        }
    }

    fn transition(&self, inner: &mut SessionInner, next: AuthState) {
        inner.state = next.clone();
        self.states.publish(next);
    }
}
