//! Authentication state: one cloneable reader (`AuthStore`) and exactly one
//! writer (`AuthController`), connected by a `tokio::sync::watch` channel.
//!
//! Crossing the authenticated/unauthenticated boundary, in either direction,
//! or replacing one signed-in user with another, runs every registered
//! `AuthTransitionObserver` in registration order before the settled state is
//! published, so subscribers never see the new state alongside stale drafts or
//! cache entries. The last settled identity can be kept in a `KeyValueStore`
//! so a restart with the same user is not a transition.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::ClientError;
use crate::storage::{read_json, write_json, KeyValueStore};

pub const SETTLED_AUTH_KEY: &str = "auth_settled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Unauthenticated,
    /// Identity known, token fetch in flight. Counts as not authenticated.
    Resolving,
    Authenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl UserInfo {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            display_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub status: AuthStatus,
    pub token: Option<String>,
    pub user_info: Option<UserInfo>,
}

impl AuthState {
    pub fn unauthenticated() -> Self {
        Self {
            status: AuthStatus::Unauthenticated,
            token: None,
            user_info: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == AuthStatus::Authenticated
    }

    /// Token to attach to remote calls; only present once authenticated.
    pub fn bearer_token(&self) -> Option<&str> {
        if self.is_authenticated() {
            self.token.as_deref()
        } else {
            None
        }
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::unauthenticated()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthTransition {
    pub was_authenticated: bool,
    pub is_authenticated: bool,
    /// Signed in before and after, as different users.
    pub identity_changed: bool,
}

impl AuthTransition {
    pub fn crosses_boundary(&self) -> bool {
        self.was_authenticated != self.is_authenticated
    }

    pub fn requires_reset(&self) -> bool {
        self.crosses_boundary() || self.identity_changed
    }
}

/// Who was signed in at the last settle. `user_id` is only set when authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledAuth {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SettledAuth {
    fn of(state: &AuthState) -> Self {
        let authenticated = state.is_authenticated();
        Self {
            authenticated,
            user_id: state
                .user_info
                .as_ref()
                .filter(|_| authenticated)
                .map(|user| user.user_id.clone()),
        }
    }
}

/// Component reset hook, run once per boundary crossing or user switch.
#[async_trait]
pub trait AuthTransitionObserver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn on_auth_transition(&self, transition: AuthTransition);
}

/// External identity provider. `Ok(None)` means the user has no usable token.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn fetch_token(&self, user: &UserInfo) -> Result<Option<String>, ClientError>;
}

/// Hands out a fixed, pre-issued token (e.g. `GTM_API_TOKEN`).
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn fetch_token(&self, _user: &UserInfo) -> Result<Option<String>, ClientError> {
        Ok(self.token.clone())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reader
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AuthStore {
    rx: watch::Receiver<AuthState>,
}

impl AuthStore {
    pub fn snapshot(&self) -> AuthState {
        self.rx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.rx.borrow().is_authenticated()
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.rx.borrow().bearer_token().map(String::from)
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.rx.clone()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Writer
// ────────────────────────────────────────────────────────────────────────────

pub struct AuthController {
    tx: watch::Sender<AuthState>,
    store: AuthStore,
    provider: Arc<dyn IdentityProvider>,
    observers: Vec<Arc<dyn AuthTransitionObserver>>,
    settled: SettledAuth,
    persistence: Option<Arc<dyn KeyValueStore>>,
}

/// Creates the store/controller pair, starting unauthenticated.
pub fn auth_channel(provider: Arc<dyn IdentityProvider>) -> (AuthStore, AuthController) {
    let (tx, rx) = watch::channel(AuthState::unauthenticated());
    let store = AuthStore { rx };
    let controller = AuthController {
        tx,
        store: store.clone(),
        provider,
        observers: Vec::new(),
        settled: SettledAuth::default(),
        persistence: None,
    };
    (store, controller)
}

impl AuthController {
    pub fn register(&mut self, observer: Arc<dyn AuthTransitionObserver>) {
        debug!("Registered auth observer '{}'", observer.name());
        self.observers.push(observer);
    }

    pub fn store(&self) -> AuthStore {
        self.store.clone()
    }

    /// Seeds the settled identity from `store` and writes it back on every
    /// reset. An unreadable record counts as signed out.
    pub fn with_persistence(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        match read_json::<SettledAuth>(store.as_ref(), SETTLED_AUTH_KEY) {
            Ok(Some(settled)) => {
                debug!("Restored settled auth: authenticated={}", settled.authenticated);
                self.settled = settled;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read settled auth state: {e}"),
        }
        self.persistence = Some(store);
        self
    }

    pub fn settled(&self) -> &SettledAuth {
        &self.settled
    }

    /// Re-resolves the auth state for `user` (or its absence).
    pub async fn refresh(&mut self, user: Option<UserInfo>) -> AuthState {
        self.tx.send_modify(|state| state.status = AuthStatus::Resolving);

        let next = match user {
            None => AuthState::unauthenticated(),
            Some(user) => match self.provider.fetch_token(&user).await {
                Ok(Some(token)) if !token.trim().is_empty() => AuthState {
                    status: AuthStatus::Authenticated,
                    token: Some(token),
                    user_info: Some(user),
                },
                Ok(_) => {
                    warn!("No token issued for user {}", user.user_id);
                    AuthState {
                        user_info: Some(user),
                        ..AuthState::unauthenticated()
                    }
                }
                Err(e) => {
                    warn!("Token fetch failed for user {}: {e}", user.user_id);
                    AuthState {
                        user_info: Some(user),
                        ..AuthState::unauthenticated()
                    }
                }
            },
        };

        let settled = SettledAuth::of(&next);
        let transition = AuthTransition {
            was_authenticated: self.settled.authenticated,
            is_authenticated: settled.authenticated,
            identity_changed: self.settled.authenticated
                && settled.authenticated
                && self.settled.user_id != settled.user_id,
        };

        if transition.requires_reset() {
            info!(
                "Auth transition: authenticated {} -> {} (user changed: {})",
                transition.was_authenticated,
                transition.is_authenticated,
                transition.identity_changed
            );
            for observer in &self.observers {
                debug!("Running auth observer '{}'", observer.name());
                observer.on_auth_transition(transition).await;
            }
            if let Some(store) = &self.persistence {
                if let Err(e) = write_json(store.as_ref(), SETTLED_AUTH_KEY, &settled) {
                    warn!("Could not persist settled auth state: {e}");
                }
            }
            self.settled = settled;
        }

        self.tx.send_replace(next.clone());
        next
    }

    pub async fn sign_out(&mut self) -> AuthState {
        self.refresh(None).await
    }
}
