//! Authentication State
//!
//! The session's state machine, layered over the persisted store:
//!
//! ```text
//! Idle ──begin──▶ AuthorizationInProgress ──complete──▶ Authenticated
//!   ▲                    │ cancel/fail                     │ clear
//!   └────────────────────┴─────────────────────────────────┘
//! ```
//!
//! The current state is an owned field. It is recomputed from the store when
//! the state is loaded and moved explicitly by the browser flows.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::AuthResult;
use crate::storage::{
    EncryptionManager, Persistable, PersistedStore, PERSISTED_KEYS,
};
use crate::types::{AuthorizeRequest, OidcConfig, ProviderConfiguration, TokenResponse, WebRequest};

/// Session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No tokens and no pending request.
    Idle,
    /// Authorize request persisted, waiting for the browser callback.
    AuthorizationInProgress,
    /// Token response stored.
    Authenticated,
    /// End-session request persisted, waiting for the browser callback.
    LogoutInProgress,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AuthorizationInProgress => "authorization_in_progress",
            Self::Authenticated => "authenticated",
            Self::LogoutInProgress => "logout_in_progress",
        }
    }
}

/// Owner of the persisted store and the current session state.
pub struct AuthState {
    store: PersistedStore,
    current: SessionState,
}

impl AuthState {
    /// Wrap a store, deriving the current state from what it holds.
    pub fn load(store: PersistedStore) -> Self {
        let current = derive_state(&store);
        info!(state = current.as_str(), "Session state loaded");
        Self { store, current }
    }

    pub fn store(&self) -> &PersistedStore {
        &self.store
    }

    pub fn current_state(&self) -> SessionState {
        self.current
    }

    pub fn set_current_state(&mut self, state: SessionState) {
        if self.current != state {
            info!(from = self.current.as_str(), to = state.as_str(), "Session state changed");
        }
        self.current = state;
    }

    /// Recompute the state from the store.
    pub fn reload_state(&mut self) -> SessionState {
        let state = derive_state(&self.store);
        self.set_current_state(state);
        state
    }

    pub fn provider_configuration(&self) -> AuthResult<Option<ProviderConfiguration>> {
        Ok(self.store.get()?)
    }

    pub fn token_response(&self) -> AuthResult<Option<TokenResponse>> {
        Ok(self.store.get()?)
    }

    pub fn web_request(&self) -> AuthResult<Option<WebRequest>> {
        Ok(self.store.get()?)
    }

    /// The pending authorize request, if the pending web request is one.
    pub fn authorize_request(&self) -> AuthResult<Option<AuthorizeRequest>> {
        Ok(match self.web_request()? {
            Some(WebRequest::Authorize(request)) => Some(request),
            _ => None,
        })
    }

    /// Whether a token response is stored. Never fails; read errors count as absent.
    pub fn has_token_response(&self) -> bool {
        match self.store.contains(TokenResponse::KEY) {
            Ok(present) => present,
            Err(e) => {
                warn!(error = %e, "Could not check for stored tokens");
                false
            }
        }
    }

    pub fn save<T: Persistable>(&self, entity: &T) -> AuthResult<()> {
        Ok(self.store.save(entity)?)
    }

    pub fn delete(&self, key: &str) -> AuthResult<()> {
        Ok(self.store.delete(key)?)
    }

    /// Whether the stored provider configuration must be (re)fetched for `config`.
    pub fn needs_new_configuration(&self, config: &OidcConfig) -> bool {
        match self.provider_configuration() {
            Ok(Some(provider)) => provider.is_stale_for(&config.discovery_uri),
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, "Stored provider configuration unreadable");
                true
            }
        }
    }

    /// Delete configuration, tokens and any pending request, then go idle.
    ///
    /// Best-effort: every key is attempted and failures are only logged.
    pub fn clear(&mut self) {
        for key in PERSISTED_KEYS {
            if let Err(e) = self.store.delete(key) {
                warn!(key, error = %e, "Failed to delete session entity");
            }
        }
        self.set_current_state(SessionState::Idle);
    }

    pub fn encryption_manager(&self) -> Option<&Arc<dyn EncryptionManager>> {
        self.store.encryption_manager()
    }

    pub fn set_encryption_manager(&mut self, manager: Option<Arc<dyn EncryptionManager>>) {
        self.store.set_encryption_manager(manager);
    }

    /// Whether the storage demands a hardware-backed encryption key.
    pub fn requires_hardware_keystore(&self) -> bool {
        self.store.storage().require_hardware_backed_keystore()
    }
}

fn derive_state(store: &PersistedStore) -> SessionState {
    match store.get::<WebRequest>() {
        Ok(Some(WebRequest::Authorize(_))) => return SessionState::AuthorizationInProgress,
        Ok(Some(WebRequest::Logout(_))) => return SessionState::LogoutInProgress,
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Pending web request unreadable"),
    }

    match store.contains(TokenResponse::KEY) {
        Ok(true) => SessionState::Authenticated,
        Ok(false) => SessionState::Idle,
        Err(e) => {
            warn!(error = %e, "Could not check for stored tokens");
            SessionState::Idle
        }
    }
}
