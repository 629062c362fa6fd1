//! Session Client
//!
//! Public operation surface over the authentication state: authorized
//! requests, user profile, introspection, revocation, refresh, token access,
//! clear and encryption migration.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, instrument, warn};

use crate::core::{AuthState, HttpConnector, RequestExecution, SessionState};
use crate::error::{AuthResult, ConfigurationError, TokenError};
use crate::request::{
    authorized_request, introspect_request, refresh_request, revoke_request, user_profile_request,
    AuthorizedRequestParams, PreparedRequest, RequestContext, ResponseDecoder,
};
use crate::storage::EncryptionManager;
use crate::types::{
    IntrospectInfo, OidcConfig, ProviderConfiguration, TokenResponse, TokenTypeHint, Tokens,
    UserInfo, WebRequest,
};

type ActiveRequest = Arc<Mutex<Option<Arc<RequestExecution>>>>;

/// Cancels whichever request the session has in flight. Usable from any thread.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    active: ActiveRequest,
}

impl CancelHandle {
    /// Cancel the in-flight request. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(execution) => {
                execution.cancel();
                true
            }
            None => false,
        }
    }
}

/// Session client for one account.
///
/// Mutating operations take `&mut self`; callers serialize access per session.
pub struct SessionClient {
    config: OidcConfig,
    state: AuthState,
    connector: Arc<dyn HttpConnector>,
    active: ActiveRequest,
}

impl SessionClient {
    pub fn new(config: OidcConfig, state: AuthState, connector: Arc<dyn HttpConnector>) -> Self {
        Self {
            config,
            state,
            connector,
            active: ActiveRequest::default(),
        }
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    pub fn auth_state(&self) -> &AuthState {
        &self.state
    }

    pub fn auth_state_mut(&mut self) -> &mut AuthState {
        &mut self.state
    }

    pub fn connector(&self) -> &Arc<dyn HttpConnector> {
        &self.connector
    }

    pub fn current_state(&self) -> SessionState {
        self.state.current_state()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            active: Arc::clone(&self.active),
        }
    }

    // ========== Network Operations ==========

    /// Call a protected resource with the current access token.
    #[instrument(level = "debug", skip(self, params), fields(uri = %params.uri))]
    pub async fn authorized_request(
        &self,
        params: AuthorizedRequestParams,
    ) -> AuthResult<serde_json::Value> {
        let provider = self.provider()?;
        let tokens = self.stored_tokens()?;
        let ctx = RequestContext::new(&self.config, &provider).with_tokens(&tokens);
        let request = authorized_request(&ctx, params)?;
        self.execute(request).await
    }

    /// Fetch the userinfo claims. Fails without a network call on OAuth2-only providers.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_user_profile(&self) -> AuthResult<UserInfo> {
        if self.config.is_oauth2_configuration() {
            return Err(ConfigurationError::UnsupportedOperation {
                message: "OAuth2 authorization servers do not support the /userinfo endpoint"
                    .to_string(),
            }
            .into());
        }
        let provider = self.provider()?;
        let tokens = self.stored_tokens()?;
        let ctx = RequestContext::new(&self.config, &provider).with_tokens(&tokens);
        let request = user_profile_request(&ctx)?;
        self.execute(request).await
    }

    #[instrument(level = "debug", skip(self, token))]
    pub async fn introspect_token(
        &self,
        token: &str,
        hint: TokenTypeHint,
    ) -> AuthResult<IntrospectInfo> {
        let provider = self.provider()?;
        let ctx = RequestContext::new(&self.config, &provider);
        let request = introspect_request(&ctx, token, hint)?;
        self.execute(request).await
    }

    /// Revoke a token. `true` when the provider answered 200.
    #[instrument(level = "debug", skip(self, token))]
    pub async fn revoke_token(&self, token: &str) -> AuthResult<bool> {
        let provider = self.provider()?;
        let ctx = RequestContext::new(&self.config, &provider);
        let request = revoke_request(&ctx, token)?;
        self.execute(request).await
    }

    /// Exchange the refresh token and replace the stored token response.
    ///
    /// The stored token is only written after a successful response.
    #[instrument(level = "debug", skip(self))]
    pub async fn refresh_token(&mut self) -> AuthResult<Tokens> {
        let provider = self.provider()?;
        let tokens = self.stored_tokens()?;
        let request = {
            let ctx = RequestContext::new(&self.config, &provider).with_tokens(&tokens);
            refresh_request(&ctx)?
        };

        let refreshed: TokenResponse = self.execute(request).await?;
        self.state.save(&refreshed)?;
        self.state.set_current_state(SessionState::Authenticated);
        info!("Tokens refreshed");
        Ok(Tokens::from(refreshed))
    }

    // ========== Local Operations ==========

    /// Current tokens, `None` when not signed in.
    pub fn get_tokens(&self) -> AuthResult<Option<Tokens>> {
        Ok(self.state.token_response()?.map(Tokens::from))
    }

    /// Whether a token response is stored.
    pub fn is_authenticated(&self) -> bool {
        self.state.has_token_response()
    }

    /// Forget the session locally. Always ends idle.
    pub fn clear(&mut self) {
        self.state.clear();
        info!("Session cleared");
    }

    /// Re-encrypt everything stored under `manager`.
    ///
    /// All entities are read before anything is modified. If rewriting under
    /// the new manager fails, the previous manager and values are restored.
    pub fn migrate_to(&mut self, manager: Arc<dyn EncryptionManager>) -> AuthResult<()> {
        if self.state.requires_hardware_keystore() && !manager.is_hardware_backed() {
            return Err(ConfigurationError::HardwareKeystoreRequired.into());
        }

        let snapshot = Snapshot {
            provider: self.state.provider_configuration()?,
            tokens: self.state.token_response()?,
            web_request: self.state.web_request()?,
        };
        let previous = self.state.encryption_manager().cloned();

        self.state.clear();
        self.state.set_encryption_manager(Some(manager));

        if let Err(e) = snapshot.write(&self.state) {
            warn!(error = %e, "Migration failed, restoring previous encryption manager");
            self.state.clear();
            self.state.set_encryption_manager(previous);
            if let Err(restore) = snapshot.write(&self.state) {
                warn!(error = %restore, "Could not restore session after failed migration");
            }
            self.state.reload_state();
            return Err(e);
        }

        self.state.reload_state();
        info!("Session migrated to new encryption manager");
        Ok(())
    }

    // ========== Internals ==========

    fn provider(&self) -> AuthResult<ProviderConfiguration> {
        self.state
            .provider_configuration()?
            .ok_or_else(|| ConfigurationError::MissingProviderConfiguration.into())
    }

    fn stored_tokens(&self) -> AuthResult<TokenResponse> {
        self.state
            .token_response()?
            .ok_or_else(|| TokenError::NotAuthenticated.into())
    }

    /// Run a request, exposing it to [`CancelHandle`] while in flight.
    pub(crate) async fn execute<T: ResponseDecoder>(
        &self,
        request: PreparedRequest<T>,
    ) -> AuthResult<T> {
        *lock(&self.active) = Some(Arc::clone(request.execution()));
        let _guard = ActiveGuard(&self.active);
        request.execute(self.connector.as_ref()).await
    }
}

/// Empties the in-flight slot on completion or when the future is dropped.
struct ActiveGuard<'a>(&'a ActiveRequest);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        lock(self.0).take();
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("client_id", &self.config.client_id)
            .field("state", &self.state.current_state())
            .finish()
    }
}

/// Decrypted copy of every persisted entity.
struct Snapshot {
    provider: Option<ProviderConfiguration>,
    tokens: Option<TokenResponse>,
    web_request: Option<WebRequest>,
}

impl Snapshot {
    fn write(&self, state: &AuthState) -> AuthResult<()> {
        if let Some(provider) = &self.provider {
            state.save(provider)?;
        }
        if let Some(tokens) = &self.tokens {
            state.save(tokens)?;
        }
        if let Some(web_request) = &self.web_request {
            state.save(web_request)?;
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
