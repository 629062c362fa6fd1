//! Web Authorization Flow
//!
//! Authorization code with PKCE and the end-session round trip, driven
//! through a browser redirect. The pending request is persisted so the flow
//! survives a process restart between `begin_*` and `complete_*`.

use std::sync::Arc;
use tracing::{info, warn};

use crate::client::SessionClient;
use crate::core::{DefaultPkceGenerator, PkceGenerator, SessionState};
use crate::error::{AuthResult, ConfigurationError, FlowError, TokenError};
use crate::request::{token_exchange_request, RequestContext};
use crate::storage::Persistable;
use crate::types::{
    generate_random_state, AuthorizeRequest, CallbackParams, LogoutRequest, ProviderConfiguration,
    TokenResponse, Tokens, WebRequest,
};

/// Browser redirect flows for a [`SessionClient`].
pub struct WebAuthFlow {
    pkce: Arc<dyn PkceGenerator>,
}

impl WebAuthFlow {
    pub fn new(pkce: Arc<dyn PkceGenerator>) -> Self {
        Self { pkce }
    }

    /// Persist a new authorize request. Open [`AuthorizeRequest::to_url`] in the browser.
    pub fn begin_authorization(&self, client: &mut SessionClient) -> AuthResult<AuthorizeRequest> {
        let provider = provider(client)?;
        let pkce = self.pkce.generate();
        let config = client.config();

        let request = AuthorizeRequest {
            authorization_endpoint: provider.authorization_endpoint,
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope(),
            state: generate_random_state(),
            nonce: generate_random_state(),
            code_verifier: pkce.code_verifier,
            code_challenge: pkce.code_challenge,
            code_challenge_method: pkce.code_challenge_method,
        };

        let state = client.auth_state_mut();
        state.save(&WebRequest::Authorize(request.clone()))?;
        state.set_current_state(SessionState::AuthorizationInProgress);
        info!("Authorization started");
        Ok(request)
    }

    /// Finish the authorize round trip with the redirect's callback parameters.
    ///
    /// Any failure abandons the pending request and leaves the session as it
    /// was before [`begin_authorization`](Self::begin_authorization).
    pub async fn complete_authorization(
        &self,
        client: &mut SessionClient,
        callback: CallbackParams,
    ) -> AuthResult<Tokens> {
        let pending = client
            .auth_state()
            .authorize_request()?
            .ok_or(FlowError::NoPendingRequest {
                expected: "authorize",
            })?;

        let result = self.exchange(client, &pending, callback).await;
        let tokens = match result {
            Ok(tokens) => tokens,
            Err(e) => {
                abandon(client);
                return Err(e);
            }
        };

        if let Err(e) = client.auth_state().save(&tokens) {
            abandon(client);
            return Err(e);
        }

        // Tokens are persisted; removing the request is best-effort.
        let state = client.auth_state_mut();
        if let Err(e) = state.delete(WebRequest::KEY) {
            warn!(error = %e, "Failed to delete completed authorize request");
        }
        state.set_current_state(SessionState::Authenticated);
        info!("Authorization completed");
        Ok(Tokens::from(tokens))
    }

    async fn exchange(
        &self,
        client: &SessionClient,
        pending: &AuthorizeRequest,
        callback: CallbackParams,
    ) -> AuthResult<TokenResponse> {
        if let Some(error) = callback.error {
            return Err(FlowError::AccessDenied {
                error,
                error_description: callback.error_description,
            }
            .into());
        }

        let received = callback.state.unwrap_or_default();
        if received != pending.state {
            return Err(FlowError::StateMismatch {
                expected: pending.state.clone(),
                received,
            }
            .into());
        }

        let code = callback.code.ok_or(FlowError::MissingCode)?;
        let provider = provider(client)?;
        let request = {
            let ctx = RequestContext::new(client.config(), &provider);
            token_exchange_request(&ctx, &code, &pending.code_verifier)?
        };
        client.execute(request).await
    }

    /// Drop the pending request, if any.
    pub fn cancel(&self, client: &mut SessionClient) -> AuthResult<()> {
        let state = client.auth_state_mut();
        state.delete(WebRequest::KEY)?;
        state.reload_state();
        info!("Web flow canceled");
        Ok(())
    }

    /// Persist an end-session request. Open [`LogoutRequest::to_url`] in the browser.
    pub fn begin_logout(&self, client: &mut SessionClient) -> AuthResult<LogoutRequest> {
        let tokens = client
            .auth_state()
            .token_response()?
            .ok_or(TokenError::NotAuthenticated)?;
        let id_token = tokens.id_token().ok_or(TokenError::NoIdToken)?;
        let endpoint = provider(client)?.end_session_endpoint.ok_or_else(|| {
            ConfigurationError::MissingEndpoint {
                endpoint: "end session endpoint".to_string(),
            }
        })?;

        let config = client.config();
        let request = LogoutRequest::new(endpoint, config.client_id.as_str(), id_token)
            .with_post_logout_redirect(config.end_session_redirect_uri.clone());

        let state = client.auth_state_mut();
        state.save(&WebRequest::Logout(request.clone()))?;
        state.set_current_state(SessionState::LogoutInProgress);
        info!("Logout started");
        Ok(request)
    }

    /// Finish the end-session round trip. Local tokens stay until [`SessionClient::clear`].
    pub fn complete_logout(
        &self,
        client: &mut SessionClient,
        callback: CallbackParams,
    ) -> AuthResult<()> {
        let pending = match client.auth_state().web_request()? {
            Some(WebRequest::Logout(request)) => request,
            _ => {
                return Err(FlowError::NoPendingRequest { expected: "logout" }.into());
            }
        };
        abandon(client);

        if let Some(error) = callback.error {
            return Err(FlowError::AccessDenied {
                error,
                error_description: callback.error_description,
            }
            .into());
        }
        if let Some(expected) = pending.state {
            let received = callback.state.unwrap_or_default();
            if received != expected {
                return Err(FlowError::StateMismatch { expected, received }.into());
            }
        }
        info!("Logout completed");
        Ok(())
    }
}

impl Default for WebAuthFlow {
    fn default() -> Self {
        Self::new(Arc::new(DefaultPkceGenerator::new()))
    }
}

fn provider(client: &SessionClient) -> AuthResult<ProviderConfiguration> {
    client
        .auth_state()
        .provider_configuration()?
        .ok_or_else(|| ConfigurationError::MissingProviderConfiguration.into())
}

/// Delete the pending request and fall back to whatever the store says.
fn abandon(client: &mut SessionClient) {
    let state = client.auth_state_mut();
    if let Err(e) = state.delete(WebRequest::KEY) {
        warn!(error = %e, "Failed to delete pending web request");
    }
    state.reload_state();
}

/// Create a web flow with the default PKCE generator.
pub fn create_web_auth_flow() -> WebAuthFlow {
    WebAuthFlow::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{oidc_config, session_client};
    use crate::core::{s256_challenge, MockConnector, MockPkceGenerator, RequestType};
    use crate::error::{AuthorizationError, NetworkError};
    use crate::storage::{MockStorage, StorageOp};
    use url::Url;

    const VERIFIER: &str = "test-verifier-0123456789012345678901234567890123";

    struct Fixture {
        client: SessionClient,
        connector: Arc<MockConnector>,
        flow: WebAuthFlow,
    }

    fn fixture() -> Fixture {
        fixture_with_storage(Arc::new(crate::storage::InMemoryStorage::new()))
    }

    fn fixture_with_storage(storage: Arc<dyn crate::storage::KeyValueStorage>) -> Fixture {
        let connector = Arc::new(MockConnector::new());
        let config = oidc_config()
            .client_id("test-client")
            .redirect_uri("com.example.app:/callback")
            .end_session_redirect_uri("com.example.app:/logout")
            .add_scope("openid")
            .add_scope("email")
            .discovery_uri("https://idp.example")
            .build()
            .unwrap();
        let client = session_client()
            .config(config)
            .storage(storage)
            .connector(connector.clone())
            .build()
            .unwrap();
        client
            .auth_state()
            .save(
                &ProviderConfiguration::from_json(
                    r#"{
                        "issuer": "https://idp.example",
                        "authorization_endpoint": "https://idp.example/authorize",
                        "token_endpoint": "https://idp.example/token",
                        "end_session_endpoint": "https://idp.example/logout"
                    }"#,
                )
                .unwrap(),
            )
            .unwrap();

        let pkce = MockPkceGenerator::new();
        pkce.set_next_verifier(VERIFIER);
        Fixture {
            client,
            connector,
            flow: WebAuthFlow::new(Arc::new(pkce)),
        }
    }

    fn callback(query: &str) -> CallbackParams {
        CallbackParams::from_url_str(&format!("com.example.app:/callback?{}", query)).unwrap()
    }

    #[test]
    fn test_begin_authorization_persists_request() {
        let mut f = fixture();
        let request = f.flow.begin_authorization(&mut f.client).unwrap();

        assert_eq!(request.code_verifier, VERIFIER);
        assert_eq!(request.code_challenge, s256_challenge(VERIFIER));
        assert_eq!(request.scope, "openid email");
        assert_eq!(
            f.client.current_state(),
            SessionState::AuthorizationInProgress
        );
        assert_eq!(
            f.client.auth_state().authorize_request().unwrap(),
            Some(request.clone())
        );

        let url = request.to_url();
        assert!(url.as_str().starts_with("https://idp.example/authorize?"));
        assert!(url
            .query_pairs()
            .any(|(k, v)| k == "code_challenge_method" && v == "S256"));
    }

    #[tokio::test]
    async fn test_complete_authorization_exchanges_code() {
        let mut f = fixture();
        let request = f.flow.begin_authorization(&mut f.client).unwrap();
        f.connector.queue_json_reply(
            200,
            &serde_json::json!({"access_token": "at-1", "refresh_token": "rt-1", "id_token": "id-1"}),
        );

        let tokens = f
            .flow
            .complete_authorization(
                &mut f.client,
                callback(&format!("code=auth-code&state={}", request.state)),
            )
            .await
            .unwrap();

        assert_eq!(tokens.access_token(), "at-1");
        assert_eq!(f.client.current_state(), SessionState::Authenticated);
        assert!(f.client.auth_state().web_request().unwrap().is_none());
        assert!(f.client.is_authenticated());

        let sent = f.connector.get_last_request().unwrap();
        assert_eq!(sent.params.request_type, RequestType::TokenExchange);
        let form = sent.params.post_parameters;
        assert_eq!(form.get("code").map(String::as_str), Some("auth-code"));
        assert_eq!(form.get("code_verifier").map(String::as_str), Some(VERIFIER));
        assert_eq!(
            form.get("grant_type").map(String::as_str),
            Some("authorization_code")
        );
    }

    #[tokio::test]
    async fn test_leftover_request_does_not_fail_login() {
        let storage = Arc::new(MockStorage::new());
        let mut f = fixture_with_storage(storage.clone());
        let request = f.flow.begin_authorization(&mut f.client).unwrap();
        f.connector
            .queue_json_reply(200, &serde_json::json!({"access_token": "at-1"}));
        storage.fail_on(StorageOp::Delete, WebRequest::KEY);

        let tokens = f
            .flow
            .complete_authorization(
                &mut f.client,
                callback(&format!("code=auth-code&state={}", request.state)),
            )
            .await
            .unwrap();

        assert_eq!(tokens.access_token(), "at-1");
        assert_eq!(f.client.current_state(), SessionState::Authenticated);
        assert!(f.client.is_authenticated());
    }

    #[tokio::test]
    async fn test_token_write_failure_abandons_request() {
        let storage = Arc::new(MockStorage::new());
        let mut f = fixture_with_storage(storage.clone());
        let request = f.flow.begin_authorization(&mut f.client).unwrap();
        f.connector
            .queue_json_reply(200, &serde_json::json!({"access_token": "at-1"}));
        storage.fail_on(StorageOp::Set, TokenResponse::KEY);

        let result = f
            .flow
            .complete_authorization(
                &mut f.client,
                callback(&format!("code=auth-code&state={}", request.state)),
            )
            .await;

        assert!(matches!(result, Err(AuthorizationError::Persistence(_))));
        assert_eq!(f.client.current_state(), SessionState::Idle);
        assert!(f.client.auth_state().web_request().unwrap().is_none());
        assert!(!f.client.is_authenticated());
    }

    #[tokio::test]
    async fn test_state_mismatch_abandons_request() {
        let mut f = fixture();
        f.flow.begin_authorization(&mut f.client).unwrap();

        let result = f
            .flow
            .complete_authorization(&mut f.client, callback("code=auth-code&state=forged"))
            .await;

        assert!(matches!(
            result,
            Err(AuthorizationError::Flow(FlowError::StateMismatch { .. }))
        ));
        assert_eq!(f.client.current_state(), SessionState::Idle);
        assert!(f.client.auth_state().web_request().unwrap().is_none());
        assert!(f.connector.get_requests().is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_callback() {
        let mut f = fixture();
        f.flow.begin_authorization(&mut f.client).unwrap();

        let result = f
            .flow
            .complete_authorization(
                &mut f.client,
                callback("error=access_denied&error_description=user+declined"),
            )
            .await;

        match result {
            Err(AuthorizationError::Flow(FlowError::AccessDenied {
                error,
                error_description,
            })) => {
                assert_eq!(error, "access_denied");
                assert_eq!(error_description.as_deref(), Some("user declined"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(f.client.current_state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_failed_exchange_returns_to_idle() {
        let mut f = fixture();
        let request = f.flow.begin_authorization(&mut f.client).unwrap();
        f.connector.set_next_error(NetworkError::ConnectionFailed {
            message: "offline".to_string(),
        });

        let result = f
            .flow
            .complete_authorization(
                &mut f.client,
                callback(&format!("code=auth-code&state={}", request.state)),
            )
            .await;

        assert!(matches!(result, Err(AuthorizationError::Network(_))));
        assert_eq!(f.client.current_state(), SessionState::Idle);
        assert!(!f.client.is_authenticated());
    }

    #[tokio::test]
    async fn test_complete_without_pending_request() {
        let mut f = fixture();
        let result = f
            .flow
            .complete_authorization(&mut f.client, callback("code=x&state=y"))
            .await;
        assert!(matches!(
            result,
            Err(AuthorizationError::Flow(FlowError::NoPendingRequest { .. }))
        ));
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let mut f = fixture();
        f.flow.begin_authorization(&mut f.client).unwrap();

        f.flow.cancel(&mut f.client).unwrap();
        assert_eq!(f.client.current_state(), SessionState::Idle);
        assert!(f.client.auth_state().web_request().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout_round_trip() {
        let mut f = fixture();
        let request = f.flow.begin_authorization(&mut f.client).unwrap();
        f.connector.queue_json_reply(
            200,
            &serde_json::json!({"access_token": "at-1", "id_token": "id-1"}),
        );
        f.flow
            .complete_authorization(
                &mut f.client,
                callback(&format!("code=auth-code&state={}", request.state)),
            )
            .await
            .unwrap();

        let logout = f.flow.begin_logout(&mut f.client).unwrap();
        assert_eq!(f.client.current_state(), SessionState::LogoutInProgress);
        let url = logout.to_url();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("id_token_hint".to_string(), "id-1".to_string())));
        assert!(pairs.contains(&(
            "post_logout_redirect_uri".to_string(),
            "com.example.app:/logout".to_string()
        )));

        let state = logout.state.clone().unwrap();
        let redirect = Url::parse(&format!("com.example.app:/logout?state={}", state)).unwrap();
        f.flow
            .complete_logout(&mut f.client, CallbackParams::from_url(&redirect))
            .unwrap();

        // Tokens stay until the session is cleared.
        assert_eq!(f.client.current_state(), SessionState::Authenticated);
        f.client.clear();
        assert!(!f.client.is_authenticated());
    }

    #[test]
    fn test_begin_logout_requires_id_token() {
        let mut f = fixture();
        f.client
            .auth_state()
            .save(&TokenResponse::from_json(r#"{"access_token": "at-1"}"#).unwrap())
            .unwrap();

        assert!(matches!(
            f.flow.begin_logout(&mut f.client),
            Err(AuthorizationError::Token(TokenError::NoIdToken))
        ));
    }
}
