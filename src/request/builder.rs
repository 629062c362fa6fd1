//! Authorized Request Builder
//!
//! One constructor per request kind. Each takes the provider configuration,
//! the current token response where it needs one, and the caller's
//! parameters, validates them, and returns a one-shot [`PreparedRequest`].

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use url::Url;

use crate::core::{
    ConnectionParameters, HttpConnector, RequestExecution, RequestMethod, RequestType,
};
use crate::error::{AuthResult, ConfigurationError, TokenError};
use crate::request::ResponseDecoder;
use crate::types::{
    IntrospectInfo, OidcConfig, ProviderConfiguration, TokenResponse, TokenTypeHint, UserInfo,
};

const ACCEPT: &str = "accept";
const AUTHORIZATION: &str = "authorization";
const JSON: &str = "application/json";

/// Inputs shared by every request kind.
#[derive(Clone, Copy, Debug)]
pub struct RequestContext<'a> {
    pub config: &'a OidcConfig,
    pub provider: &'a ProviderConfiguration,
    pub tokens: Option<&'a TokenResponse>,
}

impl<'a> RequestContext<'a> {
    pub fn new(config: &'a OidcConfig, provider: &'a ProviderConfiguration) -> Self {
        Self {
            config,
            provider,
            tokens: None,
        }
    }

    pub fn with_tokens(mut self, tokens: &'a TokenResponse) -> Self {
        self.tokens = Some(tokens);
        self
    }

    fn require_tokens(&self) -> Result<&'a TokenResponse, TokenError> {
        self.tokens.ok_or(TokenError::NotAuthenticated)
    }
}

/// Caller parameters for a request to a protected resource.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthorizedRequestParams {
    pub uri: Url,
    pub properties: HashMap<String, String>,
    pub post_parameters: HashMap<String, String>,
    pub method: RequestMethod,
}

impl AuthorizedRequestParams {
    /// GET request to `uri`.
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            properties: HashMap::new(),
            post_parameters: HashMap::new(),
            method: RequestMethod::Get,
        }
    }

    pub fn method(mut self, method: RequestMethod) -> Self {
        self.method = method;
        self
    }

    /// Add a request header.
    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Add a form body parameter.
    pub fn post_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.post_parameters.insert(name.into(), value.into());
        self
    }
}

/// A built request, executable once.
pub struct PreparedRequest<T> {
    execution: Arc<RequestExecution>,
    response: PhantomData<fn() -> T>,
}

impl<T: ResponseDecoder> PreparedRequest<T> {
    fn new(url: Url, params: ConnectionParameters) -> Self {
        Self {
            execution: Arc::new(RequestExecution::new(url, params)),
            response: PhantomData,
        }
    }

    pub fn request_type(&self) -> RequestType {
        self.execution.params().request_type
    }

    pub fn url(&self) -> &Url {
        self.execution.url()
    }

    pub fn params(&self) -> &ConnectionParameters {
        self.execution.params()
    }

    /// The underlying execution, shared with whoever may cancel it.
    pub fn execution(&self) -> &Arc<RequestExecution> {
        &self.execution
    }

    pub fn cancel(&self) {
        self.execution.cancel();
    }

    /// Open the request, read the body if the status carries one, close the
    /// connection and decode.
    pub async fn execute(&self, connector: &dyn HttpConnector) -> AuthResult<T> {
        let result = self.exchange(connector).await;
        self.execution.close();
        let (status, headers, body) = result?;
        T::decode(status, &headers, &body)
    }

    async fn exchange(
        &self,
        connector: &dyn HttpConnector,
    ) -> AuthResult<(u16, HashMap<String, String>, Vec<u8>)> {
        let mut response = self.execution.open(connector).await?;
        let body = if response.has_body() {
            response.read_body().await?
        } else {
            Vec::new()
        };
        response.disconnect();
        Ok((response.status(), response.headers().clone(), body))
    }
}

impl<T> std::fmt::Debug for PreparedRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedRequest")
            .field("execution", &self.execution)
            .finish()
    }
}

fn bearer(tokens: &TokenResponse) -> String {
    format!("Bearer {}", tokens.access_token())
}

fn missing_endpoint(endpoint: &str) -> ConfigurationError {
    ConfigurationError::MissingEndpoint {
        endpoint: endpoint.to_string(),
    }
}

/// Request to a protected resource with the current access token.
pub fn authorized_request(
    ctx: &RequestContext<'_>,
    params: AuthorizedRequestParams,
) -> AuthResult<PreparedRequest<serde_json::Value>> {
    let tokens = ctx.require_tokens()?;

    let mut connection = ConnectionParameters::new(params.method, RequestType::Authorized)
        .with_property(ACCEPT, JSON);
    connection.request_properties.extend(params.properties);
    connection.post_parameters = params.post_parameters;
    connection
        .request_properties
        .insert(AUTHORIZATION.to_string(), bearer(tokens));

    Ok(PreparedRequest::new(params.uri, connection))
}

/// Userinfo request. Only OIDC providers have one.
pub fn user_profile_request(ctx: &RequestContext<'_>) -> AuthResult<PreparedRequest<UserInfo>> {
    if ctx.config.is_oauth2_configuration() {
        return Err(ConfigurationError::UnsupportedOperation {
            message: "OAuth2 authorization servers do not support the /userinfo endpoint"
                .to_string(),
        }
        .into());
    }
    let endpoint = ctx
        .provider
        .userinfo_endpoint
        .clone()
        .ok_or_else(|| missing_endpoint("userinfo endpoint"))?;
    let tokens = ctx.require_tokens()?;

    let connection = ConnectionParameters::new(RequestMethod::Post, RequestType::Profile)
        .with_property(ACCEPT, JSON)
        .with_property(AUTHORIZATION, bearer(tokens));
    Ok(PreparedRequest::new(endpoint, connection))
}

/// Token introspection (RFC 7662).
pub fn introspect_request(
    ctx: &RequestContext<'_>,
    token: &str,
    hint: TokenTypeHint,
) -> AuthResult<PreparedRequest<IntrospectInfo>> {
    let mut endpoint = ctx
        .provider
        .introspection_endpoint
        .clone()
        .ok_or_else(|| missing_endpoint("introspection endpoint"))?;
    endpoint
        .query_pairs_mut()
        .append_pair("client_id", &ctx.config.client_id)
        .append_pair("token", token)
        .append_pair("token_type_hint", hint.as_str());

    let connection = ConnectionParameters::new(RequestMethod::Post, RequestType::Introspect)
        .with_property(ACCEPT, JSON);
    Ok(PreparedRequest::new(endpoint, connection))
}

/// Token revocation (RFC 7009).
pub fn revoke_request(ctx: &RequestContext<'_>, token: &str) -> AuthResult<PreparedRequest<bool>> {
    let mut endpoint = ctx
        .provider
        .revocation_endpoint
        .clone()
        .ok_or_else(|| missing_endpoint("revocation endpoint"))?;
    endpoint
        .query_pairs_mut()
        .append_pair("client_id", &ctx.config.client_id)
        .append_pair("token", token);

    let connection = ConnectionParameters::new(RequestMethod::Post, RequestType::Revoke)
        .with_property(ACCEPT, JSON);
    Ok(PreparedRequest::new(endpoint, connection))
}

/// Refresh-token grant against the token endpoint.
pub fn refresh_request(ctx: &RequestContext<'_>) -> AuthResult<PreparedRequest<TokenResponse>> {
    let tokens = ctx.require_tokens()?;
    let refresh_token = tokens.refresh_token().ok_or(TokenError::NoRefreshToken)?;

    let connection = ConnectionParameters::new(RequestMethod::Post, RequestType::RefreshToken)
        .with_property(ACCEPT, JSON)
        .with_post_parameter("client_id", ctx.config.client_id.as_str())
        .with_post_parameter("grant_type", "refresh_token")
        .with_post_parameter("refresh_token", refresh_token)
        .with_post_parameter("redirect_uri", ctx.config.redirect_uri.as_str())
        .with_post_parameter("scope", ctx.config.scope());
    Ok(PreparedRequest::new(
        ctx.provider.token_endpoint.clone(),
        connection,
    ))
}

/// Authorization-code grant, completing a PKCE authorize request.
pub fn token_exchange_request(
    ctx: &RequestContext<'_>,
    code: &str,
    code_verifier: &str,
) -> AuthResult<PreparedRequest<TokenResponse>> {
    let connection = ConnectionParameters::new(RequestMethod::Post, RequestType::TokenExchange)
        .with_property(ACCEPT, JSON)
        .with_post_parameter("client_id", ctx.config.client_id.as_str())
        .with_post_parameter("grant_type", "authorization_code")
        .with_post_parameter("code", code)
        .with_post_parameter("redirect_uri", ctx.config.redirect_uri.as_str())
        .with_post_parameter("code_verifier", code_verifier);
    Ok(PreparedRequest::new(
        ctx.provider.token_endpoint.clone(),
        connection,
    ))
}
