//! Web Request Types
//!
//! Browser redirect requests (authorize and end-session) that are persisted
//! while a flow is in progress, and the callback parameters that complete them.

use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

/// PKCE code challenge method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    #[serde(rename = "plain")]
    Plain,
    #[serde(rename = "S256")]
    S256,
}

impl PkceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

/// PKCE verifier/challenge pair.
#[derive(Clone, PartialEq, Eq)]
pub struct PkceParams {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: PkceMethod,
}

impl std::fmt::Debug for PkceParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceParams")
            .field("code_verifier", &"[REDACTED]")
            .field("code_challenge", &self.code_challenge)
            .field("code_challenge_method", &self.code_challenge_method)
            .finish()
    }
}

/// Generate a random URL-safe value for `state` or `nonce`.
pub fn generate_random_state() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Pending authorization-code request.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    pub authorization_endpoint: Url,
    pub client_id: String,
    pub redirect_uri: Url,
    pub scope: String,
    pub state: String,
    pub nonce: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: PkceMethod,
}

impl AuthorizeRequest {
    /// URL to open in the browser.
    pub fn to_url(&self) -> Url {
        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", &self.scope)
            .append_pair("state", &self.state)
            .append_pair("nonce", &self.nonce)
            .append_pair("code_challenge", &self.code_challenge)
            .append_pair("code_challenge_method", self.code_challenge_method.as_str());
        url
    }
}

impl std::fmt::Debug for AuthorizeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizeRequest")
            .field("authorization_endpoint", &self.authorization_endpoint.as_str())
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("scope", &self.scope)
            .field("code_verifier", &"[REDACTED]")
            .finish()
    }
}

/// Pending end-session request.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub end_session_endpoint: Url,
    pub client_id: String,
    pub id_token_hint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_logout_redirect_uri: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl LogoutRequest {
    /// Create a logout request with a random state.
    pub fn new(
        end_session_endpoint: Url,
        client_id: impl Into<String>,
        id_token_hint: impl Into<String>,
    ) -> Self {
        Self {
            end_session_endpoint,
            client_id: client_id.into(),
            id_token_hint: id_token_hint.into(),
            post_logout_redirect_uri: None,
            state: Some(generate_random_state()),
        }
    }

    pub fn with_post_logout_redirect(mut self, uri: Url) -> Self {
        self.post_logout_redirect_uri = Some(uri);
        self
    }

    /// Override the state. `None` omits it from the URL.
    pub fn with_state(mut self, state: Option<String>) -> Self {
        self.state = state;
        self
    }

    /// URL to open in the browser.
    pub fn to_url(&self) -> Url {
        let mut url = self.end_session_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("id_token_hint", &self.id_token_hint);
            if let Some(uri) = &self.post_logout_redirect_uri {
                query.append_pair("post_logout_redirect_uri", uri.as_str());
            }
            if let Some(state) = &self.state {
                query.append_pair("state", state);
            }
        }
        url
    }
}

impl std::fmt::Debug for LogoutRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogoutRequest")
            .field("end_session_endpoint", &self.end_session_endpoint.as_str())
            .field("client_id", &self.client_id)
            .field("id_token_hint", &"[REDACTED]")
            .field("post_logout_redirect_uri", &self.post_logout_redirect_uri)
            .finish()
    }
}

/// Whichever browser request is currently in flight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebRequest {
    Authorize(AuthorizeRequest),
    Logout(LogoutRequest),
}

impl WebRequest {
    pub fn state(&self) -> Option<&str> {
        match self {
            Self::Authorize(request) => Some(&request.state),
            Self::Logout(request) => request.state.as_deref(),
        }
    }

    pub fn to_url(&self) -> Url {
        match self {
            Self::Authorize(request) => request.to_url(),
            Self::Logout(request) => request.to_url(),
        }
    }
}

/// Callback parameters from a browser redirect.
#[derive(Clone, Debug, Default)]
pub struct CallbackParams {
    /// Authorization code (if success).
    pub code: Option<String>,
    pub state: Option<String>,
    /// Error code (if the provider rejected the request).
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse callback parameters from the redirect URL.
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                "error_description" => params.error_description = Some(value.into_owned()),
                _ => {}
            }
        }

        params
    }

    /// Parse callback parameters from URL string.
    pub fn from_url_str(url_str: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(url_str)?;
        Ok(Self::from_url(&url))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
