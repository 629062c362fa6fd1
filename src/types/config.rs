//! Configuration Types
//!
//! Client-side OIDC configuration.

use serde::Deserialize;
use url::Url;

use crate::builders::oidc_config;
use crate::error::ConfigurationError;

/// Well-known resource appended to an issuer to locate its OIDC discovery document.
pub const OPENID_CONFIGURATION_RESOURCE: &str = "/.well-known/openid-configuration";

/// Well-known resource of an OAuth2-only authorization server (RFC 8414).
pub const OAUTH2_CONFIGURATION_RESOURCE: &str = "/.well-known/oauth-authorization-server";

/// Kind of authorization server the client talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    /// Full OpenID Connect provider (has a userinfo endpoint).
    Oidc,
    /// Plain OAuth2 authorization server.
    OAuth2,
}

impl ProviderKind {
    /// Derive the provider kind from its discovery URI.
    pub fn from_discovery_uri(uri: &Url) -> Self {
        if uri.path().ends_with(OAUTH2_CONFIGURATION_RESOURCE) {
            Self::OAuth2
        } else {
            Self::Oidc
        }
    }
}

/// OIDC client configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct OidcConfig {
    /// Client identifier.
    pub client_id: String,
    /// Redirect URI for the authorization callback.
    pub redirect_uri: Url,
    /// Redirect URI after the end-session round trip.
    pub end_session_redirect_uri: Url,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Discovery document URI.
    pub discovery_uri: Url,
    /// Provider kind, derived from the discovery URI.
    pub provider_kind: ProviderKind,
}

impl OidcConfig {
    /// Load configuration from the conventional JSON config file shape.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let raw: RawOidcConfig =
            serde_json::from_str(json).map_err(|e| ConfigurationError::InvalidConfig {
                message: e.to_string(),
            })?;

        oidc_config()
            .client_id(raw.client_id)
            .redirect_uri(raw.redirect_uri)
            .end_session_redirect_uri(raw.end_session_redirect_uri)
            .scopes(raw.scopes)
            .discovery_uri(raw.discovery_uri)
            .build()
    }

    /// Whether the provider is an OAuth2-only authorization server.
    pub fn is_oauth2_configuration(&self) -> bool {
        self.provider_kind == ProviderKind::OAuth2
    }

    /// Space-delimited scope parameter.
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

#[derive(Deserialize)]
struct RawOidcConfig {
    client_id: String,
    redirect_uri: String,
    end_session_redirect_uri: String,
    scopes: Vec<String>,
    discovery_uri: String,
}
