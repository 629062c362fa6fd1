//! Provider Configuration
//!
//! Endpoints and metadata taken from a provider's discovery document.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ProtocolError;

/// Identity provider endpoints and metadata.
///
/// Created from the discovery document the first time it is fetched and
/// replaced only when the configured discovery URI moves to another issuer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfiguration {
    /// Issuer identifier.
    pub issuer: String,
    /// Authorization endpoint.
    pub authorization_endpoint: Url,
    /// Token endpoint.
    pub token_endpoint: Url,
    /// OIDC userinfo endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<Url>,
    /// JWKS URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<Url>,
    /// Dynamic client registration endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<Url>,
    /// Token introspection endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<Url>,
    /// Token revocation endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<Url>,
    /// End-session (logout) endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<Url>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_types_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grant_types_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_challenge_methods_supported: Vec<String>,
}

impl ProviderConfiguration {
    /// Parse a discovery document.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::InvalidJson {
            message: e.to_string(),
        })
    }

    /// Whether this configuration was obtained from a different issuer than
    /// the given discovery URI points at.
    pub fn is_stale_for(&self, discovery_uri: &Url) -> bool {
        let issuer = self.issuer.trim_end_matches('/');
        match discovery_uri.as_str().strip_prefix(issuer) {
            Some(rest) => !(rest.is_empty() || rest.starts_with('/')),
            None => true,
        }
    }

    /// Whether the provider exposes a userinfo endpoint.
    pub fn supports_user_info(&self) -> bool {
        self.userinfo_endpoint.is_some()
    }
}
