//! Configuration Builder
//!
//! Fluent builder for OIDC client configuration.

use url::Url;

use crate::error::ConfigurationError;
use crate::types::{OidcConfig, ProviderKind, OPENID_CONFIGURATION_RESOURCE};

/// OIDC configuration builder.
#[derive(Default)]
pub struct OidcConfigBuilder {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    end_session_redirect_uri: Option<String>,
    scopes: Vec<String>,
    discovery_uri: Option<String>,
}

impl OidcConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set client ID.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set redirect URI.
    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Set end-session redirect URI.
    pub fn end_session_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.end_session_redirect_uri = Some(uri.into());
        self
    }

    /// Set scopes.
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Add a scope.
    pub fn add_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// Set the issuer or its discovery document URI.
    ///
    /// An issuer without a `/.well-known/` path gets the OIDC discovery
    /// resource appended.
    pub fn discovery_uri(mut self, uri: impl Into<String>) -> Self {
        self.discovery_uri = Some(uri.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<OidcConfig, ConfigurationError> {
        let client_id = self
            .client_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| missing("client_id"))?;
        let redirect_uri = parse_uri("redirect_uri", self.redirect_uri)?;
        let end_session_redirect_uri =
            parse_uri("end_session_redirect_uri", self.end_session_redirect_uri)?;

        if self.scopes.is_empty() {
            return Err(missing("scopes"));
        }

        let discovery_uri = self
            .discovery_uri
            .map(|uri| {
                if uri.contains("/.well-known/") {
                    uri
                } else {
                    format!("{}{}", uri.trim_end_matches('/'), OPENID_CONFIGURATION_RESOURCE)
                }
            });
        let discovery_uri = parse_uri("discovery_uri", discovery_uri)?;

        Ok(OidcConfig {
            client_id,
            redirect_uri,
            end_session_redirect_uri,
            scopes: self.scopes,
            provider_kind: ProviderKind::from_discovery_uri(&discovery_uri),
            discovery_uri,
        })
    }
}

fn missing(field: &str) -> ConfigurationError {
    ConfigurationError::MissingRequired {
        field: field.to_string(),
    }
}

fn parse_uri(field: &str, value: Option<String>) -> Result<Url, ConfigurationError> {
    let value = value.ok_or_else(|| missing(field))?;
    Url::parse(&value).map_err(|e| ConfigurationError::InvalidUri {
        field: field.to_string(),
        message: e.to_string(),
    })
}

/// Create a new configuration builder.
pub fn oidc_config() -> OidcConfigBuilder {
    OidcConfigBuilder::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> OidcConfigBuilder {
        oidc_config()
            .client_id("test-client")
            .redirect_uri("com.example.app:/callback")
            .end_session_redirect_uri("com.example.app:/logout")
            .add_scope("openid")
    }

    #[test]
    fn test_builder_success() {
        let config = base()
            .add_scope("profile")
            .discovery_uri("https://idp.example/")
            .build()
            .unwrap();

        assert_eq!(config.client_id, "test-client");
        assert_eq!(config.scopes, vec!["openid", "profile"]);
        assert_eq!(
            config.discovery_uri.as_str(),
            "https://idp.example/.well-known/openid-configuration"
        );
        assert_eq!(config.provider_kind, ProviderKind::Oidc);
    }

    #[test]
    fn test_builder_oauth2_discovery_uri() {
        let config = base()
            .discovery_uri("https://idp.example/oauth2/default/.well-known/oauth-authorization-server")
            .build()
            .unwrap();
        assert!(config.is_oauth2_configuration());
    }

    #[test]
    fn test_builder_missing_client_id() {
        let result = oidc_config()
            .redirect_uri("com.example.app:/callback")
            .end_session_redirect_uri("com.example.app:/logout")
            .add_scope("openid")
            .discovery_uri("https://idp.example")
            .build();

        assert!(matches!(
            result,
            Err(ConfigurationError::MissingRequired { field }) if field == "client_id"
        ));
    }

    #[test]
    fn test_builder_requires_scopes() {
        let result = base()
            .scopes(Vec::new())
            .discovery_uri("https://idp.example")
            .build();
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingRequired { field }) if field == "scopes"
        ));
    }

    #[test]
    fn test_builder_invalid_uri() {
        let result = base().discovery_uri("not a url").build();
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidUri { field, .. }) if field == "discovery_uri"
        ));
    }
}
