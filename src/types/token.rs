//! Token Types
//!
//! The token response obtained from the provider and the read-only
//! [`Tokens`] projection handed to callers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
#[cfg(feature = "jwt")]
use crate::error::TokenError;

/// Credential set from a successful authorization or refresh.
///
/// Immutable once constructed. A refresh replaces the whole value.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
    /// Receipt time. Absent on the wire, so it defaults to "now" when the
    /// provider response is parsed and round-trips through storage afterwards.
    #[serde(default = "Utc::now")]
    issued_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// Parse a token endpoint response body.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Self::from_slice(json.as_bytes())
    }

    /// Parse a token endpoint response body from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidJson {
            message: e.to_string(),
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn expires_in(&self) -> Option<u64> {
        self.expires_in
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("has_id_token", &self.id_token.is_some())
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Read-only view of the current tokens.
#[derive(Clone, PartialEq)]
pub struct Tokens {
    response: TokenResponse,
}

impl From<TokenResponse> for Tokens {
    fn from(response: TokenResponse) -> Self {
        Self { response }
    }
}

impl Tokens {
    pub fn access_token(&self) -> &str {
        self.response.access_token()
    }

    pub fn id_token(&self) -> Option<&str> {
        self.response.id_token()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.response.refresh_token()
    }

    pub fn token_type(&self) -> &str {
        self.response.token_type()
    }

    pub fn expires_in(&self) -> Option<u64> {
        self.response.expires_in()
    }

    /// Granted scopes.
    pub fn scopes(&self) -> Vec<String> {
        self.response
            .scope()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Access token expiry, if the provider sent an `expires_in` that fits
    /// in a timestamp.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.response
            .expires_in()
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| self.response.issued_at().checked_add_signed(lifetime))
    }

    /// Check if the access token is expired. Tokens without an expiry never are.
    pub fn is_access_token_expired(&self) -> bool {
        self.expires_at().map(|exp| exp <= Utc::now()).unwrap_or(false)
    }

    /// Decode the ID token's claims without verifying its signature.
    #[cfg(feature = "jwt")]
    pub fn id_token_claims(&self) -> Result<IdTokenClaims, TokenError> {
        use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};

        let token = self.id_token().ok_or(TokenError::NoIdToken)?;
        let invalid = |e: jsonwebtoken::errors::Error| TokenError::InvalidToken {
            message: e.to_string(),
        };

        let header = decode_header(token).map_err(invalid)?;
        let mut validation = Validation::new(header.alg);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<IdTokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(invalid)
    }
}

impl std::fmt::Debug for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokens")
            .field("response", &self.response)
            .finish()
    }
}

/// Unverified ID token claims.
#[cfg(feature = "jwt")]
#[derive(Clone, Debug, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}
