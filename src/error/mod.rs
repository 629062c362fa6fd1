//! Session Error Types
//!
//! Error hierarchy for the session core. Every public operation returns
//! [`AuthorizationError`], which wraps exactly one of the kinds below.

use std::time::Duration;
use thiserror::Error;

/// Root error type for session operations.
#[derive(Error, Debug)]
pub enum AuthorizationError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Authorization flow error: {0}")]
    Flow(#[from] FlowError),
}

impl AuthorizationError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "SESSION_CONFIG",
            Self::Persistence(_) => "SESSION_PERSISTENCE",
            Self::Network(_) => "SESSION_NETWORK",
            Self::Protocol(_) => "SESSION_PROTOCOL",
            Self::Provider(_) => "SESSION_PROVIDER",
            Self::Token(_) => "SESSION_TOKEN",
            Self::Flow(_) => "SESSION_FLOW",
        }
    }

    /// Check if the caller may reasonably retry.
    ///
    /// Nothing in this crate retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            Self::Provider(ProviderError::ServerError { .. }) => true,
            Self::Provider(ProviderError::TemporarilyUnavailable { .. }) => true,
            _ => false,
        }
    }

    /// Check if error requires the user to sign in again.
    pub fn needs_reauth(&self) -> bool {
        match self {
            Self::Token(TokenError::NotAuthenticated) => true,
            Self::Token(TokenError::NoRefreshToken) => true,
            Self::Provider(ProviderError::InvalidGrant { .. }) => true,
            Self::Flow(FlowError::AccessDenied { .. }) => true,
            Self::Persistence(PersistenceError::DecryptionFailed { .. }) => true,
            _ => false,
        }
    }

    /// Check if the request was canceled by the caller.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Network(NetworkError::Canceled))
    }
}

/// Configuration error. Always raised before any network attempt.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid URI for {field}: {message}")]
    InvalidUri { field: String, message: String },

    #[error("No provider configuration available")]
    MissingProviderConfiguration,

    #[error("Provider does not expose a {endpoint}")]
    MissingEndpoint { endpoint: String },

    #[error("Invalid operation: {message}")]
    UnsupportedOperation { message: String },

    #[error("Storage requires a hardware-backed keystore")]
    HardwareKeystoreRequired,
}

/// Persistence error raised by the store, the storage backend or the
/// encryption manager.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("Read failed for {key}: {message}")]
    ReadFailed { key: String, message: String },

    #[error("Write failed for {key}: {message}")]
    WriteFailed { key: String, message: String },

    #[error("Delete failed for {key}: {message}")]
    DeleteFailed { key: String, message: String },

    #[error("Encryption failed: {message}")]
    EncryptionFailed { message: String },

    #[error("Decryption failed: {message}")]
    DecryptionFailed { message: String },

    #[error("User is not authenticated on this device")]
    UserNotAuthenticated,

    #[error("Key unavailable: {alias}")]
    KeyUnavailable { alias: String },

    #[error("Serialization failed for {key}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Network/transport error.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Only https connections are permitted, got {scheme}")]
    InsecureScheme { scheme: String },

    #[error("Invalid response code -1 no code can be discerned")]
    InvalidResponseCode,

    #[error("Canceled")]
    Canceled,

    #[error("Request has already been executed")]
    AlreadyExecuted,

    #[error("Response has no readable body")]
    NoResponseBody,

    #[error("Failed to read response body: {message}")]
    BodyReadFailed { message: String },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },
}

impl NetworkError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::BodyReadFailed { .. }
        )
    }
}

/// Protocol/response parsing error.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Unexpected redirect to: {location}")]
    UnexpectedRedirect { location: String },
}

/// Provider (authorization server) error.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid client credentials")]
    InvalidClient { error_description: Option<String> },

    #[error("Invalid grant: {message}")]
    InvalidGrant { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid token: {message}")]
    InvalidToken { message: String },

    #[error("Invalid scope: {scope}")]
    InvalidScope { scope: String },

    #[error("Unauthorized client for this grant type")]
    UnauthorizedClient { error_description: Option<String> },

    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType { grant_type: String },

    #[error("Server error: {message}")]
    ServerError { message: String },

    #[error("Server temporarily unavailable")]
    TemporarilyUnavailable { retry_after: Option<Duration> },
}

/// Token precondition error.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("No tokens stored, user is not authenticated")]
    NotAuthenticated,

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("No ID token available")]
    NoIdToken,

    #[error("Invalid token format: {message}")]
    InvalidToken { message: String },
}

/// Browser redirect flow error.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("No pending {expected} request")]
    NoPendingRequest { expected: &'static str },

    #[error("State parameter mismatch (possible CSRF attack)")]
    StateMismatch { expected: String, received: String },

    #[error("Access denied: {error}")]
    AccessDenied {
        error: String,
        error_description: Option<String>,
    },

    #[error("Callback is missing the authorization code")]
    MissingCode,
}

/// Result type for session operations.
pub type AuthResult<T> = Result<T, AuthorizationError>;

/// OAuth2 error response from provider.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OAuth2ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_uri: Option<String>,
}

/// Map a provider error body to error type.
pub fn map_provider_error(response: &OAuth2ErrorResponse) -> ProviderError {
    let description = || {
        response
            .error_description
            .clone()
            .unwrap_or_else(|| response.error.clone())
    };

    match response.error.as_str() {
        "invalid_client" => ProviderError::InvalidClient {
            error_description: response.error_description.clone(),
        },
        "invalid_grant" => ProviderError::InvalidGrant {
            message: description(),
        },
        "invalid_token" => ProviderError::InvalidToken {
            message: description(),
        },
        "invalid_scope" => ProviderError::InvalidScope {
            scope: response.error_description.clone().unwrap_or_default(),
        },
        "unauthorized_client" => ProviderError::UnauthorizedClient {
            error_description: response.error_description.clone(),
        },
        "unsupported_grant_type" => ProviderError::UnsupportedGrantType {
            grant_type: response.error_description.clone().unwrap_or_default(),
        },
        "server_error" => ProviderError::ServerError {
            message: description(),
        },
        "temporarily_unavailable" => ProviderError::TemporarilyUnavailable { retry_after: None },
        _ => ProviderError::InvalidRequest {
            message: description(),
        },
    }
}

/// Parse error response from HTTP body.
pub fn parse_error_response(body: &str) -> Option<OAuth2ErrorResponse> {
    serde_json::from_str(body).ok()
}

/// Create error from a non-success HTTP response.
pub fn create_error_from_response(status: u16, body: &str) -> AuthorizationError {
    if let Some(response) = parse_error_response(body) {
        return AuthorizationError::Provider(map_provider_error(&response));
    }

    let error = match status {
        400 => ProviderError::InvalidRequest {
            message: "Bad request".to_string(),
        },
        401 => ProviderError::InvalidToken {
            message: "Unauthorized".to_string(),
        },
        403 => ProviderError::UnauthorizedClient {
            error_description: Some("Forbidden".to_string()),
        },
        429 => ProviderError::TemporarilyUnavailable {
            retry_after: Some(Duration::from_secs(60)),
        },
        _ => ProviderError::ServerError {
            message: format!("HTTP {}", status),
        },
    };

    AuthorizationError::Provider(error)
}
