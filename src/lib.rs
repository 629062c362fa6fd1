//! OIDC Session Core
//!
//! Client-side session state for OpenID Connect / OAuth2: the authentication
//! state machine, encrypted persistence of the provider configuration and
//! tokens, and the authorized requests made on the user's behalf.
//!
//! # Features
//!
//! - Session state machine (idle, authorization in progress, authenticated)
//! - Encrypted, typed persistence over pluggable key/value storage
//! - Encryption migration with rollback
//! - Authorized resource requests, userinfo, token refresh
//! - Token Introspection (RFC 7662) and Revocation (RFC 7009)
//! - Authorization Code with PKCE (RFC 7636) and OIDC end-session
//! - Cancellable, https-only request execution
//!
//! # Example
//!
//! ```rust,ignore
//! use oidc_session::{oidc_config, session_client, FileStorage, WebAuthFlow};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = oidc_config()
//!         .client_id("my-client-id")
//!         .redirect_uri("com.example.app:/callback")
//!         .end_session_redirect_uri("com.example.app:/logout")
//!         .add_scope("openid")
//!         .add_scope("profile")
//!         .discovery_uri("https://idp.example.com")
//!         .build()?;
//!
//!     let mut client = session_client()
//!         .config(config)
//!         .storage(Arc::new(FileStorage::new("/var/lib/my-app/session")))
//!         .encryption_manager(Arc::new(oidc_session::create_software_encryption_manager("session")))
//!         .build()?;
//!
//!     if !client.is_authenticated() {
//!         let flow = WebAuthFlow::default();
//!         let request = flow.begin_authorization(&mut client)?;
//!         println!("Open in browser: {}", request.to_url());
//!         return Ok(());
//!     }
//!
//!     let profile = client.get_user_profile().await?;
//!     println!("Signed in as {:?}", profile.sub());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: configuration, provider metadata, tokens and wire types
//! - `error`: error hierarchy and provider error mapping
//! - `storage`: key/value backends, encryption manager and the persisted store
//! - `core`: transport, request execution, PKCE and the authentication state
//! - `request`: per-kind request construction and response decoding
//! - `flows`: browser redirect flows (authorize, end-session)
//! - `builders`: fluent builders for configuration and the client
//! - `client`: the session client

pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod flows;
pub mod request;
pub mod storage;
pub mod types;

// Re-export main client
pub use client::{CancelHandle, SessionClient};

// Re-export builders
pub use builders::{oidc_config, session_client, OidcConfigBuilder, SessionClientBuilder};

// Re-export errors
pub use error::{
    create_error_from_response, parse_error_response, AuthResult, AuthorizationError,
    ConfigurationError, FlowError, NetworkError, OAuth2ErrorResponse, PersistenceError,
    ProtocolError, ProviderError, TokenError,
};

// Re-export types
pub use types::{
    // Config
    OidcConfig, ProviderConfiguration, ProviderKind,
    // Token
    TokenResponse, Tokens,
    // Introspection
    IntrospectInfo, TokenTypeHint,
    // User info
    UserInfo,
    // Web
    AuthorizeRequest, CallbackParams, LogoutRequest, PkceMethod, PkceParams, WebRequest,
};

#[cfg(feature = "jwt")]
pub use types::IdTokenClaims;

// Re-export storage
pub use storage::{
    // Backends
    FileStorage, InMemoryStorage, KeyValueStorage, MockStorage,
    // Encryption
    create_software_encryption_manager, AesGcmEncryptionManager, EncryptionManager,
    InMemoryKeyStore, KeyStore,
    // Store
    Persistable, PersistedStore,
};

// Re-export core components
pub use self::core::{
    // Connector
    Connection, ConnectionParameters, HttpConnector, MockConnector, MockReply, ReqwestConnector,
    RequestMethod, RequestType,
    // Execution
    ExecutionPhase, HttpResponse, RequestExecution,
    // PKCE
    DefaultPkceGenerator, MockPkceGenerator, PkceGenerator,
    // State
    AuthState, SessionState,
};

// Re-export requests
pub use request::{AuthorizedRequestParams, PreparedRequest, RequestContext, ResponseDecoder};

// Re-export flows
pub use flows::WebAuthFlow;
