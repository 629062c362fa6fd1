//! Session Client Builder
//!
//! Wires configuration, storage, encryption and transport into a [`SessionClient`].

use std::sync::Arc;
use std::time::Duration;

use crate::client::SessionClient;
use crate::core::{create_connector, AuthState, HttpConnector};
use crate::error::{AuthResult, ConfigurationError};
use crate::storage::{EncryptionManager, InMemoryStorage, KeyValueStorage, PersistedStore};
use crate::types::OidcConfig;

/// Builder for [`SessionClient`].
#[derive(Default)]
pub struct SessionClientBuilder {
    config: Option<OidcConfig>,
    storage: Option<Arc<dyn KeyValueStorage>>,
    encryption_manager: Option<Arc<dyn EncryptionManager>>,
    connector: Option<Arc<dyn HttpConnector>>,
    timeout: Option<Duration>,
    cache_mode: bool,
}

impl SessionClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: OidcConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the key/value storage. Defaults to in-memory storage.
    pub fn storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the encryption manager. Without one values are stored in the clear.
    pub fn encryption_manager(mut self, manager: Arc<dyn EncryptionManager>) -> Self {
        self.encryption_manager = Some(manager);
        self
    }

    /// Set the connector. Defaults to a reqwest connector.
    pub fn connector(mut self, connector: Arc<dyn HttpConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Request timeout for the default connector.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Keep decrypted values in memory.
    pub fn cache_mode(mut self, enabled: bool) -> Self {
        self.cache_mode = enabled;
        self
    }

    /// Build the client, loading the session state from storage.
    pub fn build(self) -> AuthResult<SessionClient> {
        let config = self.config.ok_or_else(|| ConfigurationError::MissingRequired {
            field: "config".to_string(),
        })?;

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));
        let hardware_backed = self
            .encryption_manager
            .as_ref()
            .map(|manager| manager.is_hardware_backed())
            .unwrap_or(false);
        if storage.require_hardware_backed_keystore() && !hardware_backed {
            return Err(ConfigurationError::HardwareKeystoreRequired.into());
        }

        let connector: Arc<dyn HttpConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(create_connector(self.timeout)?),
        };

        let store =
            PersistedStore::new(storage, self.encryption_manager).with_cache_mode(self.cache_mode);
        Ok(SessionClient::new(config, AuthState::load(store), connector))
    }
}

/// Create a new session client builder.
pub fn session_client() -> SessionClientBuilder {
    SessionClientBuilder::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::oidc_config;
    use crate::core::{MockConnector, SessionState};
    use crate::error::AuthorizationError;
    use crate::storage::{
        create_software_encryption_manager, AesGcmEncryptionManager, InMemoryKeyStore,
        MockStorage,
    };

    fn config() -> OidcConfig {
        oidc_config()
            .client_id("test-client")
            .redirect_uri("com.example.app:/callback")
            .end_session_redirect_uri("com.example.app:/logout")
            .add_scope("openid")
            .discovery_uri("https://idp.example")
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_with_defaults() {
        let client = session_client()
            .config(config())
            .connector(Arc::new(MockConnector::new()))
            .build()
            .unwrap();

        assert_eq!(client.current_state(), SessionState::Idle);
        assert!(!client.is_authenticated());
        assert!(client.auth_state().encryption_manager().is_none());
    }

    #[test]
    fn test_build_requires_config() {
        let result = session_client().build();
        assert!(matches!(
            result,
            Err(AuthorizationError::Configuration(ConfigurationError::MissingRequired { field }))
                if field == "config"
        ));
    }

    #[test]
    fn test_hardware_keystore_requirement() {
        let result = session_client()
            .config(config())
            .storage(Arc::new(MockStorage::requiring_hardware_keystore()))
            .encryption_manager(Arc::new(create_software_encryption_manager("session")))
            .connector(Arc::new(MockConnector::new()))
            .build();
        assert!(matches!(
            result,
            Err(AuthorizationError::Configuration(
                ConfigurationError::HardwareKeystoreRequired
            ))
        ));

        let client = session_client()
            .config(config())
            .storage(Arc::new(MockStorage::requiring_hardware_keystore()))
            .encryption_manager(Arc::new(AesGcmEncryptionManager::new(
                Arc::new(InMemoryKeyStore::hardware_backed()),
                "session",
            )))
            .connector(Arc::new(MockConnector::new()))
            .cache_mode(true)
            .build();
        assert!(client.is_ok());
    }
}
