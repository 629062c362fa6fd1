//! PKCE Generator
//!
//! RFC 7636 verifier and S256 challenge for the authorize request.

use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Mutex;

use crate::error::ConfigurationError;
use crate::types::{PkceMethod, PkceParams};

const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// PKCE generator interface (for dependency injection).
pub trait PkceGenerator: Send + Sync {
    /// Generate a verifier and its S256 challenge.
    fn generate(&self) -> PkceParams;
}

/// Compute the S256 challenge: BASE64URL(SHA256(verifier)).
pub fn s256_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

/// Default PKCE generator implementation.
pub struct DefaultPkceGenerator {
    verifier_length: usize,
}

impl DefaultPkceGenerator {
    /// Create new PKCE generator with default verifier length (64).
    pub fn new() -> Self {
        Self { verifier_length: 64 }
    }

    /// Create PKCE generator with custom verifier length (43 to 128).
    pub fn with_length(length: usize) -> Result<Self, ConfigurationError> {
        if !(43..=128).contains(&length) {
            return Err(ConfigurationError::InvalidConfig {
                message: format!("PKCE verifier length must be between 43 and 128, got {}", length),
            });
        }
        Ok(Self {
            verifier_length: length,
        })
    }

    fn generate_verifier(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.verifier_length)
            .map(|_| UNRESERVED[rng.gen_range(0..UNRESERVED.len())] as char)
            .collect()
    }
}

impl Default for DefaultPkceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl PkceGenerator for DefaultPkceGenerator {
    fn generate(&self) -> PkceParams {
        let code_verifier = self.generate_verifier();
        PkceParams {
            code_challenge: s256_challenge(&code_verifier),
            code_verifier,
            code_challenge_method: PkceMethod::S256,
        }
    }
}

/// Mock PKCE generator for testing.
#[derive(Default)]
pub struct MockPkceGenerator {
    next_verifier: Mutex<Option<String>>,
    generate_count: Mutex<usize>,
}

impl MockPkceGenerator {
    /// Create new mock PKCE generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the next verifier to generate.
    pub fn set_next_verifier(&self, verifier: impl Into<String>) -> &Self {
        *self
            .next_verifier
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(verifier.into());
        self
    }

    pub fn generate_count(&self) -> usize {
        *self
            .generate_count
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl PkceGenerator for MockPkceGenerator {
    fn generate(&self) -> PkceParams {
        let code_verifier = self
            .next_verifier
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| "mock-verifier-0000000000000000000000000000000000".to_string());

        *self
            .generate_count
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) += 1;

        PkceParams {
            code_challenge: s256_challenge(&code_verifier),
            code_verifier,
            code_challenge_method: PkceMethod::S256,
        }
    }
}

/// Validate PKCE verifier format.
pub fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len()) && verifier.bytes().all(|b| UNRESERVED.contains(&b))
}

/// Create production PKCE generator.
pub fn create_pkce_generator() -> DefaultPkceGenerator {
    DefaultPkceGenerator::new()
}

/// Create mock PKCE generator for testing.
pub fn create_mock_pkce_generator() -> MockPkceGenerator {
    MockPkceGenerator::new()
}
