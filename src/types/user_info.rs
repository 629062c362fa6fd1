//! User Info
//!
//! Claims returned by the OIDC userinfo endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parsed userinfo response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserInfo(Map<String, Value>);

impl UserInfo {
    /// Look up a claim.
    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }

    /// Look up a string claim.
    pub fn get_str(&self, claim: &str) -> Option<&str> {
        self.0.get(claim).and_then(Value::as_str)
    }

    pub fn sub(&self) -> Option<&str> {
        self.get_str("sub")
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.0
    }
}
