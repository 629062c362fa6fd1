//! Response Decoding
//!
//! Turns a finished HTTP exchange into the typed result of a request kind.

use serde::de::DeserializeOwned;
use std::collections::HashMap;

use crate::error::{create_error_from_response, AuthResult, ProtocolError};
use crate::types::{IntrospectInfo, TokenResponse, UserInfo};

/// Decoder for the result of one request kind.
pub trait ResponseDecoder: Sized {
    /// Decode a response. `body` is empty for statuses that carry none.
    fn decode(status: u16, headers: &HashMap<String, String>, body: &[u8]) -> AuthResult<Self>;
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn is_redirect(status: u16) -> bool {
    (300..400).contains(&status) && status != 304
}

/// Map a non-success response onto an error.
fn failure(status: u16, headers: &HashMap<String, String>, body: &[u8]) -> AuthResult<()> {
    if is_success(status) {
        return Ok(());
    }
    if is_redirect(status) {
        return Err(ProtocolError::UnexpectedRedirect {
            location: headers.get("location").cloned().unwrap_or_default(),
        }
        .into());
    }
    Err(create_error_from_response(
        status,
        &String::from_utf8_lossy(body),
    ))
}

fn decode_json<T: DeserializeOwned>(
    status: u16,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> AuthResult<T> {
    failure(status, headers, body)?;
    serde_json::from_slice(body).map_err(|e| {
        ProtocolError::InvalidJson {
            message: e.to_string(),
        }
        .into()
    })
}

impl ResponseDecoder for serde_json::Value {
    fn decode(status: u16, headers: &HashMap<String, String>, body: &[u8]) -> AuthResult<Self> {
        // Resource servers may answer 204 or an empty 200.
        if is_success(status) && body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        decode_json(status, headers, body)
    }
}

impl ResponseDecoder for UserInfo {
    fn decode(status: u16, headers: &HashMap<String, String>, body: &[u8]) -> AuthResult<Self> {
        decode_json(status, headers, body)
    }
}

impl ResponseDecoder for IntrospectInfo {
    fn decode(status: u16, headers: &HashMap<String, String>, body: &[u8]) -> AuthResult<Self> {
        decode_json(status, headers, body)
    }
}

impl ResponseDecoder for TokenResponse {
    fn decode(status: u16, headers: &HashMap<String, String>, body: &[u8]) -> AuthResult<Self> {
        failure(status, headers, body)?;
        Ok(TokenResponse::from_slice(body)?)
    }
}

/// Revocation outcome: `true` only for 200.
impl ResponseDecoder for bool {
    fn decode(status: u16, headers: &HashMap<String, String>, body: &[u8]) -> AuthResult<Self> {
        failure(status, headers, body)?;
        Ok(status == 200)
    }
}
