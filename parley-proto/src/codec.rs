//! JSON encoding and decoding for Parley request and response bodies.
//!
//! The client encodes every request body with [`encode`] and decodes every
//! response with [`decode`] or [`error_detail`].

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::sync::ErrorBody;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a body as JSON bytes.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(body).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a JSON body.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes are not valid JSON for `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Extracts the human-readable detail from an error response body.
///
/// Falls back to the raw body text when it is not an [`ErrorBody`], and to a
/// placeholder when the body is empty.
#[must_use]
pub fn error_detail(bytes: &[u8]) -> String {
    if let Ok(body) = decode::<ErrorBody>(bytes) {
        return body.detail;
    }
    let text = String::from_utf8_lossy(bytes).trim().to_string();
    if text.is_empty() {
        "no detail provided".to_string()
    } else {
        text
    }
}
