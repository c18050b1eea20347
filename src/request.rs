//! Decoding of inbound request bodies.

use serde::Deserialize;
use thiserror::Error;

/// The body could not be turned into a [`Request`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("request body is empty")]
    Empty,

    #[error("malformed request body: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A decoded request. The operation name is kept as sent; it is checked
/// against the known operations when the request is routed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Request {
    #[serde(alias = "operation")]
    pub action: String,

    #[serde(flatten)]
    pub parameters: Parameters,

    #[serde(flatten)]
    pub target: Target,
}

/// Named parameters some operations require.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Parameters {
    pub hash: Option<String>,
    pub branch: Option<String>,
}

/// Which repository to read and how to reach it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Target {
    #[serde(alias = "request_sender")]
    pub source: Option<String>,
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub token: Option<String>,
}

impl Request {
    /// Parse a JSON object body.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Empty);
        }
        Ok(serde_json::from_slice(body)?)
    }
}
