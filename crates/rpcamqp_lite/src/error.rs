use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the broker transport.
///
/// Every variant is fatal for the dispatcher: a broken channel cannot be
/// trusted to deliver replies or acknowledgments.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Could not open a connection or channel to the broker.
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    /// Queue declaration was refused.
    #[error("failed to declare queue '{queue}': {reason}")]
    Declare { queue: String, reason: String },

    /// The broker refused to start a consumer.
    #[error("failed to consume from '{queue}': {reason}")]
    Consume { queue: String, reason: String },

    /// Publishing a message failed.
    #[error("failed to publish to '{routing_key}': {reason}")]
    Publish { routing_key: String, reason: String },

    /// Acknowledging a delivery failed.
    #[error("failed to acknowledge delivery {delivery_tag}: {reason}")]
    Ack { delivery_tag: u64, reason: String },

    /// The delivery stream yielded an error.
    #[error("failed to receive delivery: {0}")]
    Receive(String),
}

/// Errors that can occur while running the RPC dispatcher.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcServerError {
    /// Every connection attempt allowed by the retry policy failed.
    #[error("broker unreachable after {attempts} attempts")]
    ConnectRetriesExhausted {
        attempts: u32,
        #[source]
        last: TransportError,
    },

    /// A transport failure after the connection was established.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The delivery tag was already claimed or settled on this channel.
    #[error("delivery {0} already claimed on this channel")]
    DuplicateDelivery(u64),

    /// A worker task died without reporting a result.
    #[error("dispatch worker failed: {0}")]
    Worker(String),
}

/// Errors that can occur on the requesting side of an RPC exchange.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Timeout waiting for the correlated reply.
    #[error("timeout waiting for reply")]
    Timeout(#[from] tokio::time::error::Elapsed),

    /// The reply stream ended before a matching reply arrived.
    #[error("RPC connection closed")]
    ConnectionClosed,
}

/// Category of a per-request failure, carried on the wire as a snake_case
/// string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FailureKind {
    /// The request body could not be parsed.
    Decode,
    /// The requested operation is not registered.
    UnknownOperation,
    /// A parameter the operation needs was absent.
    MissingParameter,
    /// The request was well formed but cannot be served.
    InvalidRequest,
    /// The upstream data source failed.
    Upstream,
    /// The handler did not finish in time.
    Timeout,
    /// Anything else, including handler panics.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Decode => "decode",
            FailureKind::UnknownOperation => "unknown_operation",
            FailureKind::MissingParameter => "missing_parameter",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::Upstream => "upstream",
            FailureKind::Timeout => "timeout",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-request failure. Always turned into a reply, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct RpcFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RpcFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("handler did not complete within {}ms", limit.as_millis()),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}
