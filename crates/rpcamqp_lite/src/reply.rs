use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::error::RpcFailure;

/// Result of handling one request: either the value to send back or a
/// failure description. There is no third case, so every request gets a reply.
pub type HandlerOutcome = Result<Value, RpcFailure>;

/// Body of a reply message.
///
/// Successes are sent as the bare JSON value (`null`, an object or an array).
/// Failures are wrapped as `{"error": {"kind": ..., "message": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReplyPayload {
    Success(Value),
    Failure { error: RpcFailure },
}

const FALLBACK_PAYLOAD: &[u8] =
    br#"{"error":{"kind":"internal","message":"failed to serialize reply"}}"#;

impl ReplyPayload {
    pub fn is_failure(&self) -> bool {
        matches!(self, ReplyPayload::Failure { .. })
    }

    /// Serialize to the JSON body published on the reply queue.
    pub fn encode(&self) -> Bytes {
        match serde_json::to_vec(self) {
            Ok(buf) => Bytes::from(buf),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize reply payload");
                Bytes::from_static(FALLBACK_PAYLOAD)
            }
        }
    }
}

impl From<HandlerOutcome> for ReplyPayload {
    fn from(outcome: HandlerOutcome) -> Self {
        match outcome {
            Ok(value) => ReplyPayload::Success(value),
            Err(error) => ReplyPayload::Failure { error },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use serde_json::json;

    #[test]
    fn test_success_is_bare_value() {
        let payload = ReplyPayload::from(Ok(json!([{"name": "main"}, {"name": "dev"}])));
        assert_eq!(
            payload.encode(),
            Bytes::from_static(br#"[{"name":"main"},{"name":"dev"}]"#)
        );
    }

    #[test]
    fn test_null_success() {
        let payload = ReplyPayload::from(Ok(Value::Null));
        assert!(!payload.is_failure());
        assert_eq!(payload.encode(), Bytes::from_static(b"null"));
    }

    #[test]
    fn test_failure_envelope() {
        let payload = ReplyPayload::from(Err(RpcFailure::new(
            FailureKind::UnknownOperation,
            "unknown operation 'unknown_op'",
        )));
        assert!(payload.is_failure());

        let decoded: Value = serde_json::from_slice(&payload.encode()).unwrap();
        assert_eq!(
            decoded,
            json!({"error": {
                "kind": "unknown_operation",
                "message": "unknown operation 'unknown_op'"
            }})
        );
    }
}
