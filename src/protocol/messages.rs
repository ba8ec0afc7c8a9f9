//! Request and response frames for the line-delimited JSON protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Newtype for request identifiers to prevent mixups with other integers.
///
/// Identifiers are allocated from a per-connection counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Get the raw integer value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId(id)
    }
}

/// A request written to the server's stdin.
///
/// Immutable once constructed. Serializes to exactly one line of JSON; the
/// `params` key is omitted when there are no parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    id: RequestId,
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Map<String, Value>>,
}

impl OutgoingMessage {
    /// Create a new request frame.
    pub fn new(
        id: RequestId,
        method: impl Into<String>,
        params: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// The request identifier.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The remote method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request parameters, if any.
    pub fn params(&self) -> Option<&Map<String, Value>> {
        self.params.as_ref()
    }

    /// Serialize to a single line of JSON (without the trailing newline).
    ///
    /// `serde_json` escapes control characters inside strings, so the
    /// output never contains a raw newline.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }
}

/// A response read from the server's stdout.
///
/// Exactly one of `result` / `error` is meaningful; `error` wins when both
/// are present. `id` is optional because a server that failed to decode a
/// request answers with `"id": null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Identifier of the request this answers.
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Result value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error text on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server-side traceback accompanying `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl IncomingMessage {
    /// Build a success response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            error: None,
            traceback: None,
        }
    }

    /// Build a failure response.
    pub fn failure(id: RequestId, error: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            result: None,
            error: Some(error.into()),
            traceback: None,
        }
    }

    /// Decode a response from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(Error::from)
    }

    /// Convert into the caller-facing outcome.
    ///
    /// A success response with no `result` key yields `Value::Null`.
    pub fn into_outcome(self) -> Result<Value> {
        match self.error {
            Some(message) => Err(Error::remote(message, self.traceback)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn outgoing_serializes_to_single_line() {
        let mut params = Map::new();
        params.insert("path".into(), json!("/tmp/a.out"));
        params.insert("function".into(), json!("main\nwith newline"));
        let msg = OutgoingMessage::new(RequestId(7), "disassemble_function", Some(params));

        let line = msg.to_line().unwrap();
        assert!(!line.contains('\n'));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], json!(7));
        assert_eq!(value["method"], json!("disassemble_function"));
        assert_eq!(value["params"]["function"], json!("main\nwith newline"));
    }

    #[test]
    fn outgoing_omits_absent_params() {
        let msg = OutgoingMessage::new(RequestId(1), "ping", None);
        assert_eq!(msg.to_line().unwrap(), r#"{"id":1,"method":"ping"}"#);
    }

    #[test]
    fn echo_preserves_id() {
        let msg = OutgoingMessage::new(RequestId(u64::MAX - 1), "list_functions", None);
        let line = msg.to_line().unwrap();

        // A server echoing the request back is still a well-formed response.
        let value: Value = serde_json::from_str(&line).unwrap();
        let echoed = IncomingMessage::from_value(value).unwrap();
        assert_eq!(echoed.id, Some(msg.id()));
    }

    #[test]
    fn parse_success_response() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"id": 3, "result": ["main", "_start"]}"#).unwrap();
        assert_eq!(msg.id, Some(RequestId(3)));
        assert_eq!(msg.error, None);
        assert_eq!(msg.into_outcome().unwrap(), json!(["main", "_start"]));
    }

    #[test]
    fn parse_error_response_with_traceback() {
        let msg: IncomingMessage = serde_json::from_str(
            r#"{"id": 4, "error": "Function 'foo' not found", "traceback": "Traceback (most recent call last): ..."}"#,
        )
        .unwrap();
        assert!(msg.error.is_some());
        match msg.into_outcome() {
            Err(Error::Remote { message, traceback }) => {
                assert_eq!(message, "Function 'foo' not found");
                assert!(traceback.unwrap().starts_with("Traceback"));
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn error_wins_over_result() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"id": 5, "result": 1, "error": "bad"}"#).unwrap();
        assert!(msg.into_outcome().unwrap_err().is_remote());
    }

    #[test]
    fn missing_result_is_null() {
        let msg: IncomingMessage = serde_json::from_str(r#"{"id": 6}"#).unwrap();
        assert_eq!(msg.into_outcome().unwrap(), Value::Null);
    }

    #[test]
    fn null_id_is_accepted() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"id": null, "error": "Unknown method: x"}"#).unwrap();
        assert_eq!(msg.id, None);
    }

    #[test]
    fn non_object_frame_is_rejected() {
        assert!(IncomingMessage::from_value(json!([1, 2, 3])).is_err());
        assert!(IncomingMessage::from_value(json!({"id": "seven"})).is_err());
    }

    #[test]
    fn request_id_display_and_serde() {
        let id = RequestId::from(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        assert_eq!(id.get(), 42);
    }
}
