//! JSON-RPC envelope validation.
//!
//! Transports never deserialize untrusted bytes straight into
//! [`JsonRpcMessage`]: the untagged enum would accept shapes that JSON-RPC
//! forbids (a response with both `result` and `error`, a fractional id, a
//! string `params`). Instead a body goes through [`parse_payload`], which
//! separates "not JSON" (parse error) from "JSON but not JSON-RPC"
//! (invalid request) and checks each message field by field.

use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::messages::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId, JSONRPC_VERSION,
};

/// One inbound body: a single message or a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonRpcPayload {
    /// A single JSON object
    Single(JsonRpcMessage),
    /// A non-empty JSON array of messages
    Batch(Vec<JsonRpcMessage>),
}

impl JsonRpcPayload {
    /// Messages in arrival order.
    pub fn messages(&self) -> &[JsonRpcMessage] {
        match self {
            Self::Single(message) => std::slice::from_ref(message),
            Self::Batch(messages) => messages,
        }
    }

    /// Consume the payload into its messages, in arrival order.
    pub fn into_messages(self) -> Vec<JsonRpcMessage> {
        match self {
            Self::Single(message) => vec![message],
            Self::Batch(messages) => messages,
        }
    }

    /// Whether the body was a JSON array.
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    /// Number of messages that will be answered.
    pub fn request_count(&self) -> usize {
        self.messages()
            .iter()
            .filter(|message| message.expects_response())
            .count()
    }

    /// Whether any message is an `initialize` request.
    pub fn contains_initialize(&self) -> bool {
        self.messages().iter().any(JsonRpcMessage::is_initialize)
    }
}

/// Parse and validate a raw request body.
pub fn parse_payload(body: &[u8]) -> Result<JsonRpcPayload, ProtocolError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| ProtocolError::ParseError {
        reason: e.to_string(),
    })?;
    parse_value(value)
}

/// Validate an already-parsed JSON value.
pub fn parse_value(value: Value) -> Result<JsonRpcPayload, ProtocolError> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(invalid("empty batch"));
            }
            let messages = items
                .into_iter()
                .map(validate_message)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(JsonRpcPayload::Batch(messages))
        }
        other => validate_message(other).map(JsonRpcPayload::Single),
    }
}

/// Reject a batch that carries an `initialize` next to other messages.
///
/// Session creation must be the only thing a payload does.
pub fn ensure_initialize_alone(payload: &JsonRpcPayload) -> Result<(), ProtocolError> {
    if payload.messages().len() > 1 && payload.contains_initialize() {
        return Err(invalid("only one initialization request is allowed"));
    }
    Ok(())
}

/// Validate one JSON value as a JSON-RPC 2.0 message.
pub fn validate_message(value: Value) -> Result<JsonRpcMessage, ProtocolError> {
    let Value::Object(mut object) = value else {
        return Err(invalid("message must be a JSON object"));
    };

    match object.get("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        _ => return Err(invalid("jsonrpc must be exactly \"2.0\"")),
    }

    if let Some(method) = object.remove("method") {
        let Value::String(method) = method else {
            return Err(invalid("method must be a string"));
        };
        let params = take_params(&mut object)?;
        return match object.remove("id") {
            Some(id) => Ok(JsonRpcMessage::Request(JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: parse_id(id)?,
                method,
                params,
            })),
            None => Ok(JsonRpcMessage::Notification(JsonRpcNotification {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method,
                params,
            })),
        };
    }

    let result = object.remove("result");
    let error = object.remove("error");
    let id = object
        .remove("id")
        .ok_or_else(|| invalid("response must carry an id"))
        .and_then(parse_id)?;

    match (result, error) {
        (Some(result), None) => Ok(JsonRpcMessage::Response(JsonRpcResponse::success(
            id, result,
        ))),
        (None, Some(error)) => {
            let error: JsonRpcError = serde_json::from_value(error)
                .map_err(|e| invalid(format!("malformed error object: {e}")))?;
            Ok(JsonRpcMessage::Response(JsonRpcResponse::error(id, error)))
        }
        (Some(_), Some(_)) => Err(invalid("response cannot carry both result and error")),
        (None, None) => Err(invalid("message has neither method nor result/error")),
    }
}

fn take_params(object: &mut Map<String, Value>) -> Result<Option<Value>, ProtocolError> {
    match object.remove("params") {
        None => Ok(None),
        Some(params @ (Value::Object(_) | Value::Array(_))) => Ok(Some(params)),
        Some(_) => Err(invalid("params must be an object or an array")),
    }
}

fn parse_id(id: Value) -> Result<RequestId, ProtocolError> {
    match id {
        Value::String(s) => Ok(RequestId::String(s)),
        Value::Null => Ok(RequestId::Null),
        Value::Number(n) => n
            .as_i64()
            .map(RequestId::Number)
            .ok_or_else(|| invalid("id must be an integer")),
        _ => Err(invalid("id must be a string, an integer or null")),
    }
}

fn invalid(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidRequest {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert_matches!(
            parse_payload(b"{\"jsonrpc\": "),
            Err(ProtocolError::ParseError { .. })
        );
    }

    #[test]
    fn test_request_notification_response_classification() {
        let request = parse_payload(br#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#).unwrap();
        assert_matches!(request, JsonRpcPayload::Single(JsonRpcMessage::Request(ref r)) if r.id == RequestId::Number(3));

        let notification =
            parse_payload(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert_matches!(
            notification,
            JsonRpcPayload::Single(JsonRpcMessage::Notification(_))
        );

        let response = parse_payload(br#"{"jsonrpc":"2.0","id":"a","result":{}}"#).unwrap();
        assert_matches!(response, JsonRpcPayload::Single(JsonRpcMessage::Response(_)));
        assert_eq!(response.request_count(), 0);
    }

    #[test]
    fn test_schema_violations_are_invalid_request() {
        let cases = [
            json!([]),
            json!("tools/list"),
            json!({"id": 1, "method": "ping"}),
            json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": 1, "method": 5}),
            json!({"jsonrpc": "2.0", "id": 1.5, "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": {"a": 1}, "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping", "params": "x"}),
            json!({"jsonrpc": "2.0", "id": 1, "result": {}, "error": {"code": 1, "message": "m"}}),
            json!({"jsonrpc": "2.0", "id": 1}),
            json!({"jsonrpc": "2.0", "result": {}}),
        ];

        for case in cases {
            assert_matches!(
                parse_value(case.clone()),
                Err(ProtocolError::InvalidRequest { .. }),
                "{case}"
            );
        }
    }

    #[test]
    fn test_batch_keeps_order() {
        let payload = parse_value(json!([
            {"jsonrpc": "2.0", "id": "b", "method": "ping"},
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            {"jsonrpc": "2.0", "id": "a", "method": "tools/list"}
        ]))
        .unwrap();

        assert!(payload.is_batch());
        assert_eq!(payload.request_count(), 2);
        let ids: Vec<_> = payload.messages().iter().filter_map(|m| m.id()).collect();
        assert_eq!(ids, vec![&RequestId::from("b"), &RequestId::from("a")]);
    }

    #[test]
    fn test_batched_initialize_rejected() {
        let batch = parse_value(json!([
            {"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}},
            {"jsonrpc": "2.0", "id": 2, "method": "tools/list"}
        ]))
        .unwrap();
        assert_matches!(
            ensure_initialize_alone(&batch),
            Err(ProtocolError::InvalidRequest { .. })
        );

        let single =
            parse_value(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})).unwrap();
        assert!(ensure_initialize_alone(&single).is_ok());
    }
}
