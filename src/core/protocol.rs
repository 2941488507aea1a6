//! Wire shapes for the JSON-RPC 2.0 envelope MCP runs over. The gateway
//! never negotiates its own `initialize` handshake — every call it makes,
//! downstream or upstream, is `tools/call`, `prompts/get`,
//! `resources/read` and the like carried as opaque `method`/`params`
//! pairs — so this module carries only the envelope itself, not
//! capability-negotiation payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC request, or a notification when `id` is `None`. `new`
/// leaves `id` unset; a caller that needs one assigns it through a
/// [`crate::core::request_id::SharedRequestIdGenerator`] before sending,
/// so there is exactly one place in the gateway that mints request ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0".to_string(), id: None, method: method.into(), params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_has_no_id_until_assigned() {
        let request = JsonRpcRequest::new("tools/call", None);
        assert!(request.id.is_none());
    }

    #[test]
    fn request_id_roundtrips_numbers_and_strings() {
        let numeric: RequestId = serde_json::from_str("7").unwrap();
        assert_eq!(numeric, RequestId::Number(7));

        let stringy: RequestId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(stringy, RequestId::String("abc".to_string()));
    }

    #[test]
    fn response_with_error_omits_result_field() {
        let response = JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: Some(RequestId::Number(1)),
            result: None,
            error: Some(JsonRpcError { code: -32000, message: "boom".to_string(), data: None }),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["message"], "boom");
    }
}
