//! JSON-RPC 2.0 envelope types for the MCP dialect.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

// JSON-RPC error codes on the wire.
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const SERVER_NOT_INITIALIZED: i64 = -32002;

/// Wire protocol revisions this server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "2024-11-05")]
    V20241105,
    #[serde(rename = "2025-03-26")]
    V20250326,
}

impl ProtocolVersion {
    pub const SUPPORTED: [ProtocolVersion; 2] =
        [ProtocolVersion::V20241105, ProtocolVersion::V20250326];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V20241105 => "2024-11-05",
            ProtocolVersion::V20250326 => "2025-03-26",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "2024-11-05" => Some(ProtocolVersion::V20241105),
            "2025-03-26" => Some(ProtocolVersion::V20250326),
            _ => None,
        }
    }

    pub fn supported_strings() -> Vec<&'static str> {
        Self::SUPPORTED.iter().map(|v| v.as_str()).collect()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request ids keep their wire representation: number or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn not_initialized() -> Self {
        Self::new(SERVER_NOT_INITIALIZED, "Server not initialized")
    }

    pub fn unsupported_protocol_version() -> Self {
        Self::with_data(
            INVALID_PARAMS,
            "Unsupported protocol version",
            json!({ "supportedVersions": ProtocolVersion::supported_strings() }),
        )
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn internal() -> Self {
        Self::new(INTERNAL_ERROR, "Internal error")
    }
}

/// Client identity sent with `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "clientInfo", default)]
    pub client_info: Option<ClientInfo>,
    #[serde(default)]
    pub capabilities: Value,
}

/// What the server calls itself in `initialize` replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: ProtocolVersion,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerIdentity,
    pub capabilities: Value,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// A JSON-RPC request plus its routing hints, as carried between the HTTP
/// dispatch layer and a session entity.
#[derive(Debug, Clone)]
pub struct WrappedRequest {
    pub request: JsonRpcRequest,
    /// Connection entity that receives the reply when the request was not
    /// asked synchronously. Empty means the reply is discarded.
    pub respond_to: String,
    /// Serialized auth info, opaque to the core.
    pub auth: Option<Vec<u8>>,
}

impl WrappedRequest {
    pub fn new(request: JsonRpcRequest) -> Self {
        Self {
            request,
            respond_to: String::new(),
            auth: None,
        }
    }

    pub fn respond_to(mut self, connection_id: impl Into<String>) -> Self {
        self.respond_to = connection_id.into();
        self
    }

    pub fn with_auth(mut self, auth: Option<Vec<u8>>) -> Self {
        self.auth = auth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_keeps_wire_representation() {
        let numeric: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc":"2.0","id":7,"method":"m"})).unwrap();
        assert_eq!(numeric.id, Some(RequestId::Number(7)));

        let string: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc":"2.0","id":"7","method":"m"})).unwrap();
        assert_eq!(string.id, Some(RequestId::String("7".to_string())));

        let out = serde_json::to_value(&string).unwrap();
        assert_eq!(out["id"], json!("7"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let req: JsonRpcRequest = serde_json::from_value(
            json!({"jsonrpc":"2.0","method":"notifications/initialized"}),
        )
        .unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn test_success_response_omits_error_field() {
        let resp = JsonRpcResponse::success(Some(RequestId::Number(1)), json!({"ok": true}));
        let out = serde_json::to_value(&resp).unwrap();
        assert!(out.get("error").is_none());
        assert_eq!(out["result"]["ok"], json!(true));
    }

    #[test]
    fn test_unsupported_version_error_shape() {
        let err = RpcError::unsupported_protocol_version();
        assert_eq!(err.code, INVALID_PARAMS);
        assert_eq!(err.message, "Unsupported protocol version");
        let data = err.data.unwrap();
        assert_eq!(
            data["supportedVersions"],
            json!(["2024-11-05", "2025-03-26"])
        );
    }

    #[test]
    fn test_protocol_version_round_trip() {
        for v in ProtocolVersion::SUPPORTED {
            assert_eq!(ProtocolVersion::parse(v.as_str()), Some(v));
        }
        assert_eq!(ProtocolVersion::parse("bad"), None);
        let parsed: ProtocolVersion = serde_json::from_value(json!("2025-03-26")).unwrap();
        assert_eq!(parsed, ProtocolVersion::V20250326);
    }
}
