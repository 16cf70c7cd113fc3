pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod protocol;
pub mod session;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use serde_json::Value;

use error::McpResult;
use protocol::ServerIdentity;

/// One application-level method invocation, with the session it belongs to
/// and the opaque auth payload extracted at the HTTP boundary.
pub struct MethodCall<'a> {
    pub session_id: &'a str,
    pub method: &'a str,
    pub params: Option<&'a Value>,
    pub auth: Option<&'a [u8]>,
}

/// Application-level method dispatch. The lifecycle methods `initialize`,
/// `notifications/initialized`, and `shutdown` are reserved by the runtime
/// and never delegated here.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    fn can_handle(&self, method: &str) -> bool;

    /// Returns the JSON-RPC result payload; the session wraps it into a
    /// response that keeps the request id.
    async fn handle(&self, call: MethodCall<'_>) -> McpResult<Value>;
}

/// Caller identity, opaque to the runtime.
#[derive(Debug, Clone)]
pub struct AuthInfo(pub Value);

/// Extracts caller identity from the HTTP request and moves it across the
/// entity boundary as bytes.
pub trait AuthHandler: Send + Sync {
    fn extract(&self, headers: &HeaderMap) -> Option<AuthInfo>;
    fn serialize(&self, info: &AuthInfo) -> Vec<u8>;
    fn deserialize(&self, bytes: &[u8]) -> Option<AuthInfo>;
}

/// Everything the dispatch layer knows about the hosted server: identity and
/// capabilities advertised in `initialize` replies, the method handler, and
/// the optional auth handler.
pub struct ServerInfo {
    pub identity: ServerIdentity,
    pub capabilities: Value,
    pub handler: Arc<dyn MethodHandler>,
    pub auth: Option<Arc<dyn AuthHandler>>,
}

/// Bearer-token plumbing: carries the token from the `Authorization` header
/// through to method handlers without interpreting it.
pub struct BearerAuth;

impl AuthHandler for BearerAuth {
    fn extract(&self, headers: &HeaderMap) -> Option<AuthInfo> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?;
        Some(AuthInfo(Value::String(token.to_string())))
    }

    fn serialize(&self, info: &AuthInfo) -> Vec<u8> {
        info.0.to_string().into_bytes()
    }

    fn deserialize(&self, bytes: &[u8]) -> Option<AuthInfo> {
        serde_json::from_slice(bytes).ok().map(AuthInfo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_auth_round_trip() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sesame"),
        );
        let auth = BearerAuth;
        let info = auth.extract(&headers).unwrap();
        let bytes = auth.serialize(&info);
        let back = auth.deserialize(&bytes).unwrap();
        assert_eq!(back.0, Value::String("sesame".to_string()));
    }

    #[test]
    fn test_bearer_auth_ignores_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic sesame"),
        );
        assert!(BearerAuth.extract(&headers).is_none());
        assert!(BearerAuth.extract(&HeaderMap::new()).is_none());
    }
}
