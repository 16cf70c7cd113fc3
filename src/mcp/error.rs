use thiserror::Error;

use super::protocol::{INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, RpcError};

/// Failures surfaced to clients as JSON-RPC error responses.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type McpResult<T> = Result<T, McpError>;

impl McpError {
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            McpError::MethodNotFound(method) => RpcError::method_not_found(method),
            McpError::InvalidParams(msg) => RpcError::new(INVALID_PARAMS, msg.clone()),
            McpError::InvalidRequest(msg) => RpcError::new(INVALID_REQUEST, msg.clone()),
            McpError::Internal(_) => RpcError::new(INTERNAL_ERROR, "Internal error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::METHOD_NOT_FOUND;

    #[test]
    fn test_method_not_found_maps_to_32601() {
        let err = McpError::MethodNotFound("foo".to_string());
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, METHOD_NOT_FOUND);
        assert!(rpc.message.contains("foo"));
    }

    #[test]
    fn test_internal_error_hides_details_from_wire() {
        let err = McpError::Internal("database exploded".to_string());
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, INTERNAL_ERROR);
        assert_eq!(rpc.message, "Internal error");
    }
}
