//! JSON-RPC 2.0 request/response framing. The transport
//! itself (mutual authentication, the BRC-104 handshake, 402 payment
//! handling) is an external collaborator; this module only owns the wire
//! shape and the standard error codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
    pub id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_stable_field_order() {
        let req = RpcRequest::new(1, "findOutputs", serde_json::json!([{"userId": 1}]));
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["method"], "findOutputs");
        assert_eq!(v["id"], 1);
    }

    #[test]
    fn response_parses_error_branch() {
        let raw = r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"no such method"},"id":3}"#;
        let resp: RpcResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
        assert!(resp.result.is_none());
    }
}
