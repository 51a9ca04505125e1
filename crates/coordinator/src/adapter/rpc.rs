//! JSON-RPC 2.0 helpers.

use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::http::check_response;
use crate::errors::OperationError;
use crate::models::ProviderEndpoint;

/// Provider-side rate limit ("limit exceeded").
const RPC_LIMIT_EXCEEDED: i64 = -32005;
/// Another common throttling code.
const RPC_TOO_MANY_REQUESTS: i64 = -32029;
const RPC_PARSE_ERROR: i64 = -32700;
const RPC_INVALID_REQUEST: i64 = -32600;
const RPC_METHOD_NOT_FOUND: i64 = -32601;
const RPC_INVALID_PARAMS: i64 = -32602;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Request envelope.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        }
    }
}

/// The `error` member of a response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response envelope. `result` is kept raw until the error member is checked.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

impl OperationError {
    /// Classify a JSON-RPC error object.
    ///
    /// Throttling codes are `RateLimited`, malformed requests are `Fatal` and
    /// everything else (including server-defined codes) is `Transient`.
    pub fn from_rpc_error(error: &RpcErrorObject) -> Self {
        let message = format!("RPC error {}: {}", error.code, error.message);

        match error.code {
            RPC_LIMIT_EXCEEDED | RPC_TOO_MANY_REQUESTS => Self::RateLimited {
                message,
                retry_after: None,
            },
            RPC_PARSE_ERROR | RPC_INVALID_REQUEST | RPC_METHOD_NOT_FOUND | RPC_INVALID_PARAMS => {
                Self::Fatal(message)
            }
            _ => Self::Transient(message),
        }
    }
}

impl RpcResponse {
    /// Unwrap the result, classifying an error member.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, OperationError> {
        if let Some(error) = self.error {
            return Err(OperationError::from_rpc_error(&error));
        }

        serde_json::from_value(self.result.unwrap_or(Value::Null))
            .map_err(|e| OperationError::fatal(format!("Unexpected RPC result: {}", e)))
    }
}

/// Call `method` on the provider's JSON-RPC endpoint.
pub async fn rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    endpoint: &ProviderEndpoint,
    method: &str,
    params: Value,
) -> Result<T, OperationError> {
    let request = RpcRequest::new(method, params);
    debug!("RPC {} #{} via '{}'", method, request.id, endpoint.id);

    let response = client
        .post(&*endpoint.base_url)
        .json(&request)
        .send()
        .await
        .map_err(|e| OperationError::from_reqwest(&e))?;

    let response = check_response(response).await?;
    let body: RpcResponse = response
        .json()
        .await
        .map_err(|e| OperationError::from_reqwest(&e))?;

    body.into_result()
}

/// Parse a hex quantity such as `"0x10d4f"`.
pub fn parse_quantity(value: &str) -> Result<u64, OperationError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| OperationError::fatal(format!("Not a hex quantity: {}", value)))?;

    u64::from_str_radix(digits, 16)
        .map_err(|e| OperationError::fatal(format!("Invalid hex quantity {}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureClass;
    use serde_json::json;

    fn error(code: i64) -> RpcErrorObject {
        RpcErrorObject {
            code,
            message: "boom".to_string(),
            data: None,
        }
    }

    #[test]
    fn test_rpc_error_classification() {
        assert_eq!(
            OperationError::from_rpc_error(&error(-32005)).class(),
            FailureClass::RateLimited
        );
        assert_eq!(
            OperationError::from_rpc_error(&error(-32029)).class(),
            FailureClass::RateLimited
        );
        for code in [-32700, -32600, -32601, -32602] {
            assert_eq!(
                OperationError::from_rpc_error(&error(code)).class(),
                FailureClass::Fatal
            );
        }
        assert_eq!(
            OperationError::from_rpc_error(&error(-32000)).class(),
            FailureClass::Transient
        );
        assert_eq!(
            OperationError::from_rpc_error(&error(-32603)).class(),
            FailureClass::Transient
        );
    }

    #[test]
    fn test_request_envelope() {
        let request = RpcRequest::new("eth_blockNumber", json!([]));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "eth_blockNumber");
        assert!(value["id"].as_u64().is_some());

        let next = RpcRequest::new("eth_chainId", json!([]));
        assert_ne!(next.id, request.id);
    }

    #[test]
    fn test_response_result() {
        let response: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#).unwrap();
        let block: String = response.into_result().unwrap();
        assert_eq!(parse_quantity(&block).unwrap(), 16);
    }

    #[test]
    fn test_response_error_member() {
        let response: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"limit exceeded"}}"#,
        )
        .unwrap();
        let result: Result<String, _> = response.into_result();
        let error = result.unwrap_err();
        assert_eq!(error.class(), FailureClass::RateLimited);
        assert_eq!(error.to_string(), "Rate limited: RPC error -32005: limit exceeded");
    }

    #[test]
    fn test_null_result_deserializes_into_option() {
        let response: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        let receipt: Option<Value> = response.into_result().unwrap();
        assert!(receipt.is_none());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x10d4f").unwrap(), 68_943);
        assert_eq!(parse_quantity("1234").unwrap_err().class(), FailureClass::Fatal);
        assert!(parse_quantity("0xzz").is_err());
    }
}
