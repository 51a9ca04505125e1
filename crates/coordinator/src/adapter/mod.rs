//! Transport adapters.
//!
//! Caller operations speak HTTP or JSON-RPC; the coordinator only understands
//! [`OperationError`](crate::errors::OperationError). The helpers here map
//! transport outcomes into that taxonomy at the boundary, so the core never
//! looks at status codes or error strings.
//!
//! - `http` - Status-code, `Retry-After` and `reqwest` error classification
//! - `rpc` - JSON-RPC 2.0 envelope, error-code classification and `rpc_call`

mod http;
mod rpc;

pub use http::{check_response, parse_retry_after, parse_retry_after_value};
pub use rpc::{parse_quantity, rpc_call, RpcErrorObject, RpcRequest, RpcResponse};
