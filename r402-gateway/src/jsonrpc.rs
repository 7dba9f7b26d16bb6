//! Minimal JSON-RPC 2.0 message types shared by the MCP Proxy (§4.9) and
//! Upstream Connector (§4.8).
//!
//! The gateway never needs a full JSON-RPC library: it only inspects enough
//! of each message to find `method`/`id`/`params.name`, and otherwise passes
//! bytes through unchanged. These types exist so that inspection is a typed
//! `serde_json::from_slice` instead of ad-hoc `Value` poking.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC request `id`: a string, a number, or (for notifications) absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// A numeric id.
    Number(i64),
    /// A string id.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// An inbound JSON-RPC request or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Absent for notifications (`tools/list`, `initialize` never omit it in practice, but
    /// the proxy tolerates either shape).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// The JSON-RPC method name, e.g. `"tools/call"`.
    pub method: String,
    /// Method parameters, method-shape-dependent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// The tool name to invoke.
    pub name: String,
    /// Arguments passed to the tool, tool-schema-dependent.
    #[serde(default)]
    pub arguments: Value,
}

/// A JSON-RPC success or error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Echoes the originating request's id.
    pub id: Option<RequestId>,
    /// Present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// The `error` object of a JSON-RPC error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Application-defined error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Structured error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC error code reserved for "payment required" within this gateway's
/// own code space. Distinct from the `402`/`_meta`-based convention some MCP
/// SDKs use for in-band payment signaling and from the `-40200`/`-40201`
/// convention other x402/MCP integrations use; this gateway speaks raw
/// JSON-RPC over HTTP headers rather than a `_meta` envelope, so it defines
/// its own value rather than colliding with either.
pub const PAYMENT_REQUIRED_CODE: i32 = -32402;

/// The `data` payload of a payment-required JSON-RPC error (§4.9, §6): the
/// x402 handshake a client SDK recognizes and retries against with `X-PAYMENT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequiredData {
    /// Always `1`.
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    /// The acceptable ways to pay for this call.
    pub accepts: Vec<crate::requirements::PaymentRequirements>,
}

impl RpcResponse {
    /// Builds a success response echoing `id`.
    #[must_use]
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds a payment-required error response (§4.9, §6).
    #[must_use]
    pub fn payment_required(id: Option<RequestId>, accepts: Vec<crate::requirements::PaymentRequirements>) -> Self {
        let data = PaymentRequiredData {
            x402_version: 1,
            accepts,
        };
        Self {
            jsonrpc: "2.0".to_owned(),
            id,
            result: None,
            error: Some(RpcError {
                code: PAYMENT_REQUIRED_CODE,
                message: "Payment required".to_owned(),
                data: serde_json::to_value(data).ok(),
            }),
        }
    }

    /// Builds a generic error response.
    #[must_use]
    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_owned(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Builds a generic error response with a structured `data` payload.
    #[must_use]
    pub fn error_with_data(id: Option<RequestId>, code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_owned(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: Some(data),
            }),
        }
    }
}

/// Extracts the `{name, arguments}` pair from a `tools/call` request's `params`.
///
/// # Errors
///
/// Returns `None` if `params` is missing or does not match the expected shape.
#[must_use]
pub fn parse_call_tool_params(request: &RpcRequest) -> Option<CallToolParams> {
    let params = request.params.as_ref()?;
    serde_json::from_value(params.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tools_call_params() {
        let request: RpcRequest = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {}},
        }))
        .unwrap();
        let params = parse_call_tool_params(&request).unwrap();
        assert_eq!(params.name, "echo");
    }

    #[test]
    fn non_call_tool_params_do_not_parse_as_call_tool_params() {
        let request: RpcRequest = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/list",
            "params": {},
        }))
        .unwrap();
        assert!(parse_call_tool_params(&request).is_none());
    }

    #[test]
    fn payment_required_response_embeds_accepts() {
        let response = RpcResponse::payment_required(Some(RequestId::Number(1)), vec![]);
        let error = response.error.unwrap();
        assert_eq!(error.code, PAYMENT_REQUIRED_CODE);
        assert!(error.data.is_some());
    }
}
