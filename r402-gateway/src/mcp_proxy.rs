//! MCP Proxy (§4.9): `POST /mcp/{server_id}` and `GET /mcp/{server_id}`.
//!
//! A thin `axum` adapter: translate the inbound JSON-RPC envelope and
//! `X-PAYMENT`/`X-API-KEY` headers into calls against the Tool Registry,
//! Payments Core, and Upstream Connector, then translate the result back
//! into an HTTP response carrying `X-PAYMENT-RESPONSE` where applicable.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use serde_json::Value;

use crate::auth::{ApiKeyStore, ClientIdentity};
use crate::codec::{self, PaymentPayload, SettlementResponse};
use crate::error::GatewayError;
use crate::jsonrpc::{RequestId, RpcRequest, RpcResponse};
use crate::payments_core::{FailureReason, Outcome, PaidCallRequest, PaymentsCore, SettledOutcome};
use crate::registry::{RegisteredServer, ServerCatalog, ToolRegistry};
use crate::requirements::PaymentRequirements;
use crate::signing::SigningStrategyChain;
use crate::store::PaymentStore;
use crate::upstream::{DEFAULT_CALL_TIMEOUT, JsonRpcFragment, UpstreamConnector, build_auth_headers};

/// Shared, cheaply-cloneable application state handed to every axum handler.
#[derive(Clone)]
pub struct GatewayState {
    /// Tool/server catalog.
    pub registry: ToolRegistry,
    /// Durable payment ledger, used directly by the Validation Service (§4.11)
    /// which never calls the facilitator.
    pub store: PaymentStore,
    /// Payment state machine.
    pub payments: Arc<PaymentsCore>,
    /// Upstream MCP session pool.
    pub upstream: UpstreamConnector,
    /// Managed-wallet signing strategy chain.
    pub signing: Arc<SigningStrategyChain>,
    /// API key lookup.
    pub api_keys: ApiKeyStore,
}

const X_PAYMENT: &str = "x-payment";
const X_PAYMENT_RESPONSE: &str = "x-payment-response";
const X_API_KEY: &str = "x-api-key";
const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 60;

/// `POST /mcp/{server_id}`: the core JSON-RPC proxy (§4.9).
///
/// # Errors
///
/// Returns [`GatewayError`] if the server/tool lookup, payment handling, or
/// upstream call fails in a way that is the gateway's own fault; ordinary
/// payment rejections are encoded as a `200` JSON-RPC error body, matching
/// how a JSON-RPC transport represents application-level failures.
pub async fn handle_call(
    State(state): State<GatewayState>,
    Path(server_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RpcRequest>,
) -> Result<Response, GatewayError> {
    let catalog = state.registry.get_catalog(&server_id).await?;

    if request.method != "tools/call" {
        return forward_passthrough(&state, &server_id, &catalog, &request).await;
    }

    let Some(call) = crate::jsonrpc::parse_call_tool_params(&request) else {
        return Ok(Json(RpcResponse::error(request.id, -32602, "invalid params")).into_response());
    };

    let Some(tool) = catalog.find_tool(&call.name) else {
        return Ok(Json(RpcResponse::error(request.id, -32601, "tool not found")).into_response());
    };

    if !tool.is_monetized {
        return forward_single(&state, &server_id, &catalog.server, &request).await;
    }

    let pricing = state.registry.active_pricing(tool.tool_id).await?;
    let identity = resolve_identity(&state, &headers).await?;
    let user_id = match &identity {
        ClientIdentity::ApiKey { user_id } => Some(user_id.to_string()),
        ClientIdentity::Anonymous => None,
    };
    let payment_header = header_str(&headers, X_PAYMENT);
    let resource = format!("mcp://{server_id}/tools/{}", tool.name);

    let paid_request = PaidCallRequest {
        tool_id: tool.tool_id,
        resource: &resource,
        description: &tool.description,
        pay_to: &catalog.server.receiver_address,
        pricing: &pricing,
        payment_header: payment_header.as_deref(),
        user_id: user_id.as_deref(),
        preferred_network: None,
    };

    match state.payments.handle_paid_call(&paid_request, &state.signing).await? {
        Outcome::PaymentRequired(accepts) => Ok((
            StatusCode::PAYMENT_REQUIRED,
            Json(RpcResponse::payment_required(request.id, accepts)),
        )
            .into_response()),
        Outcome::Failed(reason) => {
            let status = status_for_failure(&reason);
            Ok((status, Json(failure_response(request.id, &reason))).into_response())
        }
        // Idempotent replay: the client already paid; the gateway has no
        // record of whether the upstream side effect already ran, so it
        // forwards again and leaves upstream-side idempotency to the tool.
        Outcome::Settled(_) => forward_single(&state, &server_id, &catalog.server, &request).await,
        Outcome::Proceed(_) => {
            handle_proceeded_call(&state, &server_id, &catalog, &request, &pricing, &payment_header).await
        }
    }
}

/// Forwards the `tools/call` upstream, then settles and attaches
/// `X-PAYMENT-RESPONSE` once the upstream result comes back (§4.6 ordering:
/// settle only after a non-error upstream result).
async fn handle_proceeded_call(
    state: &GatewayState,
    server_id: &str,
    catalog: &ServerCatalog,
    request: &RpcRequest,
    pricing: &[crate::registry::PricingEntry],
    payment_header: &Option<String>,
) -> Result<Response, GatewayError> {
    let Some(header) = payment_header else {
        return forward_single(state, server_id, &catalog.server, request).await;
    };
    let Ok(payload) = codec::decode(header) else {
        return forward_single(state, server_id, &catalog.server, request).await;
    };
    let Some(requirement) = matching_requirement(&payload, &catalog.server.receiver_address, pricing) else {
        return forward_single(state, server_id, &catalog.server, request).await;
    };

    let timeout = std::time::Duration::from_secs(requirement.max_timeout_seconds);
    let fragments = forward_to_upstream(state, server_id, &catalog.server, request, timeout).await?;
    let settlement = settle_and_encode(state, &payload, &requirement).await?;

    let mut response = Json(first_result(fragments)).into_response();
    if let Ok(value) = HeaderValue::from_str(&settlement) {
        response.headers_mut().insert(X_PAYMENT_RESPONSE, value);
    }
    Ok(response)
}

/// `GET /mcp/{server_id}`: the SSE channel for server-initiated notifications (§4.9, §6).
///
/// This gateway does not originate unsolicited server notifications of its
/// own; the channel stays open and idle, matching the "optional counterpart"
/// framing in §6 rather than a full bidirectional transport.
pub async fn handle_notifications(
    State(_state): State<GatewayState>,
    Path(_server_id): Path<String>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>> {
    Sse::new(futures_util::stream::empty())
}

async fn forward_passthrough(
    state: &GatewayState,
    server_id: &str,
    catalog: &ServerCatalog,
    request: &RpcRequest,
) -> Result<Response, GatewayError> {
    let fragments = forward_to_upstream(state, server_id, &catalog.server, request, DEFAULT_CALL_TIMEOUT).await?;
    if request.method == "tools/list" {
        return Ok(Json(annotate_tools_list(fragments, state, catalog).await).into_response());
    }
    Ok(Json(first_result(fragments)).into_response())
}

async fn forward_single(
    state: &GatewayState,
    server_id: &str,
    server: &RegisteredServer,
    request: &RpcRequest,
) -> Result<Response, GatewayError> {
    let fragments = forward_to_upstream(state, server_id, server, request, DEFAULT_CALL_TIMEOUT).await?;
    Ok(Json(first_result(fragments)).into_response())
}

fn first_result(fragments: Vec<JsonRpcFragment>) -> Value {
    fragments.into_iter().next().map_or(Value::Null, |f| f.0)
}

async fn resolve_identity(state: &GatewayState, headers: &HeaderMap) -> Result<ClientIdentity, GatewayError> {
    match header_str(headers, X_API_KEY) {
        Some(key) => {
            let user_id = state
                .api_keys
                .authenticate(&key)
                .await
                .map_err(|e| GatewayError::Auth(e.to_string()))?;
            Ok(ClientIdentity::ApiKey { user_id })
        }
        None => Ok(ClientIdentity::Anonymous),
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
}

async fn forward_to_upstream(
    state: &GatewayState,
    server_id: &str,
    server: &RegisteredServer,
    request: &RpcRequest,
    timeout: std::time::Duration,
) -> Result<Vec<JsonRpcFragment>, GatewayError> {
    let auth_headers = if server.require_auth {
        build_auth_headers(&server.auth_headers)
    } else {
        HeaderMap::new()
    };
    state
        .upstream
        .call(server_id, &server.mcp_origin, &auth_headers, request, timeout)
        .await
        .map_err(GatewayError::from)
}

/// Rewrites `tools/list` results so paid tools' descriptions carry a price
/// annotation (§4.9 Open Question decision: rewrite on the fly rather than
/// requiring a bespoke catalog-endpoint lookup).
async fn annotate_tools_list(fragments: Vec<JsonRpcFragment>, state: &GatewayState, catalog: &ServerCatalog) -> Value {
    let mut value = first_result(fragments);
    let Some(tools) = value
        .get_mut("result")
        .and_then(|r| r.get_mut("tools"))
        .and_then(Value::as_array_mut)
    else {
        return value;
    };
    for entry in tools.iter_mut() {
        let Some(name) = entry.get("name").and_then(Value::as_str).map(str::to_owned) else {
            continue;
        };
        let Some(tool) = catalog.find_tool(&name).filter(|t| t.is_monetized) else {
            continue;
        };
        let Ok(pricing) = state.registry.active_pricing(tool.tool_id).await else {
            continue;
        };
        let Some(cheapest) = pricing.first() else { continue };
        if let Some(description) = entry.get_mut("description") {
            let current = description.as_str().unwrap_or_default();
            *description = Value::String(format!(
                "{current} (paid: {} base units on {})",
                cheapest.max_amount_required_raw, cheapest.network
            ));
        }
    }
    value
}

/// Finds the requirement matching a decoded payment's network, the same
/// selection rule Payments Core uses internally, so the proxy can settle
/// against the requirement the client actually paid under.
fn matching_requirement(
    payload: &PaymentPayload,
    pay_to: &str,
    pricing: &[crate::registry::PricingEntry],
) -> Option<PaymentRequirements> {
    let tokens = crate::token_registry::TokenRegistry::with_known_networks();
    let input = crate::requirements::BuildRequirementsInput {
        resource: "",
        description: "",
        pay_to,
        max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
        pricing,
        preferred_network: Some(payload.network.as_str()),
    };
    crate::requirements::build_requirements(&input, &tokens)
        .into_iter()
        .find(|r| r.network == payload.network)
}

async fn settle_and_encode(
    state: &GatewayState,
    payload: &PaymentPayload,
    requirement: &PaymentRequirements,
) -> Result<String, GatewayError> {
    let outcome = state.payments.settle(payload, requirement).await?;
    let response = match outcome {
        SettledOutcome::Settled { transaction_hash } => SettlementResponse {
            success: true,
            error_reason: None,
            payer: Some(payload.payload.authorization.from.clone()),
            transaction: transaction_hash,
            network: payload.network.clone(),
        },
        SettledOutcome::Failed(reason) => SettlementResponse {
            success: false,
            error_reason: Some(failure_reason_code(&reason).to_owned()),
            payer: Some(payload.payload.authorization.from.clone()),
            transaction: String::new(),
            network: payload.network.clone(),
        },
    };
    Ok(codec::encode_settlement_response(&response))
}

fn failure_response(id: Option<RequestId>, reason: &FailureReason) -> RpcResponse {
    RpcResponse::error_with_data(
        id,
        -32000,
        "payment failed",
        serde_json::json!({ "errorReason": failure_reason_code(reason) }),
    )
}

/// Maps a payment-failure reason to the HTTP status §7's taxonomy assigns
/// it: the ClientFault payment-wire failures share `402` with
/// `PaymentRequired` (§6 status table), `InFlight` is a `Conflict` (409),
/// and `UpstreamGone` is the `Upstream` category (502).
fn status_for_failure(reason: &FailureReason) -> StatusCode {
    match reason {
        FailureReason::Malformed(_)
        | FailureReason::NoMatchingRequirement
        | FailureReason::InvalidPayment(_)
        | FailureReason::Underpayment
        | FailureReason::WrongNetwork
        | FailureReason::Expired
        | FailureReason::SettleFailed(_) => StatusCode::PAYMENT_REQUIRED,
        FailureReason::InFlight => StatusCode::CONFLICT,
        FailureReason::UpstreamGone { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn failure_reason_code(reason: &FailureReason) -> &'static str {
    match reason {
        FailureReason::Malformed(_) => "malformed_payment",
        FailureReason::NoMatchingRequirement => "no_matching_requirement",
        FailureReason::InvalidPayment(_) => "invalid_payment",
        FailureReason::Underpayment => "underpayment",
        FailureReason::WrongNetwork => "wrong_network",
        FailureReason::Expired => "expired",
        FailureReason::InFlight => "in_flight",
        FailureReason::SettleFailed(_) => "settle_failed",
        FailureReason::UpstreamGone { .. } => "upstream_gone",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_codes_are_snake_case() {
        assert_eq!(failure_reason_code(&FailureReason::Underpayment), "underpayment");
        assert_eq!(failure_reason_code(&FailureReason::WrongNetwork), "wrong_network");
        assert_eq!(failure_reason_code(&FailureReason::Expired), "expired");
        assert_eq!(failure_reason_code(&FailureReason::InFlight), "in_flight");
    }

    #[test]
    fn underpayment_and_wrong_network_surface_as_payment_required() {
        assert_eq!(status_for_failure(&FailureReason::Underpayment), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(status_for_failure(&FailureReason::WrongNetwork), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn in_flight_is_a_conflict() {
        assert_eq!(status_for_failure(&FailureReason::InFlight), StatusCode::CONFLICT);
    }
}
