//! Ping Ingestor (§4.12): `POST /ping`.
//!
//! An authenticated SDK instance periodically reports the URLs it believes
//! its MCP server is reachable at. The gateway probes them, reuses the
//! Upstream Connector's session/initialize logic to call `tools/list`, and
//! reconciles the result against the Tool Registry: new tools are created
//! unmonetized (`free`), tools no longer advertised are marked `inactive`,
//! and existing pricing is left untouched.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::ClientIdentity;
use crate::error::GatewayError;
use crate::jsonrpc::{RequestId, RpcRequest};
use crate::mcp_proxy::GatewayState;
use crate::registry::{RegisteredServer, RegisteredTool, Status};
use crate::upstream::DEFAULT_CALL_TIMEOUT;

/// Request body for `POST /ping`.
#[derive(Debug, Clone, Deserialize)]
pub struct PingRequest {
    /// Stable identifier for the reporting server, chosen by the SDK.
    pub server_id: String,
    /// Candidate base URLs the SDK believes its MCP server answers at.
    pub detected_urls: Vec<String>,
    /// Address that should receive settled payments for this server's tools.
    pub receiver_address: String,
    /// Arbitrary platform/runtime metadata; accepted and ignored today.
    #[serde(default)]
    pub platform_env: serde_json::Value,
}

/// Response body for `POST /ping`.
#[derive(Debug, Clone, Serialize)]
pub struct PingResponse {
    /// The server this ping reconciled.
    pub server_id: String,
    /// The reachable URL the gateway picked from `detectedUrls`, if any.
    pub mcp_origin: Option<String>,
    /// Tool names newly created in `free` state.
    pub added_tools: Vec<String>,
    /// Tool names marked `inactive` because they're no longer advertised.
    pub removed_tools: Vec<String>,
}

/// `POST /ping` (§4.12).
///
/// # Errors
///
/// Returns [`GatewayError::Auth`] if `X-API-KEY` is missing or invalid, or a
/// wrapped registry/upstream error if reconciliation fails.
#[tracing::instrument(skip(state, headers, request))]
pub async fn ping(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(request): Json<PingRequest>,
) -> Result<Json<PingResponse>, GatewayError> {
    authenticate(&state, &headers).await?;

    let Some(mcp_origin) = probe_reachable(&state, &request.detected_urls).await else {
        return Ok(Json(PingResponse {
            server_id: request.server_id,
            mcp_origin: None,
            added_tools: Vec::new(),
            removed_tools: Vec::new(),
        }));
    };

    let server = RegisteredServer {
        server_id: request.server_id.clone(),
        mcp_origin: mcp_origin.clone(),
        receiver_address: request.receiver_address,
        require_auth: false,
        auth_headers: serde_json::json!({}),
        status: Status::Active,
        creator_id: None,
    };
    state.registry.register_server(&server).await?;

    let tools_list_request = RpcRequest {
        jsonrpc: "2.0".to_owned(),
        id: Some(RequestId::Number(1)),
        method: "tools/list".to_owned(),
        params: None,
    };
    let fragments = state
        .upstream
        .call(
            &request.server_id,
            &mcp_origin,
            &HeaderMap::new(),
            &tools_list_request,
            DEFAULT_CALL_TIMEOUT,
        )
        .await?;

    let advertised_names = fragments
        .into_iter()
        .filter_map(|f| f.0.get("result")?.get("tools")?.as_array().cloned())
        .flatten()
        .filter_map(|tool| tool.get("name")?.as_str().map(str::to_owned))
        .collect::<Vec<_>>();

    let catalog = state.registry.get_catalog(&request.server_id).await?;
    let existing_names: Vec<String> = catalog.tools.iter().map(|t| t.name.clone()).collect();

    let mut added = Vec::new();
    for name in &advertised_names {
        if existing_names.contains(name) {
            continue;
        }
        state
            .registry
            .upsert_tool(&RegisteredTool {
                tool_id: Uuid::new_v4(),
                server_id: request.server_id.clone(),
                name: name.clone(),
                description: String::new(),
                input_schema: serde_json::json!({}),
                is_monetized: false,
                status: Status::Active,
            })
            .await?;
        added.push(name.clone());
    }

    let mut removed = Vec::new();
    for tool in &catalog.tools {
        if advertised_names.contains(&tool.name) {
            continue;
        }
        state.registry.deactivate_tool(&request.server_id, &tool.name).await?;
        removed.push(tool.name.clone());
    }

    Ok(Json(PingResponse {
        server_id: request.server_id,
        mcp_origin: Some(mcp_origin),
        added_tools: added,
        removed_tools: removed,
    }))
}

async fn authenticate(state: &GatewayState, headers: &HeaderMap) -> Result<ClientIdentity, GatewayError> {
    let key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::Auth("missing API key".to_owned()))?;
    let user_id = state
        .api_keys
        .authenticate(key)
        .await
        .map_err(|e| GatewayError::Auth(e.to_string()))?;
    Ok(ClientIdentity::ApiKey { user_id })
}

/// Picks the first of `detected_urls` that answers a bare `initialize` call
/// through the Upstream Connector, appending `/mcp` the same way the
/// Upstream Connector resolves its own endpoint.
async fn probe_reachable(state: &GatewayState, detected_urls: &[String]) -> Option<String> {
    for url in detected_urls {
        let probe = RpcRequest {
            jsonrpc: "2.0".to_owned(),
            id: Some(RequestId::Number(0)),
            method: "ping".to_owned(),
            params: None,
        };
        let reachable = state
            .upstream
            .call(url, url, &HeaderMap::new(), &probe, DEFAULT_CALL_TIMEOUT)
            .await
            .is_ok();
        // The probe's throwaway session is keyed by URL, distinct from the
        // `server_id`-keyed session used once reconciliation proceeds; evict
        // it immediately rather than waiting on idle eviction.
        state.upstream.evict(url);
        if reachable {
            return Some(url.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_response_serializes_empty_tool_lists() {
        let response = PingResponse {
            server_id: "srv1".to_owned(),
            mcp_origin: None,
            added_tools: Vec::new(),
            removed_tools: Vec::new(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["added_tools"], serde_json::json!([]));
    }
}
