#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Payment-gated reverse proxy for Model Context Protocol (MCP) servers.
//!
//! Upstream MCP servers expose tool-invocation endpoints over a streamable
//! HTTP/JSON-RPC transport. This gateway sits in front of them, inspects every
//! `tools/call` request, and enforces per-tool micropayment settlement using
//! an x402-flavored wire protocol built on EIP-3009 `transferWithAuthorization`.
//!
//! # Modules
//!
//! - [`token_registry`] — network/asset → symbol/decimals lookups and base-unit math.
//! - [`codec`] — the `X-PAYMENT` / `X-PAYMENT-RESPONSE` wire codec.
//! - [`facilitator`] — client for an external verify/settle facilitator service.
//! - [`store`] — durable payment record persistence and replay guarding.
//! - [`registry`] — the server/tool/pricing catalog.
//! - [`requirements`] — builds the ordered `PaymentRequirements` list for a tool.
//! - [`payments_core`] — the payment state machine (`handle_paid_call`).
//! - [`signing`] — pluggable payer-side signing strategies.
//! - [`upstream`] — pooled streamable-HTTP MCP client sessions.
//! - [`mcp_proxy`] — the `POST /mcp/{server_id}` JSON-RPC proxy handlers.
//! - [`validation`] — the standalone `/validate` endpoint.
//! - [`ping`] — the `/ping` SDK heartbeat/registration endpoint.
//! - [`auth`] — API key lookup and authentication faults.
//! - [`config`] — process configuration.
//! - [`error`] — the shared error taxonomy.
//! - [`shutdown`] — graceful shutdown signal handling.

pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod facilitator;
pub mod jsonrpc;
pub mod mcp_proxy;
pub mod payments_core;
pub mod ping;
pub mod registry;
pub mod requirements;
pub mod shutdown;
pub mod signing;
pub mod store;
pub mod token_registry;
pub mod upstream;
pub mod validation;

pub use error::GatewayError;
