#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EIP-155 (EVM) chain support for the x402 payment protocol.
//!
//! This crate provides implementations of the x402 payment protocol for EVM-compatible
//! blockchains using the EIP-155 chain ID standard. It implements the V2 (CAIP-2) "exact"
//! payment scheme based on ERC-3009 `transferWithAuthorization`, with Permit2 as a fallback
//! transfer mechanism for tokens that don't support ERC-3009.
//!
//! # Features
//!
//! - **CAIP-2 Chain IDs**: Addresses chains as `eip155:<chain-id>` (e.g., `eip155:8453`)
//! - **ERC-3009 Payments**: Gasless token transfers using `transferWithAuthorization`
//! - **Permit2 Fallback**: Universal transfer path for ERC-20s without ERC-3009
//! - **Smart Wallet Support**: EIP-1271 for deployed wallets, EIP-6492 for counterfactual wallets
//! - **Multiple Signers**: Round-robin signer selection for load distribution
//! - **Nonce Management**: Automatic nonce tracking with pending transaction awareness
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`chain`] - Core EVM chain types, providers, and configuration
//! - [`exact`] - EIP-155 "exact" payment scheme
//!
//! # Feature Flags
//!
//! - `server` - Server-side price tag generation
//! - `client` - Client-side payment signing
//! - `facilitator` - Facilitator-side payment verification and settlement
//! - `telemetry` - `OpenTelemetry` tracing support
//!
//! # Usage Example
//!
//! ## Client: Signing a Payment
//!
//! ```ignore
//! use r402_evm::Eip155ExactClient;
//! use alloy_signer_local::PrivateKeySigner;
//!
//! let signer = PrivateKeySigner::random();
//! let client = Eip155ExactClient::new(signer);
//!
//! // Use client to sign payment candidates
//! let candidates = client.accept(&payment_required);
//! ```

pub mod chain;
pub mod exact;

mod networks;
pub use networks::*;

pub use exact::Eip155Exact;

#[cfg(feature = "client")]
pub use exact::client::Eip155ExactClient;
