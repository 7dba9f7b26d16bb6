//! Token Registry (§4.1): `(network, asset_address) → {symbol, decimals, is_stablecoin}`.
//!
//! Seeded at process start from a static table of well-known EVM network/asset
//! pairs, the same mainnets and USDC deployments a facilitator binary in this
//! ecosystem would configure. Entries discovered only through a tool's own
//! [`crate::registry::PricingEntry`] rows are tolerated at lookup-miss: the
//! caller still gets a usable requirement, just without stablecoin-aware
//! ordering (§4.5, "Unknown token" boundary behavior).

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Registry lookup key: network name lowercased + asset address lowercased.
type TokenKey = (String, String);

/// Everything the gateway needs to know about a token deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Ticker symbol, e.g. `"USDC"`.
    pub symbol: String,
    /// Number of base-unit decimals.
    pub decimals: u8,
    /// Whether this asset should be preferred by the Requirements Builder (§4.5).
    pub is_stablecoin: bool,
    /// Optional logo URL for display purposes.
    pub logo_uri: Option<String>,
}

/// Raised when a lookup misses the registry.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("unknown token")]
pub struct UnknownToken;

/// A process-wide, append-only table of known tokens.
///
/// Construction is cheap and side-effect free; the expected usage is a single
/// instance built once at bootstrap and shared behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    entries: HashMap<TokenKey, TokenInfo>,
}

impl TokenRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with the well-known EVM mainnets/testnets
    /// and their canonical USDC deployments.
    #[must_use]
    pub fn with_known_networks() -> Self {
        let mut registry = Self::new();
        for (network, address, decimals) in known_usdc_deployments() {
            registry.register(
                network,
                address,
                TokenInfo {
                    symbol: "USDC".to_owned(),
                    decimals,
                    is_stablecoin: true,
                    logo_uri: None,
                },
            );
        }
        registry
    }

    /// Registers (or overwrites) an entry.
    pub fn register(&mut self, network: impl Into<String>, address: impl AsRef<str>, info: TokenInfo) {
        let key = Self::key(&network.into(), address.as_ref());
        self.entries.insert(key, info);
    }

    /// Looks up a token by network name and asset address.
    ///
    /// Matching is case-insensitive on both components.
    #[must_use]
    pub fn lookup(&self, network: &str, address: &str) -> Option<&TokenInfo> {
        self.entries.get(&Self::key(network, address))
    }

    fn key(network: &str, address: &str) -> TokenKey {
        (network.to_lowercase(), address.to_lowercase())
    }

    /// Converts a human-readable decimal amount into a base-units integer string.
    ///
    /// # Errors
    ///
    /// Returns an error if `human` is not a valid decimal.
    pub fn to_base_units(human: &str, decimals: u8) -> Result<String, rust_decimal::Error> {
        let mut value: Decimal = human.parse()?;
        value.rescale(u32::from(decimals));
        Ok(value.mantissa().to_string())
    }

    /// Converts a base-units integer string into a human-readable decimal string.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_units` is not a valid integer or `decimals`
    /// exceeds the maximum representable scale.
    pub fn from_base_units(base_units: &str, decimals: u8) -> Result<String, rust_decimal::Error> {
        let mut value: Decimal = base_units.parse()?;
        value
            .set_scale(u32::from(decimals))
            .map_err(|_| rust_decimal::Error::ScaleExceedsMaximumPrecision(decimals.into()))?;
        Ok(value.normalize().to_string())
    }
}

/// `(network, address, decimals)` triples for the canonical USDC deployments
/// this gateway knows about out of the box.
fn known_usdc_deployments() -> Vec<(&'static str, &'static str, u8)> {
    vec![
        ("base", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", 6),
        ("base-sepolia", "0x036CbD53842c5426634e7929541eC2318f3dCF7e", 6),
        ("polygon", "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359", 6),
        ("polygon-amoy", "0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582", 6),
        ("avalanche", "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E", 6),
        ("avalanche-fuji", "0x5425890298aed601595a70AB815c96711a31Bc65", 6),
        ("ethereum", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 6),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = TokenRegistry::with_known_networks();
        let lower = registry
            .lookup("base-sepolia", "0x036cbd53842c5426634e7929541ec2318f3dcf7e")
            .unwrap();
        let mixed = registry
            .lookup("Base-Sepolia", "0x036CbD53842c5426634e7929541eC2318f3dCF7e")
            .unwrap();
        assert_eq!(lower, mixed);
        assert!(lower.is_stablecoin);
        assert_eq!(lower.decimals, 6);
    }

    #[test]
    fn unknown_token_lookup_misses_without_panicking() {
        let registry = TokenRegistry::new();
        assert!(registry.lookup("base", "0xdeadbeef").is_none());
    }

    #[test]
    fn base_units_round_trip() {
        let base = TokenRegistry::to_base_units("1.5", 6).unwrap();
        assert_eq!(base, "1500000");
        let human = TokenRegistry::from_base_units(&base, 6).unwrap();
        assert_eq!(human, "1.5");
    }

    #[test]
    fn base_units_round_trip_zero_fraction() {
        let base = TokenRegistry::to_base_units("100", 6).unwrap();
        assert_eq!(base, "100000000");
    }
}
