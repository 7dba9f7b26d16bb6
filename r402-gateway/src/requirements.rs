//! Requirements Builder (§4.5): turns a tool's active pricing rows into an
//! ordered, non-empty list of [`PaymentRequirements`] a client can act on.
//!
//! A pure function of its inputs — no I/O, easily covered by literal fixture
//! data — following the same stable-partition reordering style as this
//! ecosystem's own `prefer_network`/`prefer_scheme` client-side policies.

use serde::{Deserialize, Serialize};

use crate::registry::PricingEntry;
use crate::token_registry::TokenRegistry;

/// The `extra` object EIP-712 signers need: the ERC-20's `name`/`version` for
/// domain separation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementsExtra {
    /// The asset's EIP-712 domain name, e.g. `"USD Coin"`.
    pub name: String,
    /// The asset's EIP-712 domain version, e.g. `"2"`.
    pub version: String,
}

/// One way a client may pay for a tool call (§3, §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequirements {
    /// Always `"exact"`.
    pub scheme: String,
    /// Network name, e.g. `"base-sepolia"`.
    pub network: String,
    /// Base-units amount required, decimal string.
    pub max_amount_required: String,
    /// Stable URL identifying the priced resource (the tool call).
    pub resource: String,
    /// Human-readable description of what is being purchased.
    pub description: String,
    /// MIME type of the resource's response, empty when not applicable.
    pub mime_type: String,
    /// The server's receiver address; payments settle here.
    pub pay_to: String,
    /// Seconds the client has to submit a valid `X-PAYMENT` header.
    pub max_timeout_seconds: u64,
    /// The ERC-20 contract address.
    pub asset: String,
    /// EIP-712 domain fields for the asset.
    pub extra: RequirementsExtra,
}

/// Input bundle for [`build_requirements`].
#[derive(Debug, Clone)]
pub struct BuildRequirementsInput<'a> {
    /// The tool's stable resource URL, e.g. `"mcp://srv1/tools/paidTool"`.
    pub resource: &'a str,
    /// Human-readable description to surface to the paying client.
    pub description: &'a str,
    /// The server's receiver address.
    pub pay_to: &'a str,
    /// Seconds a client has to act on a 402 before it expires.
    pub max_timeout_seconds: u64,
    /// Active pricing rows for the tool, any order.
    pub pricing: &'a [PricingEntry],
    /// Client's preferred network, if any (e.g. from a prior 402's retry).
    pub preferred_network: Option<&'a str>,
}

/// Default EIP-712 domain fields used when the Token Registry has no richer
/// metadata for an asset (unknown-token boundary behavior, §4.5/§8).
const UNKNOWN_TOKEN_EXTRA_NAME: &str = "";
const UNKNOWN_TOKEN_EXTRA_VERSION: &str = "1";

/// Builds the ordered [`PaymentRequirements`] list for one tool call.
///
/// Ordering (§4.5): preferred network first, then USDC/stablecoins, then
/// `network == "base"`, then `created_at` ascending. Implemented as a stable
/// partition applied once per rule, weakest rule first, so the
/// highest-priority rule is applied last and ends up dominant.
///
/// # Panics
///
/// Never panics; `input.pricing` being empty yields an empty `Vec` (callers
/// are expected to treat an empty tool as having no payable price, which is
/// itself the §3 invariant violation — not handled by this pure function).
#[must_use]
pub fn build_requirements(
    input: &BuildRequirementsInput<'_>,
    tokens: &TokenRegistry,
) -> Vec<PaymentRequirements> {
    let mut rows: Vec<&PricingEntry> = input.pricing.iter().collect();
    rows.sort_by_key(|r| r.created_at);

    stable_partition(&mut rows, |r| r.network == "base");
    stable_partition(&mut rows, |r| {
        tokens
            .lookup(&r.network, &r.asset_address)
            .is_some_and(|t| t.is_stablecoin)
    });
    if let Some(preferred) = input.preferred_network {
        stable_partition(&mut rows, |r| r.network == preferred);
    }

    rows.into_iter()
        .map(|row| to_requirements(input, row, tokens))
        .collect()
}

fn to_requirements(
    input: &BuildRequirementsInput<'_>,
    row: &PricingEntry,
    tokens: &TokenRegistry,
) -> PaymentRequirements {
    let extra = tokens
        .lookup(&row.network, &row.asset_address)
        .map(|t| RequirementsExtra {
            name: t.symbol.clone(),
            version: "2".to_owned(),
        })
        .unwrap_or(RequirementsExtra {
            name: UNKNOWN_TOKEN_EXTRA_NAME.to_owned(),
            version: UNKNOWN_TOKEN_EXTRA_VERSION.to_owned(),
        });

    PaymentRequirements {
        scheme: "exact".to_owned(),
        network: row.network.clone(),
        max_amount_required: row.max_amount_required_raw.clone(),
        resource: input.resource.to_owned(),
        description: input.description.to_owned(),
        mime_type: String::new(),
        pay_to: input.pay_to.to_owned(),
        max_timeout_seconds: input.max_timeout_seconds,
        asset: row.asset_address.clone(),
        extra,
    }
}

/// Moves every element matching `predicate` to the front, preserving the
/// relative order within each partition (a stable partition, not a sort).
fn stable_partition<T: Copy>(items: &mut Vec<T>, predicate: impl Fn(T) -> bool) {
    let mut matched = Vec::with_capacity(items.len());
    let mut rest = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        if predicate(item) {
            matched.push(item);
        } else {
            rest.push(item);
        }
    }
    matched.extend(rest);
    *items = matched;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PricingEntry;
    use crate::token_registry::TokenRegistry;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn entry(network: &str, asset: &str, seconds: i64) -> PricingEntry {
        PricingEntry {
            id: Uuid::new_v4(),
            tool_id: Uuid::nil(),
            max_amount_required_raw: "100000".to_owned(),
            token_decimals: 6,
            asset_address: asset.to_owned(),
            network: network.to_owned(),
            active: true,
            created_at: Utc.timestamp_opt(seconds, 0).unwrap(),
        }
    }

    fn base_input<'a>(pricing: &'a [PricingEntry]) -> BuildRequirementsInput<'a> {
        BuildRequirementsInput {
            resource: "mcp://srv1/tools/paidTool",
            description: "paidTool",
            pay_to: "0x2222222222222222222222222222222222222222",
            max_timeout_seconds: 60,
            pricing,
            preferred_network: None,
        }
    }

    #[test]
    fn non_empty_pricing_yields_non_empty_requirements() {
        let pricing = vec![entry("polygon", "0xnonstable", 1)];
        let tokens = TokenRegistry::with_known_networks();
        let result = build_requirements(&base_input(&pricing), &tokens);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn stablecoin_is_preferred_over_non_stablecoin() {
        let pricing = vec![
            entry("polygon", "0xnonstable", 1),
            entry(
                "polygon",
                "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
                2,
            ),
        ];
        let tokens = TokenRegistry::with_known_networks();
        let result = build_requirements(&base_input(&pricing), &tokens);
        assert_eq!(result[0].asset, "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359");
    }

    #[test]
    fn base_network_is_preferred_among_equal_stablecoin_status() {
        let pricing = vec![
            entry("polygon", "0xnonstable1", 1),
            entry("base", "0xnonstable2", 2),
        ];
        let tokens = TokenRegistry::new();
        let result = build_requirements(&base_input(&pricing), &tokens);
        assert_eq!(result[0].network, "base");
    }

    #[test]
    fn preferred_network_wins_over_stablecoin_and_base_rules() {
        let pricing = vec![
            entry(
                "base",
                "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                1,
            ),
            entry("avalanche-fuji", "0xnonstable", 2),
        ];
        let tokens = TokenRegistry::with_known_networks();
        let mut input = base_input(&pricing);
        input.preferred_network = Some("avalanche-fuji");
        let result = build_requirements(&input, &tokens);
        assert_eq!(result[0].network, "avalanche-fuji");
    }

    #[test]
    fn ties_fall_back_to_created_at_ascending() {
        let pricing = vec![entry("polygon", "0xa", 5), entry("polygon", "0xa", 1)];
        let tokens = TokenRegistry::new();
        let result = build_requirements(&base_input(&pricing), &tokens);
        assert_eq!(result[0].asset, "0xa");
        assert_eq!(result[0].max_amount_required, "100000");
        assert!(result[0] != result[1] || pricing[0].created_at != pricing[1].created_at);
    }

    #[test]
    fn unknown_token_gets_placeholder_extra_metadata() {
        let pricing = vec![entry("polygon", "0xdeadbeef", 1)];
        let tokens = TokenRegistry::new();
        let result = build_requirements(&base_input(&pricing), &tokens);
        assert_eq!(result[0].extra.name, "");
        assert_eq!(result[0].extra.version, "1");
    }
}
