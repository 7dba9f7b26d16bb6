//! Wire-format and chain-identification types shared across the EIP-155 schemes.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use r402::chain::ChainId;

/// A raw numeric EIP-155 chain ID (e.g., `8453` for Base, `137` for Polygon).
///
/// This is the plain-integer form used by the network constant tables in
/// [`crate::networks`]; it is distinct from [`Eip155ChainReference`], which
/// interoperates with the core CAIP-2 [`ChainId`].
pub type RawChainId = u64;

/// Formats a raw chain ID as a CAIP-2 identifier.
///
/// Example: `caip2(8453)` returns `"eip155:8453"`.
#[must_use]
pub fn caip2(chain_id: RawChainId) -> String {
    format!("eip155:{chain_id}")
}

/// Parses a CAIP-2 identifier into a raw EIP-155 chain ID.
///
/// Returns `None` if the input is not a valid `eip155:`-prefixed string.
#[must_use]
pub fn parse_caip2(caip: &str) -> Option<RawChainId> {
    caip.strip_prefix("eip155:").and_then(|s| s.parse().ok())
}

/// A token deployment on an EVM network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDeployment {
    /// Contract address.
    pub address: Address,
    /// Number of decimals (e.g., 6 for USDC).
    pub decimals: u8,
}

/// Asset information for a token on a specific network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    /// Contract address.
    pub address: Address,
    /// Number of decimals.
    pub decimals: u8,
    /// EIP-712 domain name for the token contract.
    pub name: String,
    /// EIP-712 domain version for the token contract.
    pub version: String,
}

/// The EIP-712 domain parameters (name + version) for a token deployment.
///
/// A narrower view of [`AssetInfo`] used where only the signing-domain
/// parameters are needed, independent of address/decimals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDeploymentEip712 {
    /// EIP-712 domain name (e.g., `"USD Coin"`).
    pub name: String,
    /// EIP-712 domain version (e.g., `"2"`).
    pub version: String,
}

impl From<&AssetInfo> for TokenDeploymentEip712 {
    fn from(asset: &AssetInfo) -> Self {
        Self {
            name: asset.name.clone(),
            version: asset.version.clone(),
        }
    }
}

/// Configuration for a known EVM network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// CAIP-2 network identifier (e.g., `"eip155:8453"`).
    pub network: String,
    /// EIP-155 chain ID.
    pub chain_id: RawChainId,
    /// Assets known on this network.
    pub assets: Vec<AssetInfo>,
}

impl NetworkConfig {
    /// Finds an asset by its contract address (case-insensitive).
    #[must_use]
    pub fn find_asset(&self, address: Address) -> Option<&AssetInfo> {
        self.assets.iter().find(|a| a.address == address)
    }
}

/// A numeric EIP-155 chain reference, interoperable with the core CAIP-2
/// [`ChainId`] used by provider registries and facilitator code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Eip155ChainReference(RawChainId);

impl Eip155ChainReference {
    /// Wraps a raw numeric chain ID.
    #[must_use]
    pub const fn new(chain_id: RawChainId) -> Self {
        Self(chain_id)
    }

    /// Returns the wrapped numeric chain ID.
    #[must_use]
    pub const fn inner(self) -> RawChainId {
        self.0
    }
}

impl fmt::Display for Eip155ChainReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eip155:{}", self.0)
    }
}

impl From<Eip155ChainReference> for ChainId {
    fn from(reference: Eip155ChainReference) -> Self {
        Self::new("eip155", reference.0.to_string())
    }
}

/// Error returned when a [`ChainId`] does not name a valid EIP-155 chain.
#[derive(Debug, thiserror::Error)]
#[error("not a valid eip155 chain id: {0}")]
pub struct Eip155ChainReferenceError(String);

impl TryFrom<&ChainId> for Eip155ChainReference {
    type Error = Eip155ChainReferenceError;

    fn try_from(value: &ChainId) -> Result<Self, Self::Error> {
        if value.namespace() != "eip155" {
            return Err(Eip155ChainReferenceError(value.to_string()));
        }
        value
            .reference()
            .parse()
            .map(Self)
            .map_err(|_| Eip155ChainReferenceError(value.to_string()))
    }
}

/// A checksummed (EIP-55) EVM address, serialized as its checksummed hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChecksummedAddress(pub Address);

impl ChecksummedAddress {
    /// Wraps an address.
    #[must_use]
    pub const fn new(address: Address) -> Self {
        Self(address)
    }
}

impl From<Address> for ChecksummedAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl From<ChecksummedAddress> for Address {
    fn from(value: ChecksummedAddress) -> Self {
        value.0
    }
}

impl fmt::Display for ChecksummedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_checksum(None))
    }
}

impl FromStr for ChecksummedAddress {
    type Err = <Address as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl Serialize for ChecksummedAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChecksummedAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A base-unit token amount, serialized as a decimal integer string.
///
/// Matches the wire format of payment authorizations, where `value`,
/// `validAfter`, and `validBefore` are decimal strings rather than JSON
/// numbers (to avoid precision loss for amounts beyond `u53`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenAmount(pub U256);

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenAmount {
    type Err = <U256 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_str(s).map(Self)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        U256::from_str(&s).map(Self).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eip155_chain_reference_roundtrips_through_chain_id() {
        let reference = Eip155ChainReference::new(8453);
        let chain_id: ChainId = reference.into();
        assert_eq!(chain_id.to_string(), "eip155:8453");
        assert_eq!(Eip155ChainReference::try_from(&chain_id).unwrap(), reference);
    }

    #[test]
    fn eip155_chain_reference_rejects_other_namespaces() {
        let chain_id = ChainId::new("solana", "mainnet");
        assert!(Eip155ChainReference::try_from(&chain_id).is_err());
    }

    #[test]
    fn token_amount_serializes_as_decimal_string() {
        let amount = TokenAmount::from(U256::from(1_000_000u64));
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"1000000\"");
        let round_tripped: TokenAmount = serde_json::from_str("\"1000000\"").unwrap();
        assert_eq!(round_tripped, amount);
    }

    #[test]
    fn checksummed_address_serializes_checksummed() {
        let addr: Address = "0x036cbd53842c5426634e7929541ec2318f3dcf7e"
            .parse()
            .unwrap();
        let checksummed = ChecksummedAddress::from(addr);
        let json = serde_json::to_string(&checksummed).unwrap();
        assert_eq!(json, "\"0x036CbD53842c5426634e7929541eC2318f3dCF7e\"");
    }
}
