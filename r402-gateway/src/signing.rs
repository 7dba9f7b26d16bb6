//! Signing Strategies (§4.7): how the gateway obtains a signed
//! `X-PAYMENT` payload on behalf of a user who has delegated a managed
//! wallet, without ever touching a user-held private key.
//!
//! The EIP-712 signing itself is not reimplemented here — it is delegated
//! straight to this ecosystem's own `sign_erc3009_authorization`, the same
//! routine its CLI/SDK clients use to sign ERC-3009 `transferWithAuthorization`
//! payments. This module only adds the priority list and the conversion
//! from alloy's on-chain types to this gateway's wire [`PaymentPayload`].

use alloy_primitives::{Address, U256};
use alloy_signer_local::PrivateKeySigner;
use r402_evm::exact::client::{Eip3009SigningParams, SignerLike, sign_erc3009_authorization};

use crate::codec::{Authorization, PaymentPayload, Payload, UnixTimestamp};
use crate::error::{AsGatewayProblem, ErrorCategory};
use crate::requirements::PaymentRequirements;

/// Errors raised while attempting to produce a signed payment on the user's behalf.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SigningError {
    /// No configured strategy can sign for this requirement (e.g. no managed
    /// wallet on file for the user, or the requirement's asset address is malformed).
    #[error("no signing strategy available for this requirement")]
    NoStrategyAvailable,
    /// The underlying EIP-712 signing call failed.
    #[error("signing failed: {0}")]
    SignerFailure(String),
    /// A requirement field could not be parsed into the on-chain type it represents.
    #[error("malformed requirement field: {0}")]
    MalformedRequirement(String),
    /// The signing call did not complete within `GatewayConfig::SIGNING_TIMEOUT` (§5).
    #[error("signing timed out")]
    Timeout,
}

impl AsGatewayProblem for SigningError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::NoStrategyAvailable => ErrorCategory::ClientFault,
            Self::SignerFailure(_) | Self::MalformedRequirement(_) | Self::Timeout => {
                ErrorCategory::Internal
            }
        }
    }

    fn error_reason(&self) -> &'static str {
        match self {
            Self::NoStrategyAvailable => "no_signing_strategy",
            Self::SignerFailure(_) => "signing_failed",
            Self::MalformedRequirement(_) => "internal",
            Self::Timeout => "signing_timeout",
        }
    }
}

/// The chain ID a network name resolves to, needed for the EIP-712 domain.
///
/// # Errors
///
/// Returns [`SigningError::MalformedRequirement`] for a network name this
/// gateway has no chain ID mapping for.
pub fn chain_id_for_network(network: &str) -> Result<u64, SigningError> {
    match network {
        "base" => Ok(8453),
        "base-sepolia" => Ok(84532),
        "polygon" => Ok(137),
        "polygon-amoy" => Ok(80002),
        "avalanche" => Ok(43114),
        "avalanche-fuji" => Ok(43113),
        "ethereum" => Ok(1),
        other => Err(SigningError::MalformedRequirement(format!(
            "unknown network {other}"
        ))),
    }
}

/// One way the gateway can produce a signed payment: given a requirement,
/// either decline (`can_sign` false) or produce a fully signed payload.
#[async_trait::async_trait]
pub trait SigningStrategy: Send + Sync {
    /// Whether this strategy can act for `user_id` against `requirement`.
    fn can_sign(&self, user_id: &str, requirement: &PaymentRequirements) -> bool;

    /// Produces a signed [`PaymentPayload`] satisfying `requirement`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError`] if signing fails or the requirement cannot
    /// be satisfied by this strategy.
    async fn sign(
        &self,
        user_id: &str,
        requirement: &PaymentRequirements,
    ) -> Result<PaymentPayload, SigningError>;
}

/// Supplies the private key material for a user's custodial wallet.
///
/// Kept as a trait (rather than a concrete lookup) so the gateway can swap
/// in a KMS-backed implementation without touching [`ManagedWalletStrategy`]
/// (delegated custody is explicitly out of scope for this crate's own
/// implementation — see Non-goals — but the seam is still provided).
pub trait ManagedWalletProvider: Send + Sync {
    /// Returns the signer for `user_id`, if one is on file.
    fn signer_for(&self, user_id: &str) -> Option<PrivateKeySigner>;
}

/// Auto-signs using a user's managed (custodial) wallet, when one exists.
pub struct ManagedWalletStrategy<P> {
    provider: P,
}

impl<P: ManagedWalletProvider> ManagedWalletStrategy<P> {
    /// Wraps a [`ManagedWalletProvider`].
    #[must_use]
    pub const fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl<P: ManagedWalletProvider> SigningStrategy for ManagedWalletStrategy<P> {
    fn can_sign(&self, user_id: &str, _requirement: &PaymentRequirements) -> bool {
        self.provider.signer_for(user_id).is_some()
    }

    async fn sign(
        &self,
        user_id: &str,
        requirement: &PaymentRequirements,
    ) -> Result<PaymentPayload, SigningError> {
        let signer = self
            .provider
            .signer_for(user_id)
            .ok_or(SigningError::NoStrategyAvailable)?;

        let chain_id = chain_id_for_network(&requirement.network)?;
        let asset_address: Address = requirement
            .asset
            .parse()
            .map_err(|_| SigningError::MalformedRequirement("asset address".to_owned()))?;
        let pay_to: Address = requirement
            .pay_to
            .parse()
            .map_err(|_| SigningError::MalformedRequirement("pay_to address".to_owned()))?;
        let amount: U256 = requirement
            .max_amount_required
            .parse()
            .map_err(|_| SigningError::MalformedRequirement("max_amount_required".to_owned()))?;

        let params = Eip3009SigningParams {
            chain_id,
            asset_address,
            pay_to,
            amount,
            max_timeout_seconds: requirement.max_timeout_seconds,
            extra: Some(r402_evm::exact::PaymentRequirementsExtra {
                name: requirement.extra.name.clone(),
                version: requirement.extra.version.clone(),
                asset_transfer_method: None,
            }),
        };

        let eip3009_payload = tokio::time::timeout(
            crate::config::GatewayConfig::SIGNING_TIMEOUT,
            sign_erc3009_authorization(&signer, &params),
        )
        .await
        .map_err(|_| SigningError::Timeout)?
        .map_err(|e| SigningError::SignerFailure(e.to_string()))?;

        Ok(PaymentPayload {
            x402_version: 1,
            scheme: "exact".to_owned(),
            network: requirement.network.clone(),
            payload: Payload {
                signature: eip3009_payload.signature.to_string(),
                authorization: Authorization {
                    from: eip3009_payload.authorization.from.to_string(),
                    to: eip3009_payload.authorization.to.to_string(),
                    value: eip3009_payload.authorization.value.0.to_string(),
                    valid_after: UnixTimestamp::from_secs(
                        eip3009_payload.authorization.valid_after.as_secs(),
                    ),
                    valid_before: UnixTimestamp::from_secs(
                        eip3009_payload.authorization.valid_before.as_secs(),
                    ),
                    nonce: eip3009_payload.authorization.nonce.to_string(),
                },
            },
        })
    }
}

/// A priority-ordered list of [`SigningStrategy`]s; the first one willing to
/// sign wins.
#[derive(Default)]
pub struct SigningStrategyChain {
    strategies: Vec<Box<dyn SigningStrategy>>,
}

impl SigningStrategyChain {
    /// Builds an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a strategy at the end of the priority list.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Box<dyn SigningStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Signs using the first strategy in priority order that can act for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::NoStrategyAvailable`] if none can.
    pub async fn sign(
        &self,
        user_id: &str,
        requirement: &PaymentRequirements,
    ) -> Result<PaymentPayload, SigningError> {
        for strategy in &self.strategies {
            if strategy.can_sign(user_id, requirement) {
                return strategy.sign(user_id, requirement).await;
            }
        }
        Err(SigningError::NoStrategyAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoWallets;
    impl ManagedWalletProvider for NoWallets {
        fn signer_for(&self, _user_id: &str) -> Option<PrivateKeySigner> {
            None
        }
    }

    fn sample_requirement() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_owned(),
            network: "base-sepolia".to_owned(),
            max_amount_required: "100".to_owned(),
            resource: "mcp://tool".to_owned(),
            description: "tool".to_owned(),
            mime_type: String::new(),
            pay_to: format!("0x{}", "22".repeat(20)),
            max_timeout_seconds: 60,
            asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_owned(),
            extra: crate::requirements::RequirementsExtra {
                name: "USD Coin".to_owned(),
                version: "2".to_owned(),
            },
        }
    }

    #[test]
    fn known_networks_resolve_chain_ids() {
        assert_eq!(chain_id_for_network("base").unwrap(), 8453);
        assert_eq!(chain_id_for_network("base-sepolia").unwrap(), 84532);
    }

    #[test]
    fn unknown_network_is_malformed() {
        assert!(chain_id_for_network("moonbeam").is_err());
    }

    #[tokio::test]
    async fn chain_with_no_capable_strategy_fails() {
        let chain = SigningStrategyChain::new()
            .with_strategy(Box::new(ManagedWalletStrategy::new(NoWallets)));
        let err = chain.sign("user-1", &sample_requirement()).await.unwrap_err();
        assert!(matches!(err, SigningError::NoStrategyAvailable));
    }

    #[test]
    fn timeout_maps_to_internal_category() {
        assert_eq!(SigningError::Timeout.category(), ErrorCategory::Internal);
        assert_eq!(SigningError::Timeout.error_reason(), "signing_timeout");
    }
}
