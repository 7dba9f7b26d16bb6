//! Buyer-side scheme client trait and payment candidate selection.
//!
//! A [`SchemeClient`] turns a [`PaymentRequired`] response into zero or more
//! [`PaymentCandidate`]s it knows how to satisfy. A [`PaymentSelector`] then
//! picks one candidate to actually sign and send.

use std::future::Future;
use std::pin::Pin;

use crate::chain::ChainId;
use crate::proto::PaymentRequired;

/// Errors that can occur while a client prepares or signs a payment.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Signing the payment authorization failed.
    #[error("failed to sign payment: {0}")]
    SigningError(String),
    /// The 402 response could not be parsed into a usable payment option.
    #[error("failed to parse payment requirements: {0}")]
    ParseError(String),
    /// Serializing the signed payload failed.
    #[error("failed to encode payment payload: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A parsed payment option a [`SchemeClient`] is able to satisfy.
///
/// This is the common type used for comparing candidates across schemes and
/// chains before committing to one, independent of scheme-specific wire
/// formats.
#[derive(Debug)]
pub struct PaymentCandidate {
    /// The chain this candidate pays on.
    pub chain_id: ChainId,
    /// The token asset address, as a string (format is chain-family specific).
    pub asset: String,
    /// The payment amount, in base units, as a decimal string.
    pub amount: String,
    /// The scheme name (e.g., `"exact"`).
    pub scheme: String,
    /// The recipient address, as a string.
    pub pay_to: String,
    /// Produces the signed, base64-encoded payment payload for this candidate.
    pub signer: Box<dyn PaymentCandidateSigner>,
}

/// Signs a single [`PaymentCandidate`], producing the wire-ready payload.
pub trait PaymentCandidateSigner: Send + Sync {
    /// Signs the payment and returns the base64-encoded `X-Payment` header value.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if signing or encoding fails.
    fn sign_payment(&self) -> Pin<Box<dyn Future<Output = Result<String, ClientError>> + Send + '_>>;
}

/// Trait implemented by buyer-side scheme clients.
///
/// Each implementation handles a specific combination of protocol version,
/// chain namespace, and payment scheme (e.g., V2 EIP-155 "exact").
pub trait SchemeClient {
    /// Parses the accepted payment options, returning the candidates this
    /// client can satisfy.
    ///
    /// Implementations should ignore accepted entries they can't handle
    /// rather than erroring, since a 402 response may list options for
    /// schemes/chains this client doesn't support.
    fn accept(&self, payment_required: &PaymentRequired) -> Vec<PaymentCandidate>;
}

/// Chooses the best payment candidate from the options a buyer can satisfy.
pub trait PaymentSelector: Send + Sync {
    /// Selects a candidate, or `None` if none are acceptable.
    fn select<'a>(&self, candidates: &'a [PaymentCandidate]) -> Option<&'a PaymentCandidate>;
}

/// Selects the first candidate, in the order scheme clients produced them.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatch;

impl PaymentSelector for FirstMatch {
    fn select<'a>(&self, candidates: &'a [PaymentCandidate]) -> Option<&'a PaymentCandidate> {
        candidates.first()
    }
}

/// Prefers a specific chain, falling back to [`FirstMatch`] otherwise.
#[derive(Debug, Clone)]
pub struct PreferChain(pub ChainId);

impl PaymentSelector for PreferChain {
    fn select<'a>(&self, candidates: &'a [PaymentCandidate]) -> Option<&'a PaymentCandidate> {
        candidates
            .iter()
            .find(|c| c.chain_id == self.0)
            .or_else(|| candidates.first())
    }
}

/// Policy describing which candidates a buyer is willing to pay.
///
/// Unlike [`PaymentSelector`], which picks *one* candidate, a policy filters
/// the set of candidates a selector is allowed to choose from.
pub trait PaymentPolicy: Send + Sync {
    /// Returns `true` if the candidate is acceptable under this policy.
    fn allows(&self, candidate: &PaymentCandidate) -> bool;
}

/// Rejects candidates whose amount, parsed as a base-unit integer, exceeds
/// the configured ceiling.
#[derive(Debug, Clone, Copy)]
pub struct MaxAmount(pub u128);

impl PaymentPolicy for MaxAmount {
    fn allows(&self, candidate: &PaymentCandidate) -> bool {
        candidate
            .amount
            .parse::<u128>()
            .is_ok_and(|amount| amount <= self.0)
    }
}
