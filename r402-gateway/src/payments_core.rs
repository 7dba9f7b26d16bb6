//! Payments Core (§4.6): the state machine that decides whether a
//! `tools/call` may proceed, and drives it through verify/settle.
//!
//! This is the hardest subsystem in the gateway, so it is kept deliberately
//! free of any HTTP or JSON-RPC concern — it only knows about requirements,
//! payloads, and its three collaborators (Facilitator, Payment Store,
//! Signing Strategies), the same separation this ecosystem's own
//! payment-wrapping middleware keeps from its transport layer so it can be
//! exercised against in-memory fakes.

use std::sync::Arc;

use uuid::Uuid;

use crate::codec::{self, MalformedPaymentHeader, PaymentPayload, UnixTimestamp};
use crate::error::{AsGatewayProblem, ErrorCategory};
use crate::facilitator::{FacilitatorClient, FacilitatorClientError, SettleResponse, VerifyResponse};
use crate::registry::PricingEntry;
use crate::requirements::{self, BuildRequirementsInput, PaymentRequirements};
use crate::signing::SigningStrategyChain;
use crate::store::{PaymentRecord, PaymentStore, StoreError};
use crate::token_registry::TokenRegistry;

/// Payments Core's view of the Facilitator Client: just `verify`/`settle`, so
/// the state machine can be exercised against an in-memory fake in tests
/// instead of a live facilitator (§4.3, `r402::facilitator::Facilitator`'s own
/// dyn-compatible shape, adapted to this crate's `async_trait` convention).
#[async_trait::async_trait]
pub trait Facilitator: Send + Sync {
    /// See [`FacilitatorClient::verify`].
    async fn verify(
        &self,
        network: &str,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorClientError>;

    /// See [`FacilitatorClient::settle`].
    async fn settle(
        &self,
        network: &str,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorClientError>;
}

#[async_trait::async_trait]
impl Facilitator for FacilitatorClient {
    async fn verify(
        &self,
        network: &str,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorClientError> {
        self.verify(network, payload, requirements).await
    }

    async fn settle(
        &self,
        network: &str,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorClientError> {
        self.settle(network, payload, requirements).await
    }
}

/// Payments Core's view of the Payment Store: just the four operations
/// `handle_paid_call`/`settle` actually drive, so the state machine can be
/// exercised against an in-memory fake in tests instead of a live Postgres
/// pool (§4.4).
#[async_trait::async_trait]
pub trait PaymentLedger: Send + Sync {
    /// See [`PaymentStore::insert_pending`].
    async fn insert_pending(
        &self,
        tool_id: Uuid,
        signature: &str,
        payer_address: Option<&str>,
        amount_raw: &str,
        network: &str,
    ) -> Result<(PaymentRecord, bool), StoreError>;

    /// See [`PaymentStore::find_by_signature`].
    async fn find_by_signature(&self, signature: &str) -> Result<Option<PaymentRecord>, StoreError>;

    /// See [`PaymentStore::mark_completed`].
    async fn mark_completed(
        &self,
        signature: &str,
        transaction_hash: &str,
    ) -> Result<PaymentRecord, StoreError>;

    /// See [`PaymentStore::mark_failed`].
    async fn mark_failed(&self, signature: &str) -> Result<PaymentRecord, StoreError>;
}

#[async_trait::async_trait]
impl PaymentLedger for PaymentStore {
    async fn insert_pending(
        &self,
        tool_id: Uuid,
        signature: &str,
        payer_address: Option<&str>,
        amount_raw: &str,
        network: &str,
    ) -> Result<(PaymentRecord, bool), StoreError> {
        self.insert_pending(tool_id, signature, payer_address, amount_raw, network)
            .await
    }

    async fn find_by_signature(&self, signature: &str) -> Result<Option<PaymentRecord>, StoreError> {
        self.find_by_signature(signature).await
    }

    async fn mark_completed(
        &self,
        signature: &str,
        transaction_hash: &str,
    ) -> Result<PaymentRecord, StoreError> {
        self.mark_completed(signature, transaction_hash).await
    }

    async fn mark_failed(&self, signature: &str) -> Result<PaymentRecord, StoreError> {
        self.mark_failed(signature).await
    }
}

/// Why a call could not proceed (§4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The `X-PAYMENT` header did not decode.
    Malformed(String),
    /// No active pricing entry matches the header's network.
    NoMatchingRequirement,
    /// The facilitator rejected the payment at `verify` time.
    InvalidPayment(String),
    /// `value` is less than the selected requirement's `max_amount_required`.
    Underpayment,
    /// The header's network does not match the selected requirement's network.
    WrongNetwork,
    /// `valid_before` is not strictly after the current time at verify time
    /// (§8 invariant 4, no grace period: `valid_before == now` is expired).
    Expired,
    /// The same signature is already being processed by another in-flight call.
    InFlight,
    /// Settlement failed after the upstream call completed.
    SettleFailed(String),
    /// The upstream call failed after payment was already settled.
    UpstreamGone {
        /// The transaction hash of the already-completed settlement, so the
        /// client can safely retry with the same `X-PAYMENT` header.
        transaction_hash: String,
    },
}

/// The outcome of a single `handle_paid_call` invocation (§4.6).
#[derive(Debug, Clone)]
pub enum Outcome {
    /// No usable `X-PAYMENT` header and no signing strategy could produce
    /// one; the client must pay and retry.
    PaymentRequired(Vec<PaymentRequirements>),
    /// Payment verified and recorded; the caller may now invoke the upstream
    /// tool and must call [`PaymentsCore::settle`] once it returns.
    Proceed(Uuid),
    /// A prior identical signature was already `completed`; idempotent
    /// replay, no forwarding needed, settlement already happened (§4.6).
    Settled(Uuid),
    /// Terminal failure; no upstream call should be made.
    Failed(FailureReason),
}

/// The result of driving a proceeded call through settlement.
#[derive(Debug, Clone)]
pub enum SettledOutcome {
    /// Settlement succeeded; `transaction_hash` may be surfaced in
    /// `X-PAYMENT-RESPONSE`.
    Settled {
        /// On-chain transaction hash.
        transaction_hash: String,
    },
    /// Settlement failed; the record is now `failed`.
    Failed(FailureReason),
}

/// Errors Payments Core itself can raise (as opposed to [`FailureReason`],
/// which represents a *business* outcome, not an error).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PaymentsCoreError {
    /// The Payment Store failed.
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    /// The Facilitator Client failed.
    #[error(transparent)]
    Facilitator(#[from] crate::facilitator::FacilitatorClientError),
    /// No requirement could be built because the tool has no active pricing.
    #[error("tool has no active pricing")]
    NoActivePricing,
}

impl AsGatewayProblem for PaymentsCoreError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::Facilitator(e) => e.category(),
            Self::NoActivePricing => ErrorCategory::Internal,
        }
    }

    fn error_reason(&self) -> &'static str {
        match self {
            Self::Store(e) => e.error_reason(),
            Self::Facilitator(e) => e.error_reason(),
            Self::NoActivePricing => "no_active_pricing",
        }
    }
}

/// Everything [`PaymentsCore::handle_paid_call`] needs about the call in progress.
#[derive(Debug, Clone)]
pub struct PaidCallRequest<'a> {
    /// The tool being invoked.
    pub tool_id: Uuid,
    /// Stable resource URL for the requirements list, e.g. `"mcp://srv1/tools/paidTool"`.
    pub resource: &'a str,
    /// Human-readable tool description.
    pub description: &'a str,
    /// The server's receiver address.
    pub pay_to: &'a str,
    /// Active pricing entries for the tool.
    pub pricing: &'a [PricingEntry],
    /// Raw `X-PAYMENT` header value, if the client sent one.
    pub payment_header: Option<&'a str>,
    /// Identity resolved from `X-API-KEY`, used for managed-wallet auto-signing (§4.7).
    pub user_id: Option<&'a str>,
    /// A network preference carried over from a prior 402 retry, if any.
    pub preferred_network: Option<&'a str>,
}

const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 60;

/// The payment state machine (§4.6). Depends only on its collaborators, so
/// it can be exercised with in-memory fakes in tests.
#[derive(Clone)]
pub struct PaymentsCore {
    store: Arc<dyn PaymentLedger>,
    facilitator: Arc<dyn Facilitator>,
    tokens: TokenRegistry,
}

impl PaymentsCore {
    /// Wires up the state machine over its three collaborators.
    #[must_use]
    pub fn new(
        store: impl PaymentLedger + 'static,
        facilitator: impl Facilitator + 'static,
        tokens: TokenRegistry,
    ) -> Self {
        Self {
            store: Arc::new(store),
            facilitator: Arc::new(facilitator),
            tokens,
        }
    }

    /// Runs the §4.6 decision tree for one `tools/call` attempt.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentsCoreError`] for failures that are the gateway's own
    /// fault (store/facilitator transport errors); business rejections come
    /// back as `Ok(Outcome::Failed(..))`.
    #[tracing::instrument(skip(self, request, signing))]
    pub async fn handle_paid_call(
        &self,
        request: &PaidCallRequest<'_>,
        signing: &SigningStrategyChain,
    ) -> Result<Outcome, PaymentsCoreError> {
        let requirements_list = self.build_requirements_list(request)?;
        if requirements_list.is_empty() {
            return Err(PaymentsCoreError::NoActivePricing);
        }

        let payload = match self.resolve_payload(request, &requirements_list, signing).await {
            Resolved::Payload(payload) => payload,
            Resolved::PaymentRequired => return Ok(Outcome::PaymentRequired(requirements_list)),
            Resolved::Malformed(reason) => {
                return Ok(Outcome::Failed(FailureReason::Malformed(reason.to_string())));
            }
        };

        let Some(requirement) = requirements_list
            .iter()
            .find(|r| r.network == payload.network)
        else {
            return Ok(Outcome::Failed(FailureReason::WrongNetwork));
        };

        if let Ok(value) = payload.payload.authorization.value.parse::<u128>()
            && let Ok(required) = requirement.max_amount_required.parse::<u128>()
            && value < required
        {
            return Ok(Outcome::Failed(FailureReason::Underpayment));
        }

        if is_expired(payload.payload.authorization.valid_before, UnixTimestamp::now()) {
            return Ok(Outcome::Failed(FailureReason::Expired));
        }

        let verify_response = self
            .facilitator
            .verify(&payload.network, &payload, requirement)
            .await?;
        if !verify_response.success {
            return Ok(Outcome::Failed(FailureReason::InvalidPayment(
                verify_response
                    .error_reason
                    .unwrap_or_else(|| "verification_failed".to_owned()),
            )));
        }

        let (record, was_inserted) = self
            .store
            .insert_pending(
                request.tool_id,
                &payload.payload.signature,
                verify_response.payer.as_deref(),
                &payload.payload.authorization.value,
                &payload.network,
            )
            .await?;

        Ok(classify_existing_record(record, was_inserted))
    }

    /// Drives a `Proceed`d call through settlement once the upstream tool
    /// call has returned a non-error result (§4.6 ordering invariant).
    ///
    /// # Errors
    ///
    /// Returns [`PaymentsCoreError`] on a store or facilitator failure that
    /// is the gateway's own fault, as opposed to a settlement rejection
    /// (surfaced as `Ok(SettledOutcome::Failed(..))`).
    #[tracing::instrument(skip(self, payload, requirement))]
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirements,
    ) -> Result<SettledOutcome, PaymentsCoreError> {
        let settle_response = self.facilitator.settle(&payload.network, payload, requirement).await?;

        if settle_response.success {
            let Some(transaction_hash) = settle_response.transaction else {
                return Ok(SettledOutcome::Failed(FailureReason::SettleFailed(
                    "facilitator reported success with no transaction hash".to_owned(),
                )));
            };
            let record = self
                .store
                .mark_completed(&payload.payload.signature, &transaction_hash)
                .await;
            return match record {
                Ok(_) => Ok(SettledOutcome::Settled { transaction_hash }),
                // A second settle racing the first already-completed transition:
                // treat it as completed using the existing record's hash (§4.6 replay handling).
                Err(crate::store::StoreError::NotPending) => {
                    match self.store.find_by_signature(&payload.payload.signature).await? {
                        Some(existing) if existing.status == crate::store::PaymentStatus::Completed => {
                            Ok(SettledOutcome::Settled {
                                transaction_hash: existing.transaction_hash.unwrap_or(transaction_hash),
                            })
                        }
                        _ => Ok(SettledOutcome::Failed(FailureReason::SettleFailed(
                            "replay".to_owned(),
                        ))),
                    }
                }
                Err(e) => Err(e.into()),
            };
        }

        if settle_response.error_reason.as_deref() == Some("replay") {
            if let Some(existing) = self.store.find_by_signature(&payload.payload.signature).await?
                && existing.status == crate::store::PaymentStatus::Completed
                && let Some(transaction_hash) = existing.transaction_hash
            {
                return Ok(SettledOutcome::Settled { transaction_hash });
            }
            return Ok(SettledOutcome::Failed(FailureReason::SettleFailed(
                "replay".to_owned(),
            )));
        }

        self.store.mark_failed(&payload.payload.signature).await?;
        Ok(SettledOutcome::Failed(FailureReason::SettleFailed(
            settle_response
                .error_reason
                .unwrap_or_else(|| "settlement_failed".to_owned()),
        )))
    }

    fn build_requirements_list(
        &self,
        request: &PaidCallRequest<'_>,
    ) -> Result<Vec<PaymentRequirements>, PaymentsCoreError> {
        let input = BuildRequirementsInput {
            resource: request.resource,
            description: request.description,
            pay_to: request.pay_to,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            pricing: request.pricing,
            preferred_network: request.preferred_network,
        };
        Ok(requirements::build_requirements(&input, &self.tokens))
    }

    async fn resolve_payload(
        &self,
        request: &PaidCallRequest<'_>,
        requirements_list: &[PaymentRequirements],
        signing: &SigningStrategyChain,
    ) -> Resolved {
        if let Some(header) = request.payment_header {
            return match codec::decode(header) {
                Ok(payload) => Resolved::Payload(payload),
                Err(reason) => Resolved::Malformed(reason),
            };
        }

        let Some(user_id) = request.user_id else {
            return Resolved::PaymentRequired;
        };
        let Some(requirement) = requirements_list.first() else {
            return Resolved::PaymentRequired;
        };

        match signing.sign(user_id, requirement).await {
            Ok(payload) => Resolved::Payload(payload),
            Err(_) => Resolved::PaymentRequired,
        }
    }
}

enum Resolved {
    Payload(PaymentPayload),
    PaymentRequired,
    Malformed(MalformedPaymentHeader),
}

/// Whether a payload's `valid_before` boundary has passed at `now` (§8
/// invariant 4, no grace period): `valid_before == now` is already expired,
/// only `valid_before > now` is still live.
fn is_expired(valid_before: UnixTimestamp, now: UnixTimestamp) -> bool {
    valid_before <= now
}

/// Maps a freshly inserted-or-fetched [`PaymentRecord`] onto an [`Outcome`]
/// (§4.6's `InsertPending` branch table). A free function, not a method,
/// since it is pure over its two arguments and easy to exercise without a
/// live store or facilitator.
fn classify_existing_record(record: PaymentRecord, was_inserted: bool) -> Outcome {
    use crate::store::PaymentStatus::{Completed, Failed, Pending};
    match (record.status, was_inserted) {
        (Pending, true) => Outcome::Proceed(record.id),
        (Pending, false) => Outcome::Failed(FailureReason::InFlight),
        (Completed, _) => Outcome::Settled(record.id),
        (Failed, _) => Outcome::Failed(FailureReason::SettleFailed(
            "payment previously failed".to_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_record(status: crate::store::PaymentStatus) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            tool_id: Uuid::nil(),
            signature: "0xsig".to_owned(),
            payer_address: None,
            amount_raw: "100".to_owned(),
            network: "base-sepolia".to_owned(),
            status,
            transaction_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn underpayment_is_detected_before_facilitator_call() {
        // Smoke-check the pure parse/compare logic `handle_paid_call` relies
        // on before ever reaching the facilitator.
        let value: u128 = "50".parse().unwrap();
        let required: u128 = "100".parse().unwrap();
        assert!(value < required);
    }

    #[test]
    fn valid_before_equal_to_now_is_expired() {
        let now = UnixTimestamp::from_secs(1_700_000_000);
        assert!(is_expired(now, now));
    }

    #[test]
    fn valid_before_one_second_after_now_is_not_expired() {
        let now = UnixTimestamp::from_secs(1_700_000_000);
        let valid_before = UnixTimestamp::from_secs(now.as_secs() + 1);
        assert!(!is_expired(valid_before, now));
    }

    #[test]
    fn fresh_pending_insert_proceeds() {
        let record = sample_record(crate::store::PaymentStatus::Pending);
        let id = record.id;
        assert!(matches!(classify_existing_record(record, true), Outcome::Proceed(r) if r == id));
    }

    #[test]
    fn race_lost_pending_insert_is_in_flight() {
        let record = sample_record(crate::store::PaymentStatus::Pending);
        assert!(matches!(
            classify_existing_record(record, false),
            Outcome::Failed(FailureReason::InFlight)
        ));
    }

    #[test]
    fn completed_record_is_idempotent_settled() {
        let record = sample_record(crate::store::PaymentStatus::Completed);
        let id = record.id;
        assert!(matches!(classify_existing_record(record, false), Outcome::Settled(r) if r == id));
    }

    #[test]
    fn failed_record_stays_failed() {
        let record = sample_record(crate::store::PaymentStatus::Failed);
        assert!(matches!(
            classify_existing_record(record, false),
            Outcome::Failed(FailureReason::SettleFailed(_))
        ));
    }
}
