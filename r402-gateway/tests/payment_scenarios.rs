//! End-to-end payment scenario tests (§6 S1-S7).
//!
//! S1 and the axum/JSON-RPC framing in S2-S7 live in the MCP Proxy, which is
//! wired directly to a live Postgres pool and exercised manually rather than
//! under `cargo test` (no `testcontainers`/`sqlx::test` convention exists
//! anywhere in this workspace). These tests instead drive the two
//! collaborators behind the proxy that *are* fake-able end to end -- Payments
//! Core, generic over `Facilitator`/`PaymentLedger`, and the Upstream
//! Connector, which has no database dependency at all -- against `wiremock`
//! fakes, reproducing the same literal request/response shapes S2-S7 specify.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_signer_local::PrivateKeySigner;
use chrono::Utc;
use r402_gateway::codec::{self, Authorization, PaymentPayload, Payload, UnixTimestamp};
use r402_gateway::facilitator::FacilitatorClient;
use r402_gateway::jsonrpc::{RequestId, RpcRequest};
use r402_gateway::payments_core::{FailureReason, Outcome, PaidCallRequest, PaymentLedger, PaymentsCore, SettledOutcome};
use r402_gateway::registry::PricingEntry;
use r402_gateway::signing::{ManagedWalletProvider, ManagedWalletStrategy, SigningStrategyChain};
use r402_gateway::store::{PaymentRecord, PaymentStatus, StoreError};
use r402_gateway::token_registry::TokenRegistry;
use r402_gateway::upstream::{DEFAULT_CALL_TIMEOUT, UpstreamConnector};
use reqwest::header::HeaderMap;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NETWORK: &str = "base-sepolia";
const ASSET: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";
const PAY_TO: &str = "0x0000000000000000000000000000000000000001";

/// In-memory stand-in for [`r402_gateway::store::PaymentStore`], keyed by
/// signature, mirroring its insert-or-fetch / `pending -> {completed,
/// failed}` state machine (§4.4) without a database.
#[derive(Default)]
struct FakeLedger {
    records: Mutex<HashMap<String, PaymentRecord>>,
}

#[async_trait::async_trait]
impl PaymentLedger for FakeLedger {
    async fn insert_pending(
        &self,
        tool_id: Uuid,
        signature: &str,
        payer_address: Option<&str>,
        amount_raw: &str,
        network: &str,
    ) -> Result<(PaymentRecord, bool), StoreError> {
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.get(signature) {
            return Ok((existing.clone(), false));
        }
        let record = PaymentRecord {
            id: Uuid::new_v4(),
            tool_id,
            signature: signature.to_owned(),
            payer_address: payer_address.map(str::to_owned),
            amount_raw: amount_raw.to_owned(),
            network: network.to_owned(),
            status: PaymentStatus::Pending,
            transaction_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        records.insert(signature.to_owned(), record.clone());
        Ok((record, true))
    }

    async fn find_by_signature(&self, signature: &str) -> Result<Option<PaymentRecord>, StoreError> {
        Ok(self.records.lock().unwrap().get(signature).cloned())
    }

    async fn mark_completed(&self, signature: &str, transaction_hash: &str) -> Result<PaymentRecord, StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(signature).ok_or(StoreError::NotFound)?;
        if record.status != PaymentStatus::Pending {
            return Err(StoreError::NotPending);
        }
        record.status = PaymentStatus::Completed;
        record.transaction_hash = Some(transaction_hash.to_owned());
        Ok(record.clone())
    }

    async fn mark_failed(&self, signature: &str) -> Result<PaymentRecord, StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(signature).ok_or(StoreError::NotFound)?;
        if record.status != PaymentStatus::Pending {
            return Err(StoreError::NotPending);
        }
        record.status = PaymentStatus::Failed;
        Ok(record.clone())
    }
}

fn pricing_entry() -> PricingEntry {
    PricingEntry {
        id: Uuid::new_v4(),
        tool_id: Uuid::nil(),
        max_amount_required_raw: "100".to_owned(),
        token_decimals: 6,
        asset_address: ASSET.to_owned(),
        network: NETWORK.to_owned(),
        active: true,
        created_at: Utc::now(),
    }
}

fn request<'a>(pricing: &'a [PricingEntry], payment_header: Option<&'a str>, user_id: Option<&'a str>) -> PaidCallRequest<'a> {
    PaidCallRequest {
        tool_id: Uuid::nil(),
        resource: "mcp://srv1/tools/paidTool",
        description: "paidTool",
        pay_to: PAY_TO,
        pricing,
        payment_header,
        user_id,
        preferred_network: None,
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn signed_payload(value: &str, network: &str) -> PaymentPayload {
    PaymentPayload {
        x402_version: 1,
        scheme: "exact".to_owned(),
        network: network.to_owned(),
        payload: Payload {
            signature: format!("0x{}", "ab".repeat(65)),
            authorization: Authorization {
                from: format!("0x{}", "11".repeat(20)),
                to: PAY_TO.to_owned(),
                value: value.to_owned(),
                valid_after: UnixTimestamp::from_secs(now_secs() - 600),
                valid_before: UnixTimestamp::from_secs(now_secs() + 60),
                nonce: format!("0x{}", "33".repeat(32)),
            },
        },
    }
}

/// Stands up a fake facilitator answering `verify`/`settle` for `NETWORK`.
async fn facilitator_mock(
    verify_success: bool,
    settle_success: bool,
    transaction: Option<&str>,
) -> (MockServer, FacilitatorClient) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{NETWORK}/verify")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": verify_success })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/{NETWORK}/settle")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": settle_success,
            "transaction": transaction,
        })))
        .mount(&server)
        .await;
    let client = FacilitatorClient::try_new(&server.uri()).unwrap();
    (server, client)
}

#[tokio::test]
async fn s2_paid_no_header_returns_payment_required() {
    let (_server, facilitator) = facilitator_mock(true, true, Some("0xabc")).await;
    let core = PaymentsCore::new(FakeLedger::default(), facilitator, TokenRegistry::with_known_networks());
    let signing = SigningStrategyChain::new();
    let pricing = vec![pricing_entry()];

    let outcome = core
        .handle_paid_call(&request(&pricing, None, None), &signing)
        .await
        .unwrap();

    let Outcome::PaymentRequired(accepts) = outcome else {
        panic!("expected PaymentRequired, got {outcome:?}");
    };
    assert_eq!(accepts.len(), 1);
    assert_eq!(accepts[0].network, NETWORK);
    assert_eq!(accepts[0].max_amount_required, "100");
    assert_eq!(accepts[0].asset, ASSET);
    assert_eq!(accepts[0].pay_to, PAY_TO);
}

#[tokio::test]
async fn s3_valid_payment_proceeds_and_settles() {
    let (_server, facilitator) = facilitator_mock(true, true, Some("0xabc")).await;
    let core = PaymentsCore::new(FakeLedger::default(), facilitator, TokenRegistry::with_known_networks());
    let signing = SigningStrategyChain::new();
    let pricing = vec![pricing_entry()];
    let payload = signed_payload("100", NETWORK);
    let header = codec::encode(&payload);

    let outcome = core
        .handle_paid_call(&request(&pricing, Some(&header), None), &signing)
        .await
        .unwrap();
    let Outcome::Proceed(_) = outcome else {
        panic!("expected Proceed, got {outcome:?}");
    };

    let requirement = pricing_requirement(&pricing);
    let settled = core.settle(&payload, &requirement).await.unwrap();
    let SettledOutcome::Settled { transaction_hash } = settled else {
        panic!("expected Settled, got {settled:?}");
    };
    assert_eq!(transaction_hash, "0xabc");
}

#[tokio::test]
async fn s4_replay_is_idempotent_settled() {
    let (_server, facilitator) = facilitator_mock(true, true, Some("0xabc")).await;
    let ledger = FakeLedger::default();
    let pricing = vec![pricing_entry()];
    let payload = signed_payload("100", NETWORK);
    let header = codec::encode(&payload);
    let signing = SigningStrategyChain::new();

    let core = PaymentsCore::new(ledger, facilitator, TokenRegistry::with_known_networks());
    let first = core
        .handle_paid_call(&request(&pricing, Some(&header), None), &signing)
        .await
        .unwrap();
    let Outcome::Proceed(id) = first else {
        panic!("expected Proceed on first presentation, got {first:?}");
    };
    core.settle(&payload, &pricing_requirement(&pricing)).await.unwrap();

    let replay = core
        .handle_paid_call(&request(&pricing, Some(&header), None), &signing)
        .await
        .unwrap();
    let Outcome::Settled(replay_id) = replay else {
        panic!("expected Settled on replay, got {replay:?}");
    };
    assert_eq!(replay_id, id);
}

fn pricing_requirement(pricing: &[PricingEntry]) -> r402_gateway::requirements::PaymentRequirements {
    r402_gateway::requirements::build_requirements(
        &r402_gateway::requirements::BuildRequirementsInput {
            resource: "mcp://srv1/tools/paidTool",
            description: "paidTool",
            pay_to: PAY_TO,
            max_timeout_seconds: 60,
            pricing,
            preferred_network: None,
        },
        &TokenRegistry::with_known_networks(),
    )
    .remove(0)
}

#[tokio::test]
async fn s5_underpayment_is_rejected_before_facilitator_call() {
    let (_server, facilitator) = facilitator_mock(true, true, Some("0xabc")).await;
    let core = PaymentsCore::new(FakeLedger::default(), facilitator, TokenRegistry::with_known_networks());
    let signing = SigningStrategyChain::new();
    let pricing = vec![pricing_entry()];
    let header = codec::encode(&signed_payload("99", NETWORK));

    let outcome = core
        .handle_paid_call(&request(&pricing, Some(&header), None), &signing)
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Failed(FailureReason::Underpayment)));
}

#[tokio::test]
async fn s6_wrong_network_is_rejected() {
    let (_server, facilitator) = facilitator_mock(true, true, Some("0xabc")).await;
    let core = PaymentsCore::new(FakeLedger::default(), facilitator, TokenRegistry::with_known_networks());
    let signing = SigningStrategyChain::new();
    let pricing = vec![pricing_entry()];
    let header = codec::encode(&signed_payload("100", "base"));

    let outcome = core
        .handle_paid_call(&request(&pricing, Some(&header), None), &signing)
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Failed(FailureReason::WrongNetwork)));
}

struct FakeManagedWallet(PrivateKeySigner);

impl ManagedWalletProvider for FakeManagedWallet {
    fn signer_for(&self, user_id: &str) -> Option<PrivateKeySigner> {
        (user_id == "user-1").then(|| self.0.clone())
    }
}

#[tokio::test]
async fn s7_auto_signed_via_managed_wallet_proceeds() {
    let (_server, facilitator) = facilitator_mock(true, true, Some("0xabc")).await;
    let core = PaymentsCore::new(FakeLedger::default(), facilitator, TokenRegistry::with_known_networks());
    let signing = SigningStrategyChain::new()
        .with_strategy(Box::new(ManagedWalletStrategy::new(FakeManagedWallet(PrivateKeySigner::random()))));
    let pricing = vec![pricing_entry()];

    let outcome = core
        .handle_paid_call(&request(&pricing, None, Some("user-1")), &signing)
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Proceed(_)));
}

#[tokio::test]
async fn upstream_connector_forwards_tools_call_to_mocked_mcp_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"content": [{"type": "text", "text": "ok"}]},
        })))
        .mount(&server)
        .await;

    let connector = UpstreamConnector::new();
    let call = RpcRequest {
        jsonrpc: "2.0".to_owned(),
        id: Some(RequestId::Number(1)),
        method: "tools/call".to_owned(),
        params: Some(serde_json::json!({"name": "echo", "arguments": {}})),
    };

    let fragments = connector
        .call("srv1", &server.uri(), &HeaderMap::new(), &call, DEFAULT_CALL_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].0["result"]["content"][0]["text"], "ok");
}

#[tokio::test]
async fn upstream_connector_times_out_against_a_hung_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(200)))
        .mount(&server)
        .await;

    let connector = UpstreamConnector::new();
    let call = RpcRequest {
        jsonrpc: "2.0".to_owned(),
        id: Some(RequestId::Number(1)),
        method: "tools/call".to_owned(),
        params: None,
    };

    let result = connector
        .call(
            "srv1",
            &server.uri(),
            &HeaderMap::new(),
            &call,
            std::time::Duration::from_millis(20),
        )
        .await;

    assert!(matches!(result, Err(r402_gateway::upstream::UpstreamError::Timeout)));
}
