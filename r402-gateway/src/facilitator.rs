//! Facilitator Client (§4.3): `verify` and `settle` against an external x402 facilitator.
//!
//! Built on a pooled [`reqwest::Client`], following the same shape as this
//! ecosystem's own HTTP-transport facilitator client: a per-request timeout,
//! an optional extra-headers map, and a clear split between the client's own
//! errors (URL construction, transport, JSON decode, unexpected status —
//! always [`FacilitatorUnavailable`](FacilitatorClientError::Unavailable)) and
//! the facilitator's *business* errors (`is_valid: false` / `success: false`
//! with a structured reason, which are not [`FacilitatorClientError`] at all —
//! they're ordinary, successfully-decoded responses).

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::codec::PaymentPayload;
use crate::error::{AsGatewayProblem, ErrorCategory};

/// Body shared by `verify` and `settle` requests: `{x402Version, paymentPayload, paymentRequirements}`.
#[derive(Debug, Clone, Serialize)]
struct FacilitatorRequest<'a> {
    #[serde(rename = "x402Version")]
    x402_version: u32,
    #[serde(rename = "paymentPayload")]
    payment_payload: &'a PaymentPayload,
    #[serde(rename = "paymentRequirements")]
    payment_requirements: &'a crate::requirements::PaymentRequirements,
}

/// Response to `POST {base}/{network}/verify`.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    /// Whether the signature and funds check succeeded.
    pub success: bool,
    /// Machine-readable failure reason, present only when `success` is false.
    #[serde(rename = "errorReason", default)]
    pub error_reason: Option<String>,
    /// The recovered payer address, when available.
    #[serde(default)]
    pub payer: Option<String>,
}

/// Response to `POST {base}/{network}/settle`.
#[derive(Debug, Clone, Deserialize)]
pub struct SettleResponse {
    /// Whether the on-chain transfer was submitted and confirmed.
    pub success: bool,
    /// On-chain transaction hash, present on success.
    #[serde(default)]
    pub transaction: Option<String>,
    /// Machine-readable failure reason (`"replay"` on a duplicate nonce), present on failure.
    #[serde(rename = "errorReason", default)]
    pub error_reason: Option<String>,
}

/// Errors intrinsic to talking to the facilitator over HTTP — never a
/// business-level verify/settle rejection, which is represented as an
/// ordinary `Ok(VerifyResponse { success: false, .. })`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FacilitatorClientError {
    /// The facilitator base URL could not be parsed.
    #[error("invalid facilitator URL: {0}")]
    UrlParse(#[from] url::ParseError),
    /// The HTTP request itself failed (connect, TLS, timeout).
    #[error("facilitator request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The facilitator returned a body that didn't decode as the expected shape.
    #[error("failed to deserialize facilitator response: {0}")]
    JsonDeserialization(serde_json::Error),
    /// The facilitator returned an unexpected (likely 5xx) HTTP status.
    #[error("facilitator returned unexpected status {0}")]
    HttpStatus(reqwest::StatusCode),
}

impl AsGatewayProblem for FacilitatorClientError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Facilitator
    }

    fn error_reason(&self) -> &'static str {
        "facilitator_unavailable"
    }
}

/// Client for the external facilitator's `verify`/`settle` HTTP API (§6).
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    base_url: url::Url,
    http: Client,
    headers: HeaderMap,
    timeout: Duration,
}

impl FacilitatorClient {
    /// Builds a client against `base_url`, e.g. `https://x402.org/facilitator`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError::UrlParse`] if `base_url` is invalid.
    pub fn try_new(base_url: &str) -> Result<Self, FacilitatorClientError> {
        Ok(Self {
            base_url: url::Url::parse(base_url)?,
            http: Client::new(),
            headers: HeaderMap::new(),
            timeout: Duration::from_secs(15),
        })
    }

    /// Attaches an additional header (e.g. a facilitator API key) sent on every request.
    ///
    /// # Panics
    ///
    /// Panics if `name` or `value` are not valid HTTP header components.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(
            HeaderName::from_bytes(name.as_bytes()).expect("valid header name"),
            HeaderValue::from_str(value).expect("valid header value"),
        );
        self
    }

    /// Overrides the default 15s per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Calls `POST {base}/{network}/verify`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] on transport failure or an
    /// undecodable/unexpected response. A rejected payment is a successful
    /// `Ok(VerifyResponse { success: false, .. })`, not an error.
    pub async fn verify(
        &self,
        network: &str,
        payload: &PaymentPayload,
        requirements: &crate::requirements::PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorClientError> {
        self.post_json(&format!("{network}/verify"), payload, requirements)
            .await
    }

    /// Calls `POST {base}/{network}/settle`.
    ///
    /// Idempotent on the payload's nonce: a second call for an
    /// already-settled nonce must return `{success: false, errorReason:
    /// "replay"}` rather than double-charging (§4.3).
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] on transport failure or an
    /// undecodable/unexpected response.
    pub async fn settle(
        &self,
        network: &str,
        payload: &PaymentPayload,
        requirements: &crate::requirements::PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorClientError> {
        self.post_json(&format!("{network}/settle"), payload, requirements)
            .await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path_suffix: &str,
        payload: &PaymentPayload,
        requirements: &crate::requirements::PaymentRequirements,
    ) -> Result<T, FacilitatorClientError> {
        let url = self.base_url.join(path_suffix)?;
        let body = FacilitatorRequest {
            x402_version: 1,
            payment_payload: payload,
            payment_requirements: requirements,
        };
        let response = self
            .http
            .post(url)
            .headers(self.headers.clone())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FacilitatorClientError::HttpStatus(status));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(FacilitatorClientError::JsonDeserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::PaymentRequirements;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_payload() -> PaymentPayload {
        crate::codec::PaymentPayload {
            x402_version: 1,
            scheme: "exact".to_owned(),
            network: "base-sepolia".to_owned(),
            payload: crate::codec::Payload {
                signature: format!("0x{}", "ab".repeat(65)),
                authorization: crate::codec::Authorization {
                    from: format!("0x{}", "11".repeat(20)),
                    to: format!("0x{}", "22".repeat(20)),
                    value: "100".to_owned(),
                    valid_after: crate::codec::UnixTimestamp::from_secs(1_700_000_000),
                    valid_before: crate::codec::UnixTimestamp::from_secs(1_700_000_600),
                    nonce: format!("0x{}", "33".repeat(32)),
                },
            },
        }
    }

    fn sample_requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_owned(),
            network: "base-sepolia".to_owned(),
            max_amount_required: "100".to_owned(),
            resource: "mcp://tool/paidTool".to_owned(),
            description: "paidTool".to_owned(),
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

    #[tokio::test]
    async fn verify_success_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/base-sepolia/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "payer": format!("0x{}", "11".repeat(20)),
            })))
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_new(&server.uri()).unwrap();
        let result = client
            .verify("base-sepolia", &sample_payload(), &sample_requirements())
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.payer.is_some());
    }

    #[tokio::test]
    async fn verify_business_rejection_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/base-sepolia/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "errorReason": "insufficient_funds",
            })))
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_new(&server.uri()).unwrap();
        let result = client
            .verify("base-sepolia", &sample_payload(), &sample_requirements())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_reason.as_deref(), Some("insufficient_funds"));
    }

    #[tokio::test]
    async fn settle_replay_is_a_structured_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/base-sepolia/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "errorReason": "replay",
            })))
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_new(&server.uri()).unwrap();
        let result = client
            .settle("base-sepolia", &sample_payload(), &sample_requirements())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error_reason.as_deref(), Some("replay"));
    }

    #[tokio::test]
    async fn server_error_becomes_facilitator_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/base-sepolia/verify"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_new(&server.uri()).unwrap();
        let err = client
            .verify("base-sepolia", &sample_payload(), &sample_requirements())
            .await
            .unwrap_err();
        assert!(matches!(err, FacilitatorClientError::HttpStatus(_)));
        assert_eq!(err.category(), ErrorCategory::Facilitator);
    }
}
