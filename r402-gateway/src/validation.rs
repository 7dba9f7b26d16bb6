//! Validation Service (§4.11): `POST /validate`.
//!
//! Answers whether a previously-presented `X-PAYMENT` header corresponds to
//! a *gateway-settled* payment. This is a pure Payment Store lookup — no
//! facilitator call — so it is authoritative only about payments this
//! gateway itself processed, matching the "used by downstream middleware
//! that wants to double-check a header" framing in §4.11.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec;
use crate::mcp_proxy::GatewayState;
use crate::store::PaymentStatus;

/// Request body for `POST /validate`.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateRequest {
    /// The base64(JSON) `X-PAYMENT` header value to check.
    pub payment: String,
    /// Client-supplied reference timestamp; accepted for wire compatibility
    /// but not consulted — this service is a lookup, not a re-verification.
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// Response body for `POST /validate` (§4.11).
#[derive(Debug, Clone, Serialize, Default)]
pub struct ValidateResponse {
    /// Whether a `completed` payment record exists for this header's signature.
    pub is_valid: bool,
    /// The matching payment record's id, when found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    /// The payer address on file for the record, when found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// The settled amount, in base units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    /// The network the payment settled on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Reserved for future out-of-band metadata; always `None` today.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Why `is_valid` is `false`, present only on failure.
    #[serde(rename = "errorReason", skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

/// `POST /validate` (§4.11).
///
/// Always returns `200`; validity is conveyed through the `is_valid` field,
/// not the HTTP status, since "this header is not a valid payment" is an
/// expected, non-exceptional answer for this endpoint.
#[tracing::instrument(skip(state, request))]
pub async fn validate(State(state): State<GatewayState>, Json(request): Json<ValidateRequest>) -> Json<ValidateResponse> {
    let Ok(payload) = codec::decode(&request.payment) else {
        return Json(ValidateResponse {
            is_valid: false,
            error_reason: Some("malformed_payment".to_owned()),
            ..Default::default()
        });
    };

    let record = match state.store.find_by_signature(&payload.payload.signature).await {
        Ok(record) => record,
        Err(_) => {
            return Json(ValidateResponse {
                is_valid: false,
                error_reason: Some("internal".to_owned()),
                ..Default::default()
            });
        }
    };

    let Some(record) = record else {
        return Json(ValidateResponse {
            is_valid: false,
            error_reason: Some("payment_not_found".to_owned()),
            ..Default::default()
        });
    };

    if record.status != PaymentStatus::Completed {
        return Json(ValidateResponse {
            is_valid: false,
            payment_id: Some(record.id),
            error_reason: Some("payment_not_completed".to_owned()),
            ..Default::default()
        });
    }

    Json(ValidateResponse {
        is_valid: true,
        payment_id: Some(record.id),
        user_id: record.payer_address,
        amount: Some(record.amount_raw),
        currency: Some(record.network),
        metadata: None,
        error_reason: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_response_is_invalid_with_no_fields() {
        let response = ValidateResponse::default();
        assert!(!response.is_valid);
        assert!(response.payment_id.is_none());
    }
}
