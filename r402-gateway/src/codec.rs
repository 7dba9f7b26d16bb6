//! Payment Codec (§4.2, §6): the `X-PAYMENT` / `X-PAYMENT-RESPONSE` wire codec.
//!
//! A pure, synchronous module: no I/O, no async. Encoding produces canonical
//! JSON of the payload then base64 (standard alphabet, no newlines); decoding
//! reverses the process and validates shape. Timestamps use the same
//! stringified-`u64` convention as the rest of this ecosystem's wire types, to
//! avoid precision loss for JS-compatible clients.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A Unix timestamp, serialized as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixTimestamp(u64);

impl UnixTimestamp {
    /// Builds a timestamp from raw seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// The current wall-clock time.
    ///
    /// # Panics
    ///
    /// Panics if the system clock is set before the Unix epoch.
    #[must_use]
    pub fn now() -> Self {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_secs();
        Self(secs)
    }

    /// Raw seconds since the Unix epoch.
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))
    }
}

/// The EIP-3009-style authorization carried inside a payment payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Authorization {
    /// Payer address, 20-byte hex.
    pub from: String,
    /// Payee address, 20-byte hex.
    pub to: String,
    /// Base-units amount, decimal string.
    pub value: String,
    /// Earliest valid time.
    #[serde(rename = "validAfter")]
    pub valid_after: UnixTimestamp,
    /// Latest valid time (exclusive boundary behavior per §8: `valid_before == now` fails).
    #[serde(rename = "validBefore")]
    pub valid_before: UnixTimestamp,
    /// 32-byte random nonce, hex.
    pub nonce: String,
}

/// The payment payload nested under `payload` in the wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payload {
    /// ECDSA signature over the EIP-712 `TransferWithAuthorization` digest,
    /// or an EIP-6492 wrapped signature.
    pub signature: String,
    /// The structured authorization that was signed.
    pub authorization: Authorization,
}

/// The full `X-PAYMENT` wire envelope (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentPayload {
    /// Protocol version; always `1` for this wire shape.
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    /// Always `"exact"` — the only scheme this specification defines.
    pub scheme: String,
    /// Network name, e.g. `"base-sepolia"`.
    pub network: String,
    /// The signed authorization payload.
    pub payload: Payload,
}

/// The `X-PAYMENT-RESPONSE` settlement result envelope (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementResponse {
    /// Whether settlement succeeded.
    pub success: bool,
    /// Machine-readable failure reason, present only on failure.
    #[serde(rename = "errorReason", default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// The payer's address, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    /// On-chain transaction hash.
    pub transaction: String,
    /// Network the settlement occurred on.
    pub network: String,
}

/// Distinct malformed-payload sub-reasons (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedPaymentHeader {
    /// The header was not valid base64.
    #[error("payment header is not valid base64")]
    NotBase64,
    /// The decoded bytes were not valid JSON.
    #[error("payment header is not valid JSON")]
    NotJson,
    /// The JSON did not match the expected shape.
    #[error("payment header does not match the expected shape")]
    ShapeViolation,
    /// The signature field was not a recognizable format.
    #[error("payment header signature has an unrecognized format")]
    BadSignatureFormat,
}

impl fmt::Display for PaymentPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PaymentPayload{{network={}, from={}, value={}}}",
            self.network, self.payload.authorization.from, self.payload.authorization.value
        )
    }
}

/// Encodes a [`PaymentPayload`] as base64(JSON), no newlines, standard alphabet.
#[must_use]
pub fn encode(payload: &PaymentPayload) -> String {
    let json = serde_json::to_vec(payload).expect("PaymentPayload serialization cannot fail");
    B64.encode(json)
}

/// Decodes an `X-PAYMENT` header value into a [`PaymentPayload`].
///
/// # Errors
///
/// Returns the specific [`MalformedPaymentHeader`] sub-reason describing why
/// decoding failed.
pub fn decode(header_value: &str) -> Result<PaymentPayload, MalformedPaymentHeader> {
    let bytes = B64
        .decode(header_value.trim())
        .map_err(|_| MalformedPaymentHeader::NotBase64)?;
    let payload: PaymentPayload =
        serde_json::from_slice(&bytes).map_err(|_| MalformedPaymentHeader::NotJson)?;
    validate_shape(&payload)?;
    Ok(payload)
}

/// Encodes a [`SettlementResponse`] as base64(JSON) for the `X-PAYMENT-RESPONSE` header.
#[must_use]
pub fn encode_settlement_response(response: &SettlementResponse) -> String {
    let json = serde_json::to_vec(response).expect("SettlementResponse serialization cannot fail");
    B64.encode(json)
}

/// Decodes an `X-PAYMENT-RESPONSE` header value.
///
/// # Errors
///
/// Returns [`MalformedPaymentHeader::NotBase64`] or
/// [`MalformedPaymentHeader::NotJson`] on decode failure.
pub fn decode_settlement_response(
    header_value: &str,
) -> Result<SettlementResponse, MalformedPaymentHeader> {
    let bytes = B64
        .decode(header_value.trim())
        .map_err(|_| MalformedPaymentHeader::NotBase64)?;
    serde_json::from_slice(&bytes).map_err(|_| MalformedPaymentHeader::NotJson)
}

fn validate_shape(payload: &PaymentPayload) -> Result<(), MalformedPaymentHeader> {
    if payload.scheme != "exact" {
        return Err(MalformedPaymentHeader::ShapeViolation);
    }
    if !is_hex_address(&payload.payload.authorization.from)
        || !is_hex_address(&payload.payload.authorization.to)
    {
        return Err(MalformedPaymentHeader::ShapeViolation);
    }
    if !is_hex_nonce(&payload.payload.authorization.nonce) {
        return Err(MalformedPaymentHeader::ShapeViolation);
    }
    if payload.payload.authorization.value.parse::<u128>().is_err() {
        return Err(MalformedPaymentHeader::ShapeViolation);
    }
    let sig = &payload.payload.signature;
    let is_eoa_sig = sig.starts_with("0x") && sig.len() == 132;
    let is_extended_sig = sig.starts_with("0x") && sig.len() > 132;
    if !is_eoa_sig && !is_extended_sig {
        return Err(MalformedPaymentHeader::BadSignatureFormat);
    }
    Ok(())
}

fn is_hex_address(s: &str) -> bool {
    s.strip_prefix("0x").is_some_and(|rest| rest.len() == 40 && rest.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_hex_nonce(s: &str) -> bool {
    s.strip_prefix("0x").is_some_and(|rest| rest.len() == 64 && rest.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> PaymentPayload {
        PaymentPayload {
            x402_version: 1,
            scheme: "exact".to_owned(),
            network: "base-sepolia".to_owned(),
            payload: Payload {
                signature: format!("0x{}", "ab".repeat(65)),
                authorization: Authorization {
                    from: format!("0x{}", "11".repeat(20)),
                    to: format!("0x{}", "22".repeat(20)),
                    value: "100".to_owned(),
                    valid_after: UnixTimestamp::from_secs(1_700_000_000),
                    valid_before: UnixTimestamp::from_secs(1_700_000_600),
                    nonce: format!("0x{}", "33".repeat(32)),
                },
            },
        }
    }

    #[test]
    fn round_trips_well_formed_payload() {
        let payload = sample_payload();
        let encoded = encode(&payload);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rejects_non_base64() {
        assert_eq!(decode("not-base64!!!"), Err(MalformedPaymentHeader::NotBase64));
    }

    #[test]
    fn rejects_non_json() {
        let encoded = B64.encode(b"not json");
        assert_eq!(decode(&encoded), Err(MalformedPaymentHeader::NotJson));
    }

    #[test]
    fn rejects_wrong_scheme() {
        let mut payload = sample_payload();
        payload.scheme = "upto".to_owned();
        let encoded = encode(&payload);
        assert_eq!(decode(&encoded), Err(MalformedPaymentHeader::ShapeViolation));
    }

    #[test]
    fn rejects_malformed_addresses() {
        let mut payload = sample_payload();
        payload.payload.authorization.from = "not-an-address".to_owned();
        let encoded = encode(&payload);
        assert_eq!(decode(&encoded), Err(MalformedPaymentHeader::ShapeViolation));
    }

    #[test]
    fn rejects_bad_signature_format() {
        let mut payload = sample_payload();
        payload.payload.signature = "deadbeef".to_owned();
        let encoded = encode(&payload);
        assert_eq!(
            decode(&encoded),
            Err(MalformedPaymentHeader::BadSignatureFormat)
        );
    }

    #[test]
    fn settlement_response_round_trips() {
        let response = SettlementResponse {
            success: true,
            error_reason: None,
            payer: Some(format!("0x{}", "11".repeat(20))),
            transaction: "0xabc".to_owned(),
            network: "base-sepolia".to_owned(),
        };
        let encoded = encode_settlement_response(&response);
        let decoded = decode_settlement_response(&encoded).unwrap();
        assert_eq!(decoded, response);
    }
}
