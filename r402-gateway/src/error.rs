//! The gateway's shared error taxonomy (§7).
//!
//! Every component-level error type in this crate is a [`thiserror`]-derived
//! enum. [`GatewayError`] aggregates them at the HTTP edge and implements
//! [`axum::response::IntoResponse`] once, following the same
//! category-then-status mapping the rest of this ecosystem uses for its own
//! payment-problem errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::{payments_core, registry, store, upstream};

/// The six surfaced error categories from §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed payment, underpayment, expired auth, network mismatch, unsupported scheme.
    ClientFault,
    /// Missing/invalid API key, permission denied.
    AuthFault,
    /// Duplicate registration, concurrent in-flight payment with the same signature.
    Conflict,
    /// MCP server unreachable or errored after payment.
    Upstream,
    /// Verify/settle network failure.
    Facilitator,
    /// DB write failure, invariant violation.
    Internal,
}

impl ErrorCategory {
    /// The HTTP status this category maps to.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::ClientFault => StatusCode::PAYMENT_REQUIRED,
            Self::AuthFault => StatusCode::UNAUTHORIZED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Upstream => StatusCode::BAD_GATEWAY,
            Self::Facilitator => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Implemented by every component-level error to classify it into §7's taxonomy.
pub trait AsGatewayProblem {
    /// Which of the six surfaced categories this error belongs to.
    fn category(&self) -> ErrorCategory;

    /// A machine-readable, snake_case reason string for the `errorReason` wire field.
    fn error_reason(&self) -> &'static str;
}

/// The top-level error type returned by gateway request handlers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// An error raised by the payment state machine.
    #[error(transparent)]
    Payments(#[from] payments_core::PaymentsCoreError),

    /// An error raised by the Payment Store.
    #[error(transparent)]
    Store(#[from] store::StoreError),

    /// An error raised by the Tool/Server Registry.
    #[error(transparent)]
    Registry(#[from] registry::RegistryError),

    /// An error raised by the Upstream Connector.
    #[error(transparent)]
    Upstream(#[from] upstream::UpstreamError),

    /// Missing or invalid API key.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// An invariant the gateway itself is responsible for was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AsGatewayProblem for GatewayError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Payments(e) => e.category(),
            Self::Store(e) => e.category(),
            Self::Registry(e) => e.category(),
            Self::Upstream(e) => e.category(),
            Self::Auth(_) => ErrorCategory::AuthFault,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    fn error_reason(&self) -> &'static str {
        match self {
            Self::Payments(e) => e.error_reason(),
            Self::Store(e) => e.error_reason(),
            Self::Registry(e) => e.error_reason(),
            Self::Upstream(e) => e.error_reason(),
            Self::Auth(_) => "unauthorized",
            Self::Internal(_) => "internal",
        }
    }
}

/// The JSON body returned alongside non-2xx gateway responses.
#[derive(Debug, Serialize)]
struct ProblemBody {
    #[serde(rename = "errorReason")]
    error_reason: &'static str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let category = self.category();
        let status = category.status();
        if category == ErrorCategory::Internal {
            tracing::error!(error = %self, "internal gateway error");
        }
        let body = ProblemBody {
            error_reason: self.error_reason(),
            // Internal errors are never merged into the client-visible reason string (§7).
            message: if category == ErrorCategory::Internal {
                "internal error".to_owned()
            } else {
                self.to_string()
            },
        };
        (status, Json(body)).into_response()
    }
}
