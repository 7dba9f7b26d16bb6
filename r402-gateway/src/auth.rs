//! API key authentication (§3 `ApiKey`, §6 `X-API-KEY`).
//!
//! Keys are never stored in plaintext. The gateway hashes the presented key
//! with Keccak-256 (reusing [`alloy_primitives`], already a dependency of
//! this ecosystem's EVM stack, rather than pulling in a separate hashing
//! crate) and looks the digest up against the persisted `key_hash` column.

use alloy_primitives::keccak256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AsGatewayProblem, ErrorCategory};

/// A caller's API key record (§3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Opaque digest of the plaintext key; the plaintext itself is never stored.
    pub key_hash: String,
    /// Human-readable label for the key.
    pub name: String,
    /// Granted permission scopes.
    pub permissions: Vec<String>,
    /// Optional expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Last time this key authenticated a request.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Whether the key is usable.
    pub active: bool,
}

impl ApiKey {
    /// Whether this key is currently usable: `active` and not past `expires_at`.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_none_or(|exp| now <= exp)
    }
}

/// Errors raised while authenticating an inbound request by API key.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// `X-API-KEY` was required but absent.
    #[error("missing API key")]
    MissingApiKey,
    /// No key matches the presented digest, or it is expired/inactive.
    #[error("invalid or expired API key")]
    InvalidApiKey,
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AsGatewayProblem for AuthError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingApiKey | Self::InvalidApiKey => ErrorCategory::AuthFault,
            Self::Database(_) => ErrorCategory::Internal,
        }
    }

    fn error_reason(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "missing_api_key",
            Self::InvalidApiKey => "invalid_api_key",
            Self::Database(_) => "internal",
        }
    }
}

/// Hashes a plaintext API key the same way for both issuance and lookup.
#[must_use]
pub fn hash_key(plaintext: &str) -> String {
    format!("{:x}", keccak256(plaintext.as_bytes()))
}

/// Postgres-backed API key lookup.
#[derive(Debug, Clone)]
pub struct ApiKeyStore {
    pool: PgPool,
}

impl ApiKeyStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Authenticates a plaintext `X-API-KEY` header value, returning the
    /// owning `user_id` on success and refreshing `last_used_at`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidApiKey`] if no active, unexpired key
    /// matches, or [`AuthError::Database`] on a query failure.
    #[tracing::instrument(skip(self, plaintext))]
    pub async fn authenticate(&self, plaintext: &str) -> Result<Uuid, AuthError> {
        let key_hash = hash_key(plaintext);
        let key = sqlx::query_as::<_, ApiKey>(
            "SELECT id, user_id, key_hash, name, permissions, expires_at, last_used_at, active \
             FROM api_keys WHERE key_hash = $1",
        )
        .bind(&key_hash)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::InvalidApiKey)?;

        if !key.is_valid(Utc::now()) {
            return Err(AuthError::InvalidApiKey);
        }

        sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
            .bind(key.id)
            .execute(&self.pool)
            .await?;

        Ok(key.user_id)
    }
}

/// Who is making a request, as resolved by the MCP Proxy before invoking
/// Payments Core (§4.7: the signer identity decision).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientIdentity {
    /// Authenticated via `X-API-KEY`; eligible for managed-wallet auto-signing.
    ApiKey {
        /// The authenticated user.
        user_id: Uuid,
    },
    /// No API key presented; the client must supply its own `X-PAYMENT` header.
    Anonymous,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_key("sk-live-abc"), hash_key("sk-live-abc"));
        assert_ne!(hash_key("sk-live-abc"), hash_key("sk-live-xyz"));
    }

    #[test]
    fn expired_key_is_invalid() {
        let key = ApiKey {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            key_hash: hash_key("k"),
            name: "test".to_owned(),
            permissions: vec![],
            expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            last_used_at: None,
            active: true,
        };
        assert!(!key.is_valid(Utc::now()));
    }

    #[test]
    fn inactive_key_is_invalid_even_if_unexpired() {
        let key = ApiKey {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            key_hash: hash_key("k"),
            name: "test".to_owned(),
            permissions: vec![],
            expires_at: None,
            last_used_at: None,
            active: false,
        };
        assert!(!key.is_valid(Utc::now()));
    }
}
