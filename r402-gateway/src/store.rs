//! Payment Store (§4.4): the durable, append-mostly ledger of payment
//! attempts and their outcomes.
//!
//! The state machine is `pending -> {completed, failed}`, both terminal.
//! Uniqueness on `signature` is enforced at the database layer so that two
//! concurrent `tools/call` requests racing on the same signed authorization
//! can only ever create one row; the loser of that race reads the winner's
//! row back instead of erroring (§8, idempotent replay handling).

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AsGatewayProblem, ErrorCategory};

/// The three states a payment attempt can be in (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Verified, awaiting settlement.
    Pending,
    /// Settled on-chain; terminal.
    Completed,
    /// Verification or settlement failed, or the record expired unsettled; terminal.
    Failed,
}

/// A row in the payment ledger (§3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentRecord {
    /// Primary key.
    pub id: Uuid,
    /// The tool this payment authorizes a call to.
    pub tool_id: Uuid,
    /// Unique signature over the EIP-712 authorization; the idempotency key.
    pub signature: String,
    /// The payer's address, once known.
    pub payer_address: Option<String>,
    /// Base-units amount actually authorized.
    pub amount_raw: String,
    /// Network the payment was made on.
    pub network: String,
    /// Current lifecycle state.
    pub status: PaymentStatus,
    /// On-chain transaction hash, set only once `status == Completed`.
    pub transaction_hash: Option<String>,
    /// When the row was created (also the `pending` deadline basis, §9 janitor).
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// When the row last changed state.
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Errors raised by Payment Store operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// No payment record exists for the given signature.
    #[error("payment record not found")]
    NotFound,
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A transition was attempted on a record that was no longer `pending`
    /// (e.g. two settlement attempts racing the same signature).
    #[error("payment record is no longer pending")]
    NotPending,
}

impl AsGatewayProblem for StoreError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound => ErrorCategory::ClientFault,
            Self::NotPending => ErrorCategory::Conflict,
            Self::Database(_) => ErrorCategory::Internal,
        }
    }

    fn error_reason(&self) -> &'static str {
        match self {
            Self::NotFound => "payment_not_found",
            Self::NotPending => "payment_not_pending",
            Self::Database(_) => "internal",
        }
    }
}

/// Durable ledger of payment attempts, backed by Postgres.
#[derive(Debug, Clone)]
pub struct PaymentStore {
    pool: PgPool,
}

impl PaymentStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new `pending` record for `signature`, or returns the
    /// existing record if one is already on file (insert-or-fetch, never a
    /// unique-violation error to the caller).
    ///
    /// The returned `bool` is `true` only when this call created the row —
    /// callers use it to tell a fresh payment attempt apart from a request
    /// that lost a race against a concurrent attempt on the same signed
    /// authorization (§4.6, the in-flight edge case).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on a query failure.
    #[tracing::instrument(skip(self))]
    pub async fn insert_pending(
        &self,
        tool_id: Uuid,
        signature: &str,
        payer_address: Option<&str>,
        amount_raw: &str,
        network: &str,
    ) -> Result<(PaymentRecord, bool), StoreError> {
        let inserted = sqlx::query_as::<_, PaymentRecord>(
            "INSERT INTO payments (id, tool_id, signature, payer_address, amount_raw, network, status) \
             VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, 'pending') \
             ON CONFLICT (signature) DO NOTHING \
             RETURNING id, tool_id, signature, payer_address, amount_raw, network, status, transaction_hash, created_at, updated_at",
        )
        .bind(tool_id)
        .bind(signature)
        .bind(payer_address)
        .bind(amount_raw)
        .bind(network)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(record) => Ok((record, true)),
            None => {
                let record = self.find_by_signature(signature).await?.ok_or(StoreError::NotFound)?;
                Ok((record, false))
            }
        }
    }

    /// Looks up a record by its unique signature.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on a query failure.
    pub async fn find_by_signature(&self, signature: &str) -> Result<Option<PaymentRecord>, StoreError> {
        let record = sqlx::query_as::<_, PaymentRecord>(
            "SELECT id, tool_id, signature, payer_address, amount_raw, network, status, transaction_hash, created_at, updated_at \
             FROM payments WHERE signature = $1",
        )
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Transitions a `pending` record to `completed`, recording the on-chain
    /// transaction hash. A no-op that returns [`StoreError::NotPending`] if
    /// the record already left `pending` (settlement retried after a crash).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotPending`] if the record is not `pending`, or
    /// [`StoreError::Database`] on a query failure.
    #[tracing::instrument(skip(self))]
    pub async fn mark_completed(
        &self,
        signature: &str,
        transaction_hash: &str,
    ) -> Result<PaymentRecord, StoreError> {
        let record = sqlx::query_as::<_, PaymentRecord>(
            "UPDATE payments SET status = 'completed', transaction_hash = $2, updated_at = now() \
             WHERE signature = $1 AND status = 'pending' \
             RETURNING id, tool_id, signature, payer_address, amount_raw, network, status, transaction_hash, created_at, updated_at",
        )
        .bind(signature)
        .bind(transaction_hash)
        .fetch_optional(&self.pool)
        .await?;
        record.ok_or(StoreError::NotPending)
    }

    /// Transitions a `pending` record to `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotPending`] if the record is not `pending`, or
    /// [`StoreError::Database`] on a query failure.
    #[tracing::instrument(skip(self))]
    pub async fn mark_failed(&self, signature: &str) -> Result<PaymentRecord, StoreError> {
        let record = sqlx::query_as::<_, PaymentRecord>(
            "UPDATE payments SET status = 'failed', updated_at = now() \
             WHERE signature = $1 AND status = 'pending' \
             RETURNING id, tool_id, signature, payer_address, amount_raw, network, status, transaction_hash, created_at, updated_at",
        )
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;
        record.ok_or(StoreError::NotPending)
    }

    /// Marks every `pending` record older than `max_age` as `failed` (§9, the
    /// janitor task). Returns the number of records transitioned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on a query failure.
    #[tracing::instrument(skip(self))]
    pub async fn expire_stale_pending(&self, max_age: chrono::Duration) -> Result<u64, StoreError> {
        let cutoff = chrono::Utc::now() - max_age;
        let result = sqlx::query(
            "UPDATE payments SET status = 'failed', updated_at = now() \
             WHERE status = 'pending' AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_round_trips_through_serde() {
        let json = serde_json::to_string(&PaymentStatus::Completed).unwrap();
        let back: PaymentStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PaymentStatus::Completed);
    }

    #[test]
    fn not_found_maps_to_client_fault() {
        let err = StoreError::NotFound;
        assert_eq!(err.category(), ErrorCategory::ClientFault);
        assert_eq!(err.error_reason(), "payment_not_found");
    }

    #[test]
    fn not_pending_maps_to_conflict() {
        let err = StoreError::NotPending;
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }
}
