//! Store-level error model and SQLx error mapping.
//!
//! Infrastructure failures are a category of their own, distinct from
//! business errors: handlers translate `UniqueViolation` into the matching
//! idempotency error and surface everything else as an infrastructure
//! failure. Only connection-class errors are retried.

use thiserror::Error;

/// Names of the uniqueness constraints handlers translate into business
/// errors. Must match `migrations/0001_init.sql` and the in-memory store.
pub mod constraints {
    /// One AR debit per `(account_id, ride_id)`.
    pub const RIDE_SOURCE: &str = "ux_ledger_entries_ride_source";
    /// One Cash debit per payment reference, globally.
    pub const PAYMENT_SOURCE: &str = "ux_ledger_entries_payment_source";
    /// One invoice number per tenant.
    pub const INVOICE_NUMBER: &str = "ux_invoices_tenant_number";
    /// Account primary key.
    pub const ACCOUNT_PK: &str = "accounts_pkey";
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The operation's cancellation token was signalled.
    #[error("operation canceled")]
    Canceled,

    /// A uniqueness constraint rejected the write. Carries the constraint
    /// name so handlers can translate it into the right business error.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// The tenant-scoped row does not exist.
    #[error("row not found for the current tenant")]
    NotFound,

    /// Connection-class failure. Transient: eligible for retry.
    #[error("connection failure: {0}")]
    Connection(String),

    /// Any other database failure. Not retried.
    #[error("database failure: {0}")]
    Database(String),

    /// A persisted row could not be decoded into its domain type.
    #[error("row decode failed: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// Map SQLx errors to [`StoreError`].
///
/// Unique violations (PostgreSQL `23505`) keep their constraint name;
/// pool/IO errors become the transient `Connection` class.
pub fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                };
            }
            StoreError::Database(format!(
                "database error in {}: {}",
                operation,
                db_err.message()
            ))
        }
        sqlx::Error::Io(e) => StoreError::Connection(format!("io error in {operation}: {e}")),
        sqlx::Error::PoolTimedOut => {
            StoreError::Connection(format!("pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => StoreError::Connection(format!("pool closed in {operation}")),
        sqlx::Error::ColumnDecode { index, source } => {
            StoreError::Decode(format!("column {index} in {operation}: {source}"))
        }
        sqlx::Error::RowNotFound => StoreError::NotFound,
        other => StoreError::Database(format!("sqlx error in {operation}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_transient() {
        assert!(StoreError::Connection("reset".into()).is_transient());
        assert!(!StoreError::Database("syntax".into()).is_transient());
        assert!(
            !StoreError::UniqueViolation {
                constraint: constraints::RIDE_SOURCE.into()
            }
            .is_transient()
        );
        assert!(!StoreError::Canceled.is_transient());
    }
}
