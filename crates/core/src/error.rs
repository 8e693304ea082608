//! Domain error model.
//!
//! Business outcomes are values, not panics: every expected failure is a
//! `DomainError` variant carrying its structured metadata, and maps to a
//! stable wire-level `ErrorCode`. Infrastructure failures live in the store
//! layer and are a separate category.

use thiserror::Error;

use crate::id::LedgerEntryId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Stable machine-readable error codes surfaced to callers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    AccountNotFound,
    AccountInactive,
    AccountAlreadyExists,
    AccountInvalidName,
    AccountTenantMismatch,
    LedgerDuplicateCharge,
    LedgerDuplicatePayment,
    LedgerInvalidAmount,
    LedgerUnbalancedEntry,
    LedgerBalanceCalculationFailed,
    InvoiceNotFound,
    InvoiceNoBillableItems,
    InvoiceInvalidDateRange,
    InvoiceAlreadyExists,
    InvoiceImmutable,
    InvalidIdentifier,
    TenantContextMissing,
    Canceled,
    InfrastructureFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AccountNotFound => "ACCOUNT_NOT_FOUND",
            ErrorCode::AccountInactive => "ACCOUNT_INACTIVE",
            ErrorCode::AccountAlreadyExists => "ACCOUNT_ALREADY_EXISTS",
            ErrorCode::AccountInvalidName => "ACCOUNT_INVALID_NAME",
            ErrorCode::AccountTenantMismatch => "ACCOUNT_TENANT_MISMATCH",
            ErrorCode::LedgerDuplicateCharge => "LEDGER_DUPLICATE_CHARGE",
            ErrorCode::LedgerDuplicatePayment => "LEDGER_DUPLICATE_PAYMENT",
            ErrorCode::LedgerInvalidAmount => "LEDGER_INVALID_AMOUNT",
            ErrorCode::LedgerUnbalancedEntry => "LEDGER_UNBALANCED_ENTRY",
            ErrorCode::LedgerBalanceCalculationFailed => "LEDGER_BALANCE_CALCULATION_FAILED",
            ErrorCode::InvoiceNotFound => "INVOICE_NOT_FOUND",
            ErrorCode::InvoiceNoBillableItems => "INVOICE_NO_BILLABLE_ITEMS",
            ErrorCode::InvoiceInvalidDateRange => "INVOICE_INVALID_DATE_RANGE",
            ErrorCode::InvoiceAlreadyExists => "INVOICE_ALREADY_EXISTS",
            ErrorCode::InvoiceImmutable => "INVOICE_IMMUTABLE",
            ErrorCode::InvalidIdentifier => "INVALID_IDENTIFIER",
            ErrorCode::TenantContextMissing => "TENANT_CONTEXT_MISSING",
            ErrorCode::Canceled => "CANCELED",
            ErrorCode::InfrastructureFailure => "INFRASTRUCTURE_FAILURE",
        }
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-level error.
///
/// Keep this focused on deterministic business failures (validation,
/// invariants, idempotency conflicts). Infrastructure concerns belong to the
/// store layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    #[error("account not found")]
    AccountNotFound,

    #[error("account is inactive and cannot accept new transactions")]
    AccountInactive,

    #[error("an account with this id already exists")]
    AccountAlreadyExists,

    #[error("invalid account name: {reason}")]
    InvalidAccountName { reason: String },

    #[error("account belongs to a different tenant")]
    TenantMismatch,

    /// Idempotency conflict: the ride was already charged on this account.
    ///
    /// Carries the existing entry ids where known, so callers can choose
    /// idempotent-success semantics instead of surfacing the error.
    #[error("charge already recorded for ride {ride_id}")]
    DuplicateCharge {
        ride_id: String,
        existing_entry_ids: Vec<LedgerEntryId>,
    },

    /// Idempotency conflict: the payment reference was already ingested.
    #[error("payment already recorded for reference {reference}")]
    DuplicatePayment {
        reference: String,
        existing_entry_ids: Vec<LedgerEntryId>,
    },

    #[error("invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("source reference must be non-empty and at most 100 characters")]
    InvalidSourceReference,

    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },

    #[error("unbalanced entry: {reason}")]
    UnbalancedEntry { reason: String },

    #[error("balance calculation failed: {reason}")]
    BalanceCalculation { reason: String },

    #[error("invoice not found")]
    InvoiceNotFound,

    #[error("no billable items in the requested period")]
    NoBillableItems,

    #[error("invalid date range: {reason}")]
    InvalidDateRange { reason: String },

    #[error("an invoice with this number already exists")]
    InvoiceAlreadyExists,

    #[error("invoice is immutable once generated")]
    InvoiceImmutable,

    #[error("invalid identifier: {reason}")]
    InvalidId { reason: String },
}

impl DomainError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DomainError::AccountNotFound => ErrorCode::AccountNotFound,
            DomainError::AccountInactive => ErrorCode::AccountInactive,
            DomainError::AccountAlreadyExists => ErrorCode::AccountAlreadyExists,
            DomainError::InvalidAccountName { .. } => ErrorCode::AccountInvalidName,
            DomainError::TenantMismatch => ErrorCode::AccountTenantMismatch,
            DomainError::DuplicateCharge { .. } => ErrorCode::LedgerDuplicateCharge,
            DomainError::DuplicatePayment { .. } => ErrorCode::LedgerDuplicatePayment,
            DomainError::InvalidAmount { .. }
            | DomainError::InvalidSourceReference
            | DomainError::CurrencyMismatch { .. } => ErrorCode::LedgerInvalidAmount,
            DomainError::UnbalancedEntry { .. } => ErrorCode::LedgerUnbalancedEntry,
            DomainError::BalanceCalculation { .. } => ErrorCode::LedgerBalanceCalculationFailed,
            DomainError::InvoiceNotFound => ErrorCode::InvoiceNotFound,
            DomainError::NoBillableItems => ErrorCode::InvoiceNoBillableItems,
            DomainError::InvalidDateRange { .. } => ErrorCode::InvoiceInvalidDateRange,
            DomainError::InvoiceAlreadyExists => ErrorCode::InvoiceAlreadyExists,
            DomainError::InvoiceImmutable => ErrorCode::InvoiceImmutable,
            DomainError::InvalidId { .. } => ErrorCode::InvalidIdentifier,
        }
    }

    pub fn invalid_amount(reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            reason: reason.into(),
        }
    }

    pub fn invalid_name(reason: impl Into<String>) -> Self {
        Self::InvalidAccountName {
            reason: reason.into(),
        }
    }

    pub fn invalid_id(reason: impl Into<String>) -> Self {
        Self::InvalidId {
            reason: reason.into(),
        }
    }

    pub fn invalid_date_range(reason: impl Into<String>) -> Self {
        Self::InvalidDateRange {
            reason: reason.into(),
        }
    }

    pub fn balance_calculation(reason: impl Into<String>) -> Self {
        Self::BalanceCalculation {
            reason: reason.into(),
        }
    }

    pub fn unbalanced(reason: impl Into<String>) -> Self {
        Self::UnbalancedEntry {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_wire_names() {
        assert_eq!(
            DomainError::AccountInactive.code().as_str(),
            "ACCOUNT_INACTIVE"
        );
        assert_eq!(
            DomainError::DuplicateCharge {
                ride_id: "R-1".into(),
                existing_entry_ids: vec![],
            }
            .code()
            .as_str(),
            "LEDGER_DUPLICATE_CHARGE"
        );
        assert_eq!(
            DomainError::invalid_amount("negative").code().as_str(),
            "LEDGER_INVALID_AMOUNT"
        );
        assert_eq!(ErrorCode::Canceled.as_str(), "CANCELED");
    }
}
