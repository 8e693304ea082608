use thiserror::Error;

use rideledger_core::{DomainError, ErrorCode, TenantContextError};
use rideledger_infra::StoreError;

pub type AppResult<T> = Result<T, AppError>;

/// Handler-level error: business failures pass through unchanged;
/// infrastructure failures collapse into a single category distinct from
/// them.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("operation canceled")]
    Canceled,

    #[error("tenant context missing: {0}")]
    TenantContext(String),

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Domain(e) => e.code(),
            AppError::Canceled => ErrorCode::Canceled,
            AppError::TenantContext(_) => ErrorCode::TenantContextMissing,
            AppError::Infrastructure(_) => ErrorCode::InfrastructureFailure,
        }
    }
}

impl From<TenantContextError> for AppError {
    fn from(value: TenantContextError) -> Self {
        AppError::TenantContext(value.to_string())
    }
}

/// Catch-all store mapping. Handlers translate `UniqueViolation` and
/// `NotFound` into specific business errors *before* reaching for this.
impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Canceled => AppError::Canceled,
            other => AppError::Infrastructure(other.to_string()),
        }
    }
}

/// Store errors on account paths: an absent tenant-scoped row is
/// `ACCOUNT_NOT_FOUND`, not an infrastructure failure.
pub(crate) fn account_store_err(err: StoreError) -> AppError {
    match err {
        StoreError::NotFound => DomainError::AccountNotFound.into(),
        other => other.into(),
    }
}

pub(crate) fn invoice_store_err(err: StoreError) -> AppError {
    match err {
        StoreError::NotFound => DomainError::InvoiceNotFound.into(),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_cover_all_categories() {
        assert_eq!(
            AppError::from(DomainError::AccountInactive).code().as_str(),
            "ACCOUNT_INACTIVE"
        );
        assert_eq!(AppError::Canceled.code().as_str(), "CANCELED");
        assert_eq!(
            AppError::TenantContext("claim absent".into()).code().as_str(),
            "TENANT_CONTEXT_MISSING"
        );
        assert_eq!(
            AppError::from(StoreError::Database("boom".into()))
                .code()
                .as_str(),
            "INFRASTRUCTURE_FAILURE"
        );
        assert_eq!(
            AppError::from(StoreError::Canceled).code().as_str(),
            "CANCELED"
        );
    }
}
