use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use rideledger_core::{AccountId, Currency, TenantContext};
use rideledger_infra::{
    retry_transient, AccountRepository, InvoiceRepository, LedgerQueries, RetryPolicy,
};
use rideledger_ledger::Account;

use crate::error::{account_store_err, AppResult};

/// Command/query facade over the accounting core.
///
/// Collaborators are wired explicitly at the composition root and passed as
/// interface values; there is no service container.
pub struct LedgerService {
    pub(crate) accounts: Arc<dyn AccountRepository>,
    pub(crate) invoices: Arc<dyn InvoiceRepository>,
    pub(crate) ledger: Arc<dyn LedgerQueries>,
    pub(crate) retry: RetryPolicy,
    pub(crate) default_currency: Currency,
}

impl LedgerService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        ledger: Arc<dyn LedgerQueries>,
    ) -> Self {
        Self {
            accounts,
            invoices,
            ledger,
            retry: RetryPolicy::default(),
            default_currency: Currency::usd(),
        }
    }

    pub fn with_default_currency(mut self, currency: Currency) -> Self {
        self.default_currency = currency;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load the full aggregate, retrying transient failures. Reads are safe
    /// to retry; writes are not auto-retried (the uniqueness backstops catch
    /// a rerun, but an ambiguous commit must surface to the caller).
    pub(crate) async fn load_account(
        &self,
        ctx: &TenantContext,
        id: AccountId,
        cancel: &CancellationToken,
    ) -> AppResult<Account> {
        let account = retry_transient(self.retry, cancel, || {
            self.accounts.get_by_id_with_entries(ctx, id, cancel)
        })
        .await
        .map_err(account_store_err)?
        .ok_or(rideledger_core::DomainError::AccountNotFound)?;

        // Defense in depth: the repository already filters by tenant, but a
        // buggy store must not leak another tenant's aggregate into a write.
        if account.tenant_id() != ctx.tenant_id() {
            return Err(rideledger_core::DomainError::TenantMismatch.into());
        }
        Ok(account)
    }
}
