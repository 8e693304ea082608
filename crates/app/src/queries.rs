//! Query handlers: tenant-filtered, non-tracking reads.
//!
//! Queries never load aggregates; they go through [`LedgerQueries`] and the
//! repository view types. The one aggregation rule they share with the
//! domain is the receivable balance: Σ AR debits − Σ AR credits, floored at
//! zero.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use rideledger_core::{
    AccountId, DomainError, InvoiceId, Money, PageResult, Pagination, TenantContext,
};
use rideledger_infra::{
    retry_transient, AccountView, InvoiceSearch, InvoiceSummary, LedgerEntryView,
    TransactionFilter,
};
use rideledger_invoicing::{Invoice, InvoiceNumber};

use crate::error::{account_store_err, invoice_store_err, AppResult};
use crate::service::LedgerService;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GetTransactions {
    pub account_id: AccountId,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: u32,
    pub page_size: u32,
}

/// One statement row: the entry plus the receivable balance after it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementLine {
    pub entry: LedgerEntryView,
    pub running_balance: Decimal,
}

/// Customer statement for `[start, end]`: opening balance, dated rows with a
/// running balance, closing balance. Balances are signed (a prepaying
/// customer statement can run negative).
#[derive(Debug, Clone, PartialEq)]
pub struct AccountStatement {
    pub account_id: AccountId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub currency: rideledger_core::Currency,
    pub opening_balance: Decimal,
    pub closing_balance: Decimal,
    pub lines: PageResult<StatementLine>,
}

impl LedgerService {
    #[instrument(skip(self, ctx, cancel), fields(tenant_id = %ctx.tenant_id(), account_id = %id))]
    pub async fn get_account(
        &self,
        ctx: &TenantContext,
        id: AccountId,
        cancel: &CancellationToken,
    ) -> AppResult<AccountView> {
        retry_transient(self.retry, cancel, || self.accounts.get_by_id(ctx, id, cancel))
            .await
            .map_err(account_store_err)?
            .ok_or_else(|| DomainError::AccountNotFound.into())
    }

    #[instrument(skip(self, ctx, cancel), fields(tenant_id = %ctx.tenant_id(), account_id = %id))]
    pub async fn get_account_balance(
        &self,
        ctx: &TenantContext,
        id: AccountId,
        cancel: &CancellationToken,
    ) -> AppResult<Money> {
        let view = self.get_account(ctx, id, cancel).await?;
        let raw = self
            .ledger
            .receivable_balance(ctx, id, None, cancel)
            .await
            .map_err(account_store_err)?;

        Money::new(raw.max(Decimal::ZERO), view.currency).map_err(Into::into)
    }

    #[instrument(
        skip(self, ctx, query, cancel),
        fields(tenant_id = %ctx.tenant_id(), account_id = %query.account_id)
    )]
    pub async fn get_transactions(
        &self,
        ctx: &TenantContext,
        query: GetTransactions,
        cancel: &CancellationToken,
    ) -> AppResult<PageResult<LedgerEntryView>> {
        let filter = TransactionFilter {
            start_date: query.start_date,
            end_date: query.end_date,
        };
        let page = Pagination::new(query.page, query.page_size);

        self.ledger
            .transactions(ctx, query.account_id, filter, page, cancel)
            .await
            .map_err(account_store_err)
    }

    #[instrument(
        skip(self, ctx, cancel),
        fields(tenant_id = %ctx.tenant_id(), account_id = %account_id)
    )]
    pub async fn get_account_statement(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        start_date: NaiveDate,
        end_date: NaiveDate,
        page: Pagination,
        cancel: &CancellationToken,
    ) -> AppResult<AccountStatement> {
        if start_date > end_date {
            return Err(DomainError::invalid_date_range(format!(
                "statement start {start_date} is after end {end_date}"
            ))
            .into());
        }

        let view = self.get_account(ctx, account_id, cancel).await?;

        let opening_balance = self
            .ledger
            .receivable_balance(ctx, account_id, Some(start_date), cancel)
            .await
            .map_err(account_store_err)?;

        let rows = self
            .ledger
            .receivable_entries(ctx, account_id, start_date, end_date, cancel)
            .await
            .map_err(account_store_err)?;

        // The running balance walks the full range; pagination slices the
        // already-annotated rows so page boundaries keep correct balances.
        let mut running = opening_balance;
        let lines: Vec<StatementLine> = rows
            .into_iter()
            .map(|entry| {
                running += entry.effective_amount();
                StatementLine {
                    entry,
                    running_balance: running,
                }
            })
            .collect();
        let closing_balance = running;

        let total = lines.len() as u64;
        let page_items: Vec<StatementLine> = lines
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();

        Ok(AccountStatement {
            account_id,
            start_date,
            end_date,
            currency: view.currency,
            opening_balance,
            closing_balance,
            lines: PageResult::new(page_items, page, total),
        })
    }

    #[instrument(skip(self, ctx, cancel), fields(tenant_id = %ctx.tenant_id(), invoice_id = %id))]
    pub async fn get_invoice(
        &self,
        ctx: &TenantContext,
        id: InvoiceId,
        cancel: &CancellationToken,
    ) -> AppResult<Invoice> {
        retry_transient(self.retry, cancel, || {
            self.invoices.get_by_id_with_line_items(ctx, id, cancel)
        })
        .await
        .map_err(invoice_store_err)?
        .ok_or_else(|| DomainError::InvoiceNotFound.into())
    }

    #[instrument(skip(self, ctx, cancel), fields(tenant_id = %ctx.tenant_id(), number = %number))]
    pub async fn get_invoice_by_number(
        &self,
        ctx: &TenantContext,
        number: InvoiceNumber,
        cancel: &CancellationToken,
    ) -> AppResult<Invoice> {
        retry_transient(self.retry, cancel, || {
            self.invoices.get_by_invoice_number(ctx, number, cancel)
        })
        .await
        .map_err(invoice_store_err)?
        .ok_or_else(|| DomainError::InvoiceNotFound.into())
    }

    /// All invoices for one account, newest first.
    #[instrument(
        skip(self, ctx, cancel),
        fields(tenant_id = %ctx.tenant_id(), account_id = %account_id)
    )]
    pub async fn get_account_invoices(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<InvoiceSummary>> {
        // Surface ACCOUNT_NOT_FOUND for an unknown account instead of an
        // empty list, matching the other account-scoped reads.
        self.get_account(ctx, account_id, cancel).await?;
        self.invoices
            .get_by_account_id(ctx, account_id, cancel)
            .await
            .map_err(account_store_err)
    }

    #[instrument(skip(self, ctx, search, cancel), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn search_invoices(
        &self,
        ctx: &TenantContext,
        search: InvoiceSearch,
        page: Pagination,
        cancel: &CancellationToken,
    ) -> AppResult<PageResult<InvoiceSummary>> {
        self.invoices
            .search(ctx, &search, page, cancel)
            .await
            .map_err(invoice_store_err)
    }
}
