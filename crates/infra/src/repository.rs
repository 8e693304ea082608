//! Tenant-scoped repository traits and read models.
//!
//! Every operation takes the current [`TenantContext`] explicitly and filters
//! or writes under that tenant's predicate, and a [`CancellationToken`] that
//! aborts in-flight work with [`StoreError::Canceled`]. Write methods accept
//! the outbox rows to co-commit with the state change.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use rideledger_core::{
    AccountId, Currency, InvoiceId, LedgerEntryId, MessageId, PageResult, Pagination,
    TenantContext, TenantId,
};
use rideledger_events::OutboxMessage;
use rideledger_invoicing::{
    BillingFrequency, Invoice, InvoiceNumber, InvoiceStatus,
};
use rideledger_ledger::{
    Account, AccountStatus, AccountType, EntrySide, LedgerAccount, LedgerEntry, SourceType,
};

use crate::error::StoreError;

/// Header-only account read model for queries that do not need entries.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountView {
    pub id: AccountId,
    pub tenant_id: TenantId,
    pub name: String,
    pub account_type: AccountType,
    pub status: AccountStatus,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id(),
            tenant_id: account.tenant_id(),
            name: account.name().to_string(),
            account_type: account.account_type(),
            status: account.status(),
            currency: account.currency().clone(),
            created_at: account.created_at(),
            updated_at: account.updated_at(),
        }
    }
}

/// Entry row for transaction listings and statements.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntryView {
    pub id: LedgerEntryId,
    pub account_id: AccountId,
    pub ledger_account: LedgerAccount,
    pub side: EntrySide,
    pub amount: Decimal,
    pub currency: Currency,
    pub transaction_date: NaiveDate,
    pub source_type: SourceType,
    pub source_reference_id: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntryView {
    /// Signed amount: positive for debits, negative for credits.
    pub fn effective_amount(&self) -> Decimal {
        match self.side {
            EntrySide::Debit => self.amount,
            EntrySide::Credit => -self.amount,
        }
    }
}

impl From<&LedgerEntry> for LedgerEntryView {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id(),
            account_id: entry.account_id(),
            ledger_account: entry.ledger_account(),
            side: entry.side(),
            amount: entry.amount().amount(),
            currency: entry.amount().currency().clone(),
            transaction_date: entry.transaction_date(),
            source_type: entry.source_type(),
            source_reference_id: entry.source_reference_id().to_string(),
            created_at: entry.created_at(),
        }
    }
}

/// Invoice header row for listings and search results.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceSummary {
    pub id: InvoiceId,
    pub account_id: AccountId,
    pub invoice_number: InvoiceNumber,
    pub frequency: BillingFrequency,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub status: InvoiceStatus,
    pub subtotal: Decimal,
    pub total_payments_applied: Decimal,
    pub outstanding_balance: Decimal,
    pub currency: Currency,
}

impl From<&Invoice> for InvoiceSummary {
    fn from(invoice: &Invoice) -> Self {
        Self {
            id: invoice.id(),
            account_id: invoice.account_id(),
            invoice_number: invoice.invoice_number(),
            frequency: invoice.frequency(),
            period_start: invoice.period_start(),
            period_end: invoice.period_end(),
            generated_at: invoice.generated_at(),
            status: invoice.status(),
            subtotal: invoice.subtotal().amount(),
            total_payments_applied: invoice.total_payments_applied().amount(),
            outstanding_balance: invoice.outstanding_balance().amount(),
            currency: invoice.currency().clone(),
        }
    }
}

/// Invoice search filter. A date range matches invoices whose billing period
/// overlaps `[period_start, period_end)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvoiceSearch {
    pub account_id: Option<AccountId>,
    pub status: Option<InvoiceStatus>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}

/// Optional inclusive date bounds for transaction listings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransactionFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Account persistence, tenant-scoped.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get_by_id(
        &self,
        ctx: &TenantContext,
        id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Option<AccountView>, StoreError>;

    async fn get_by_id_with_entries(
        &self,
        ctx: &TenantContext,
        id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Option<Account>, StoreError>;

    async fn exists(
        &self,
        ctx: &TenantContext,
        id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError>;

    /// Insert a new account and its outbox rows in one transaction.
    async fn add(
        &self,
        ctx: &TenantContext,
        account: &Account,
        outbox: &[OutboxMessage],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    /// Persist an updated aggregate: rewrite the header, insert only the
    /// aggregate's uncommitted entries (entries are immutable; re-inserting
    /// an existing entry id fails loudly), and co-commit the outbox rows.
    async fn update(
        &self,
        ctx: &TenantContext,
        account: &Account,
        outbox: &[OutboxMessage],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;
}

/// Invoice persistence, tenant-scoped.
#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn get_by_id(
        &self,
        ctx: &TenantContext,
        id: InvoiceId,
        cancel: &CancellationToken,
    ) -> Result<Option<InvoiceSummary>, StoreError>;

    async fn get_by_id_with_line_items(
        &self,
        ctx: &TenantContext,
        id: InvoiceId,
        cancel: &CancellationToken,
    ) -> Result<Option<Invoice>, StoreError>;

    async fn get_by_invoice_number(
        &self,
        ctx: &TenantContext,
        number: InvoiceNumber,
        cancel: &CancellationToken,
    ) -> Result<Option<Invoice>, StoreError>;

    async fn get_by_account_id(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Vec<InvoiceSummary>, StoreError>;

    async fn search(
        &self,
        ctx: &TenantContext,
        search: &InvoiceSearch,
        page: Pagination,
        cancel: &CancellationToken,
    ) -> Result<PageResult<InvoiceSummary>, StoreError>;

    /// Number of the most recently generated invoice for the tenant, if any.
    /// Input to read-max-then-increment numbering.
    async fn latest_invoice_number(
        &self,
        ctx: &TenantContext,
        cancel: &CancellationToken,
    ) -> Result<Option<InvoiceNumber>, StoreError>;

    /// Insert the invoice, its line items and outbox rows in one
    /// transaction. A number collision surfaces as `UniqueViolation`.
    async fn add(
        &self,
        ctx: &TenantContext,
        invoice: &Invoice,
        outbox: &[OutboxMessage],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    /// Persist a status transition (void). Line items are never rewritten.
    async fn update(
        &self,
        ctx: &TenantContext,
        invoice: &Invoice,
        outbox: &[OutboxMessage],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;
}

/// Non-tracking read paths used by queries. Same tenant predicate as the
/// repositories; no aggregate loading. Operations against an account that
/// does not exist under the tenant fail with [`StoreError::NotFound`].
#[async_trait]
pub trait LedgerQueries: Send + Sync {
    /// Entry rows for an account, newest first.
    async fn transactions(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        filter: TransactionFilter,
        page: Pagination,
        cancel: &CancellationToken,
    ) -> Result<PageResult<LedgerEntryView>, StoreError>;

    /// AccountsReceivable rows in `[start, end]`, oldest first, for
    /// statement assembly.
    async fn receivable_entries(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Vec<LedgerEntryView>, StoreError>;

    /// Signed AccountsReceivable sum as a single aggregation. `before`
    /// bounds the sum to `transaction_date < before`; `None` sums the full
    /// history.
    async fn receivable_balance(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        before: Option<NaiveDate>,
        cancel: &CancellationToken,
    ) -> Result<Decimal, StoreError>;
}

/// Relay-facing outbox operations. Inserts happen only inside repository
/// write transactions; the relay drains and marks rows here.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Unprocessed messages ordered by `occurred_at`, oldest first.
    async fn fetch_unprocessed(
        &self,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<OutboxMessage>, StoreError>;

    async fn mark_processed(
        &self,
        message_id: MessageId,
        processed_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    /// Record a dispatch failure by incrementing the retry counter.
    async fn record_failure(
        &self,
        message_id: MessageId,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;
}
