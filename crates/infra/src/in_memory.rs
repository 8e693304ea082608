//! In-memory store for tests/dev.
//!
//! Implements every repository trait with the same observable behavior as
//! the Postgres store, including the uniqueness backstops: violations carry
//! the same constraint names, so handler translation is exercised without a
//! database. Not optimized for performance.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use rideledger_core::{
    AccountId, InvoiceId, LedgerEntryId, MessageId, PageResult, Pagination, TenantContext,
    TenantId,
};
use rideledger_events::OutboxMessage;
use rideledger_invoicing::{Invoice, InvoiceNumber};
use rideledger_ledger::{Account, EntrySide, LedgerAccount, LedgerEntry, SourceType};

use crate::error::{constraints, StoreError};
use crate::repository::{
    AccountRepository, AccountView, InvoiceRepository, InvoiceSearch, InvoiceSummary,
    LedgerEntryView, LedgerQueries, OutboxStore, TransactionFilter,
};

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<(TenantId, AccountId), Account>,
    invoices: HashMap<(TenantId, InvoiceId), Invoice>,
    outbox: Vec<OutboxMessage>,
    /// Cash-debit payment references, global across tenants and accounts.
    payment_debits: HashMap<String, LedgerEntryId>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_poisoned() -> StoreError {
    StoreError::Database("lock poisoned".to_string())
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        return Err(StoreError::Canceled);
    }
    Ok(())
}

/// Mirror of the partial-unique indexes: one AR-side ride debit per
/// `(account, reference)`, one cash payment debit per reference globally,
/// and entry immutability (an id is inserted at most once).
fn check_entry_constraints(
    inner: &Inner,
    stored: Option<&Account>,
    new_entries: &[&LedgerEntry],
) -> Result<(), StoreError> {
    for entry in new_entries {
        if let Some(existing) = stored.and_then(|a| a.entry(entry.id())) {
            return Err(StoreError::Database(format!(
                "ledger entry {} already persisted; entries are immutable (existing: {:?})",
                entry.id(),
                existing.source_reference_id()
            )));
        }

        if entry.side() != EntrySide::Debit {
            continue;
        }
        match entry.source_type() {
            SourceType::Ride => {
                let duplicate = stored.is_some_and(|a| {
                    a.entries().any(|e| {
                        e.source_type() == SourceType::Ride
                            && e.side() == EntrySide::Debit
                            && e.source_reference_id() == entry.source_reference_id()
                    })
                });
                if duplicate {
                    return Err(StoreError::UniqueViolation {
                        constraint: constraints::RIDE_SOURCE.to_string(),
                    });
                }
            }
            SourceType::Payment => {
                if inner
                    .payment_debits
                    .contains_key(entry.source_reference_id())
                {
                    return Err(StoreError::UniqueViolation {
                        constraint: constraints::PAYMENT_SOURCE.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn register_payment_debits(inner: &mut Inner, entries: &[&LedgerEntry]) {
    for entry in entries {
        if entry.source_type() == SourceType::Payment && entry.side() == EntrySide::Debit {
            inner
                .payment_debits
                .insert(entry.source_reference_id().to_string(), entry.id());
        }
    }
}

fn committed_copy(account: &Account, entries: Vec<LedgerEntry>) -> Account {
    Account::rehydrate(
        account.id(),
        account.tenant_id(),
        account.name().to_string(),
        account.account_type(),
        account.status(),
        account.currency().clone(),
        account.created_at(),
        account.updated_at(),
        entries,
    )
}

fn paginate<T: Clone>(items: &[T], page: Pagination) -> Vec<T> {
    items
        .iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl AccountRepository for InMemoryStore {
    async fn get_by_id(
        &self,
        ctx: &TenantContext,
        id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Option<AccountView>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner
            .accounts
            .get(&(ctx.tenant_id(), id))
            .map(AccountView::from))
    }

    async fn get_by_id_with_entries(
        &self,
        ctx: &TenantContext,
        id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Option<Account>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner.accounts.get(&(ctx.tenant_id(), id)).cloned())
    }

    async fn exists(
        &self,
        ctx: &TenantContext,
        id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner.accounts.contains_key(&(ctx.tenant_id(), id)))
    }

    async fn add(
        &self,
        ctx: &TenantContext,
        account: &Account,
        outbox: &[OutboxMessage],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        ensure_not_cancelled(cancel)?;
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;

        let key = (ctx.tenant_id(), account.id());
        if inner.accounts.contains_key(&key) {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::ACCOUNT_PK.to_string(),
            });
        }

        let entries: Vec<&LedgerEntry> = account.entries().collect();
        check_entry_constraints(&inner, None, &entries)?;
        register_payment_debits(&mut inner, &entries);

        let stored = committed_copy(account, account.entries().cloned().collect());
        inner.accounts.insert(key, stored);
        inner.outbox.extend_from_slice(outbox);
        Ok(())
    }

    async fn update(
        &self,
        ctx: &TenantContext,
        account: &Account,
        outbox: &[OutboxMessage],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        ensure_not_cancelled(cancel)?;
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;

        let key = (ctx.tenant_id(), account.id());
        let stored = inner.accounts.get(&key).ok_or(StoreError::NotFound)?;

        let new_entries = account.uncommitted_entries();
        check_entry_constraints(&inner, Some(stored), &new_entries)?;

        // Upsert semantics: keep every already-stored entry, append only the
        // new ones. Existing rows are never rewritten.
        let mut merged: Vec<LedgerEntry> = stored.entries().cloned().collect();
        merged.extend(new_entries.iter().map(|e| (*e).clone()));

        register_payment_debits(&mut inner, &new_entries);
        let replacement = committed_copy(account, merged);
        inner.accounts.insert(key, replacement);
        inner.outbox.extend_from_slice(outbox);
        Ok(())
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryStore {
    async fn get_by_id(
        &self,
        ctx: &TenantContext,
        id: InvoiceId,
        cancel: &CancellationToken,
    ) -> Result<Option<InvoiceSummary>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner
            .invoices
            .get(&(ctx.tenant_id(), id))
            .map(InvoiceSummary::from))
    }

    async fn get_by_id_with_line_items(
        &self,
        ctx: &TenantContext,
        id: InvoiceId,
        cancel: &CancellationToken,
    ) -> Result<Option<Invoice>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner.invoices.get(&(ctx.tenant_id(), id)).cloned())
    }

    async fn get_by_invoice_number(
        &self,
        ctx: &TenantContext,
        number: InvoiceNumber,
        cancel: &CancellationToken,
    ) -> Result<Option<Invoice>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner
            .invoices
            .iter()
            .find(|((tenant, _), invoice)| {
                *tenant == ctx.tenant_id() && invoice.invoice_number() == number
            })
            .map(|(_, invoice)| invoice.clone()))
    }

    async fn get_by_account_id(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Vec<InvoiceSummary>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        let mut summaries: Vec<InvoiceSummary> = inner
            .invoices
            .iter()
            .filter(|((tenant, _), invoice)| {
                *tenant == ctx.tenant_id() && invoice.account_id() == account_id
            })
            .map(|(_, invoice)| InvoiceSummary::from(invoice))
            .collect();
        summaries.sort_by(|a, b| {
            (b.generated_at, b.invoice_number).cmp(&(a.generated_at, a.invoice_number))
        });
        Ok(summaries)
    }

    async fn search(
        &self,
        ctx: &TenantContext,
        search: &InvoiceSearch,
        page: Pagination,
        cancel: &CancellationToken,
    ) -> Result<PageResult<InvoiceSummary>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;

        let mut matches: Vec<InvoiceSummary> = inner
            .invoices
            .iter()
            .filter(|((tenant, _), _)| *tenant == ctx.tenant_id())
            .map(|(_, invoice)| invoice)
            .filter(|invoice| {
                search
                    .account_id
                    .is_none_or(|id| invoice.account_id() == id)
                    && search.status.is_none_or(|s| invoice.status() == s)
                    && search
                        .period_start
                        .is_none_or(|start| invoice.period_end() > start)
                    && search
                        .period_end
                        .is_none_or(|end| invoice.period_start() < end)
            })
            .map(InvoiceSummary::from)
            .collect();
        matches.sort_by(|a, b| {
            (b.generated_at, b.invoice_number).cmp(&(a.generated_at, a.invoice_number))
        });

        let total = matches.len() as u64;
        Ok(PageResult::new(paginate(&matches, page), page, total))
    }

    async fn latest_invoice_number(
        &self,
        ctx: &TenantContext,
        cancel: &CancellationToken,
    ) -> Result<Option<InvoiceNumber>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        Ok(inner
            .invoices
            .iter()
            .filter(|((tenant, _), _)| *tenant == ctx.tenant_id())
            .map(|(_, invoice)| (invoice.generated_at(), invoice.invoice_number()))
            .max()
            .map(|(_, number)| number))
    }

    async fn add(
        &self,
        ctx: &TenantContext,
        invoice: &Invoice,
        outbox: &[OutboxMessage],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        ensure_not_cancelled(cancel)?;
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;

        let key = (ctx.tenant_id(), invoice.id());
        if inner.invoices.contains_key(&key) {
            return Err(StoreError::Database(format!(
                "invoice {} already exists",
                invoice.id()
            )));
        }

        let number_taken = inner.invoices.iter().any(|((tenant, _), existing)| {
            *tenant == ctx.tenant_id() && existing.invoice_number() == invoice.invoice_number()
        });
        if number_taken {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::INVOICE_NUMBER.to_string(),
            });
        }

        inner.invoices.insert(key, invoice.clone());
        inner.outbox.extend_from_slice(outbox);
        Ok(())
    }

    async fn update(
        &self,
        ctx: &TenantContext,
        invoice: &Invoice,
        outbox: &[OutboxMessage],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        ensure_not_cancelled(cancel)?;
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;

        let key = (ctx.tenant_id(), invoice.id());
        if !inner.invoices.contains_key(&key) {
            return Err(StoreError::NotFound);
        }
        inner.invoices.insert(key, invoice.clone());
        inner.outbox.extend_from_slice(outbox);
        Ok(())
    }
}

#[async_trait]
impl LedgerQueries for InMemoryStore {
    async fn transactions(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        filter: TransactionFilter,
        page: Pagination,
        cancel: &CancellationToken,
    ) -> Result<PageResult<LedgerEntryView>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        let account = inner
            .accounts
            .get(&(ctx.tenant_id(), account_id))
            .ok_or(StoreError::NotFound)?;

        let mut rows: Vec<LedgerEntryView> = account
            .entries()
            .filter(|e| {
                filter
                    .start_date
                    .is_none_or(|start| e.transaction_date() >= start)
                    && filter.end_date.is_none_or(|end| e.transaction_date() <= end)
            })
            .map(LedgerEntryView::from)
            .collect();
        rows.sort_by(|a, b| {
            (b.transaction_date, b.created_at, b.id).cmp(&(a.transaction_date, a.created_at, a.id))
        });

        let total = rows.len() as u64;
        Ok(PageResult::new(paginate(&rows, page), page, total))
    }

    async fn receivable_entries(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Vec<LedgerEntryView>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        let account = inner
            .accounts
            .get(&(ctx.tenant_id(), account_id))
            .ok_or(StoreError::NotFound)?;

        let mut rows: Vec<LedgerEntryView> = account
            .entries()
            .filter(|e| {
                e.ledger_account() == LedgerAccount::AccountsReceivable
                    && e.transaction_date() >= start
                    && e.transaction_date() <= end
            })
            .map(LedgerEntryView::from)
            .collect();
        rows.sort_by(|a, b| {
            (a.transaction_date, a.created_at, a.id).cmp(&(b.transaction_date, b.created_at, b.id))
        });
        Ok(rows)
    }

    async fn receivable_balance(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        before: Option<NaiveDate>,
        cancel: &CancellationToken,
    ) -> Result<Decimal, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        let account = inner
            .accounts
            .get(&(ctx.tenant_id(), account_id))
            .ok_or(StoreError::NotFound)?;

        let sum = account
            .entries()
            .filter(|e| {
                e.ledger_account() == LedgerAccount::AccountsReceivable
                    && before.is_none_or(|cutoff| e.transaction_date() < cutoff)
            })
            .map(|e| e.effective_amount())
            .sum();
        Ok(sum)
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn fetch_unprocessed(
        &self,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let inner = self.inner.read().map_err(|_| lock_poisoned())?;
        let mut pending: Vec<OutboxMessage> = inner
            .outbox
            .iter()
            .filter(|m| !m.is_processed())
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.occurred_at());
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn mark_processed(
        &self,
        message_id: MessageId,
        processed_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        ensure_not_cancelled(cancel)?;
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        let message = inner
            .outbox
            .iter_mut()
            .find(|m| m.message_id() == message_id)
            .ok_or(StoreError::NotFound)?;
        *message = OutboxMessage::rehydrate(
            message.message_id(),
            message.tenant_id(),
            message.event_type().to_string(),
            message.payload().clone(),
            message.occurred_at(),
            Some(processed_at),
            message.retry_count(),
        );
        Ok(())
    }

    async fn record_failure(
        &self,
        message_id: MessageId,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        ensure_not_cancelled(cancel)?;
        let mut inner = self.inner.write().map_err(|_| lock_poisoned())?;
        let message = inner
            .outbox
            .iter_mut()
            .find(|m| m.message_id() == message_id)
            .ok_or(StoreError::NotFound)?;
        *message = OutboxMessage::rehydrate(
            message.message_id(),
            message.tenant_id(),
            message.event_type().to_string(),
            message.payload().clone(),
            message.occurred_at(),
            message.processed_at(),
            message.retry_count() + 1,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rideledger_core::{Currency, Money, UserId};
    use rideledger_ledger::AccountType;

    fn ctx() -> TenantContext {
        TenantContext::new(TenantId::new(), UserId::new())
    }

    fn usd(s: &str) -> Money {
        Money::new(s.parse().unwrap(), Currency::usd()).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn open_account(ctx: &TenantContext) -> (Account, OutboxMessage) {
        let (account, event) = Account::open(
            AccountId::new(),
            ctx.tenant_id(),
            "Acme",
            AccountType::Organization,
            Currency::usd(),
            Utc::now(),
        )
        .unwrap();
        let message = OutboxMessage::from_event(&event).unwrap();
        (account, message)
    }

    #[tokio::test]
    async fn concurrent_style_duplicate_charge_hits_ride_backstop() {
        let store = InMemoryStore::new();
        let ctx = ctx();
        let cancel = CancellationToken::new();

        let (account, opened) = open_account(&ctx);
        AccountRepository::add(&store, &ctx, &account, &[opened], &cancel).await.unwrap();

        // Two handlers load the same snapshot and both record ride R-1.
        let mut first = store
            .get_by_id_with_entries(&ctx, account.id(), &cancel)
            .await
            .unwrap()
            .unwrap();
        let mut second = first.clone();

        first
            .record_charge("R-1", usd("10"), date("2026-03-01"), "F1", ctx.user_id(), Utc::now())
            .unwrap();
        AccountRepository::update(&store, &ctx, &first, &[], &cancel).await.unwrap();

        second
            .record_charge("R-1", usd("10"), date("2026-03-01"), "F1", ctx.user_id(), Utc::now())
            .unwrap();
        let err = AccountRepository::update(&store, &ctx, &second, &[], &cancel).await.unwrap_err();
        match err {
            StoreError::UniqueViolation { constraint } => {
                assert_eq!(constraint, constraints::RIDE_SOURCE);
            }
            other => panic!("expected unique violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn payment_reference_is_unique_across_accounts() {
        let store = InMemoryStore::new();
        let ctx = ctx();
        let cancel = CancellationToken::new();

        let (mut a, opened_a) = open_account(&ctx);
        let (mut b, opened_b) = open_account(&ctx);
        AccountRepository::add(&store, &ctx, &a, &[opened_a], &cancel).await.unwrap();
        AccountRepository::add(&store, &ctx, &b, &[opened_b], &cancel).await.unwrap();

        a.record_payment("P-1", usd("5"), date("2026-03-01"), None, ctx.user_id(), Utc::now())
            .unwrap();
        AccountRepository::update(&store, &ctx, &a, &[], &cancel).await.unwrap();

        b.record_payment("P-1", usd("5"), date("2026-03-01"), None, ctx.user_id(), Utc::now())
            .unwrap();
        let err = AccountRepository::update(&store, &ctx, &b, &[], &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation { constraint } if constraint == constraints::PAYMENT_SOURCE
        ));
    }

    #[tokio::test]
    async fn reads_are_tenant_isolated() {
        let store = InMemoryStore::new();
        let owner = ctx();
        let other = ctx();
        let cancel = CancellationToken::new();

        let (account, opened) = open_account(&owner);
        AccountRepository::add(&store, &owner, &account, &[opened], &cancel).await.unwrap();

        assert!(AccountRepository::get_by_id(&store, &owner, account.id(), &cancel)
            .await
            .unwrap()
            .is_some());
        assert!(AccountRepository::get_by_id(&store, &other, account.id(), &cancel)
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            store
                .receivable_balance(&other, account.id(), None, &cancel)
                .await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn outbox_lifecycle_marks_and_retries() {
        let store = InMemoryStore::new();
        let ctx = ctx();
        let cancel = CancellationToken::new();

        let (account, opened) = open_account(&ctx);
        let id = opened.message_id();
        assert_eq!(opened.event_type(), "ledger.account.opened");
        AccountRepository::add(&store, &ctx, &account, &[opened], &cancel).await.unwrap();

        let pending = store.fetch_unprocessed(10, &cancel).await.unwrap();
        assert_eq!(pending.len(), 1);

        store.record_failure(id, &cancel).await.unwrap();
        store.mark_processed(id, Utc::now(), &cancel).await.unwrap();

        let drained = store.fetch_unprocessed(10, &cancel).await.unwrap();
        assert!(drained.is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_fails_fast() {
        let store = InMemoryStore::new();
        let ctx = ctx();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = AccountRepository::get_by_id(&store, &ctx, AccountId::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Canceled));
    }
}
