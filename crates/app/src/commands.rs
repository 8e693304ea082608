//! Command handlers.
//!
//! Flow: resolve context → load aggregate → domain operation → persist with
//! outbox rows in one transaction → translate unique-violation backstops
//! into the matching idempotency errors.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use rideledger_core::{
    AccountId, DomainError, InvoiceId, LedgerEntryId, Money, TenantContext,
};
use rideledger_events::OutboxMessage;
use rideledger_infra::{constraints, StoreError};
use rideledger_invoicing::{BillingFrequency, Invoice, InvoiceNumber};
use rideledger_ledger::{Account, AccountStatus, AccountType};

use crate::error::{account_store_err, invoice_store_err, AppError, AppResult};
use crate::service::LedgerService;

/// Attempts at reserving an invoice number before giving up. Collisions only
/// happen under concurrent generation for the same tenant.
const NUMBERING_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccount {
    pub account_id: Uuid,
    pub name: String,
    pub account_type: AccountType,
    /// Defaults to the service's configured currency (USD) when absent.
    pub currency: Option<rideledger_core::Currency>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordCharge {
    pub account_id: AccountId,
    pub ride_id: String,
    pub amount: Decimal,
    pub service_date: NaiveDate,
    pub fleet_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPayment {
    pub account_id: AccountId,
    pub payment_reference_id: String,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub payment_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeactivateAccount {
    pub account_id: AccountId,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateInvoice {
    pub account_id: AccountId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub frequency: BillingFrequency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoidInvoice {
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
}

/// Outcome of a successful charge: the two created entries and the balance
/// after the posting.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeResult {
    pub entry_ids: [LedgerEntryId; 2],
    pub balance: Money,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentResult {
    pub entry_ids: [LedgerEntryId; 2],
    pub balance: Money,
}

impl LedgerService {
    #[instrument(skip(self, ctx, cmd, cancel), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn create_account(
        &self,
        ctx: &TenantContext,
        cmd: CreateAccount,
        cancel: &CancellationToken,
    ) -> AppResult<AccountId> {
        let id = AccountId::try_from_uuid(cmd.account_id)?;
        let currency = cmd.currency.unwrap_or_else(|| self.default_currency.clone());

        let (account, event) = Account::open(
            id,
            ctx.tenant_id(),
            &cmd.name,
            cmd.account_type,
            currency,
            Utc::now(),
        )?;
        let outbox = outbox_row(&event)?;

        match self.accounts.add(ctx, &account, &[outbox], cancel).await {
            Ok(()) => Ok(id),
            Err(StoreError::UniqueViolation { .. }) => {
                Err(DomainError::AccountAlreadyExists.into())
            }
            Err(other) => Err(other.into()),
        }
    }

    #[instrument(
        skip(self, ctx, cmd, cancel),
        fields(tenant_id = %ctx.tenant_id(), account_id = %cmd.account_id, ride_id = %cmd.ride_id)
    )]
    pub async fn record_charge(
        &self,
        ctx: &TenantContext,
        cmd: RecordCharge,
        cancel: &CancellationToken,
    ) -> AppResult<ChargeResult> {
        let mut account = self.load_account(ctx, cmd.account_id, cancel).await?;
        let amount = Money::new(cmd.amount, account.currency().clone())?;

        let event = account.record_charge(
            &cmd.ride_id,
            amount,
            cmd.service_date,
            &cmd.fleet_id,
            ctx.user_id(),
            Utc::now(),
        )?;
        let outbox = outbox_row(&event)?;

        match self.accounts.update(ctx, &account, &[outbox], cancel).await {
            Ok(()) => {
                account.mark_entries_committed();
                Ok(ChargeResult {
                    entry_ids: event.entry_ids,
                    balance: account.balance()?,
                })
            }
            // Concurrent-retry backstop: the partial-unique index caught a
            // duplicate this aggregate instance never saw.
            Err(StoreError::UniqueViolation { constraint })
                if constraint == constraints::RIDE_SOURCE =>
            {
                Err(DomainError::DuplicateCharge {
                    ride_id: cmd.ride_id,
                    existing_entry_ids: vec![],
                }
                .into())
            }
            Err(other) => Err(account_store_err(other)),
        }
    }

    #[instrument(
        skip(self, ctx, cmd, cancel),
        fields(
            tenant_id = %ctx.tenant_id(),
            account_id = %cmd.account_id,
            reference = %cmd.payment_reference_id
        )
    )]
    pub async fn record_payment(
        &self,
        ctx: &TenantContext,
        cmd: RecordPayment,
        cancel: &CancellationToken,
    ) -> AppResult<PaymentResult> {
        let mut account = self.load_account(ctx, cmd.account_id, cancel).await?;
        let amount = Money::new(cmd.amount, account.currency().clone())?;

        let event = account.record_payment(
            &cmd.payment_reference_id,
            amount,
            cmd.payment_date,
            cmd.payment_mode.as_deref(),
            ctx.user_id(),
            Utc::now(),
        )?;
        let outbox = outbox_row(&event)?;

        match self.accounts.update(ctx, &account, &[outbox], cancel).await {
            Ok(()) => {
                account.mark_entries_committed();
                Ok(PaymentResult {
                    entry_ids: event.entry_ids,
                    balance: account.balance()?,
                })
            }
            Err(StoreError::UniqueViolation { constraint })
                if constraint == constraints::PAYMENT_SOURCE =>
            {
                Err(DomainError::DuplicatePayment {
                    reference: cmd.payment_reference_id,
                    existing_entry_ids: vec![],
                }
                .into())
            }
            Err(other) => Err(account_store_err(other)),
        }
    }

    /// Idempotent: deactivating an already-inactive account succeeds without
    /// a state change or an event.
    #[instrument(
        skip(self, ctx, cmd, cancel),
        fields(tenant_id = %ctx.tenant_id(), account_id = %cmd.account_id)
    )]
    pub async fn deactivate_account(
        &self,
        ctx: &TenantContext,
        cmd: DeactivateAccount,
        cancel: &CancellationToken,
    ) -> AppResult<AccountStatus> {
        let mut account = self.load_account(ctx, cmd.account_id, cancel).await?;

        let Some(event) = account.deactivate(cmd.reason, Utc::now()) else {
            return Ok(AccountStatus::Inactive);
        };
        let outbox = outbox_row(&event)?;

        self.accounts
            .update(ctx, &account, &[outbox], cancel)
            .await
            .map_err(account_store_err)?;
        Ok(account.status())
    }

    #[instrument(
        skip(self, ctx, cmd, cancel),
        fields(tenant_id = %ctx.tenant_id(), account_id = %cmd.account_id)
    )]
    pub async fn generate_invoice(
        &self,
        ctx: &TenantContext,
        cmd: GenerateInvoice,
        cancel: &CancellationToken,
    ) -> AppResult<Invoice> {
        if cmd.period_start >= cmd.period_end {
            return Err(DomainError::invalid_date_range(format!(
                "period start {} must be before period end {}",
                cmd.period_start, cmd.period_end
            ))
            .into());
        }

        let account = self.load_account(ctx, cmd.account_id, cancel).await?;

        // Read-max-then-increment numbering. A concurrent generation for the
        // same tenant collides on the unique index; retry with the next
        // value. Numbers lost to rolled-back attempts stay as gaps.
        for _ in 0..NUMBERING_ATTEMPTS {
            let latest = retry_latest_number(self, ctx, cancel).await?;
            let number = latest
                .map(|n| n.next())
                .unwrap_or_else(InvoiceNumber::first);

            let (invoice, event) = Invoice::generate(
                &account,
                number,
                cmd.frequency,
                cmd.period_start,
                cmd.period_end,
                Utc::now(),
            )?;
            let outbox = outbox_row(&event)?;

            match self.invoices.add(ctx, &invoice, &[outbox], cancel).await {
                Ok(()) => return Ok(invoice),
                Err(StoreError::UniqueViolation { constraint })
                    if constraint == constraints::INVOICE_NUMBER =>
                {
                    tracing::debug!(%number, "invoice number collision, retrying");
                    continue;
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(DomainError::InvoiceAlreadyExists.into())
    }

    #[instrument(
        skip(self, ctx, cmd, cancel),
        fields(tenant_id = %ctx.tenant_id(), invoice_id = %cmd.invoice_id)
    )]
    pub async fn void_invoice(
        &self,
        ctx: &TenantContext,
        cmd: VoidInvoice,
        cancel: &CancellationToken,
    ) -> AppResult<Invoice> {
        let mut invoice = self
            .invoices
            .get_by_id_with_line_items(ctx, cmd.invoice_id, cancel)
            .await
            .map_err(invoice_store_err)?
            .ok_or(DomainError::InvoiceNotFound)?;
        if invoice.tenant_id() != ctx.tenant_id() {
            return Err(DomainError::TenantMismatch.into());
        }

        let event = invoice.void(cmd.reason, Utc::now())?;
        let outbox = outbox_row(&event)?;

        self.invoices
            .update(ctx, &invoice, &[outbox], cancel)
            .await
            .map_err(invoice_store_err)?;
        Ok(invoice)
    }
}

fn outbox_row<E>(event: &E) -> AppResult<OutboxMessage>
where
    E: rideledger_events::Event + rideledger_events::TenantScoped + serde::Serialize,
{
    OutboxMessage::from_event(event).map_err(|e| AppError::Infrastructure(e.to_string()))
}

async fn retry_latest_number(
    service: &LedgerService,
    ctx: &TenantContext,
    cancel: &CancellationToken,
) -> AppResult<Option<InvoiceNumber>> {
    rideledger_infra::retry_transient(service.retry, cancel, || {
        service.invoices.latest_invoice_number(ctx, cancel)
    })
    .await
    .map_err(AppError::from)
}
