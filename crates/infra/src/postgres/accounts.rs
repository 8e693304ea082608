use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, Postgres, Row, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use rideledger_core::{
    AccountId, LedgerEntryId, TenantContext, TenantId, UserId,
};
use rideledger_events::OutboxMessage;
use rideledger_ledger::{
    Account, AccountStatus, AccountType, EntrySide, LedgerAccount, LedgerEntry, SourceType,
};

use crate::error::{map_sqlx_error, StoreError};
use crate::repository::{AccountRepository, AccountView};

use super::outbox::insert_outbox_rows;
use super::{decode_parsed, run_cancellable, PgStore};

const ACCOUNT_COLUMNS: &str =
    "id, tenant_id, name, account_type, status, currency, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, tenant_id, account_id, ledger_account, debit_amount, \
     credit_amount, currency, transaction_date, source_type, source_reference_id, metadata, \
     created_at, created_by";

#[derive(Debug)]
struct AccountRow {
    id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    name: String,
    account_type: String,
    status: String,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for AccountRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            account_type: row.try_get("account_type")?,
            status: row.try_get("status")?,
            currency: row.try_get("currency")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl AccountRow {
    fn into_view(self) -> Result<AccountView, StoreError> {
        Ok(AccountView {
            id: AccountId::from_uuid(self.id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            account_type: decode_parsed(
                AccountType::parse(&self.account_type),
                "account_type",
                &self.account_type,
            )?,
            status: decode_parsed(AccountStatus::parse(&self.status), "status", &self.status)?,
            currency: rideledger_core::Currency::new(&self.currency)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            name: self.name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug)]
pub(super) struct EntryRow {
    id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    account_id: uuid::Uuid,
    ledger_account: String,
    debit_amount: Option<Decimal>,
    credit_amount: Option<Decimal>,
    currency: String,
    transaction_date: NaiveDate,
    source_type: String,
    source_reference_id: String,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    created_by: uuid::Uuid,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for EntryRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(EntryRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            account_id: row.try_get("account_id")?,
            ledger_account: row.try_get("ledger_account")?,
            debit_amount: row.try_get("debit_amount")?,
            credit_amount: row.try_get("credit_amount")?,
            currency: row.try_get("currency")?,
            transaction_date: row.try_get("transaction_date")?,
            source_type: row.try_get("source_type")?,
            source_reference_id: row.try_get("source_reference_id")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            created_by: row.try_get("created_by")?,
        })
    }
}

impl EntryRow {
    pub(super) fn into_entry(self) -> Result<LedgerEntry, StoreError> {
        let (side, amount) = match (self.debit_amount, self.credit_amount) {
            (Some(amount), None) => (EntrySide::Debit, amount),
            (None, Some(amount)) => (EntrySide::Credit, amount),
            _ => {
                return Err(StoreError::Decode(format!(
                    "ledger entry {}: exactly one of debit/credit must be set",
                    self.id
                )));
            }
        };

        Ok(LedgerEntry::rehydrate(
            LedgerEntryId::from_uuid(self.id),
            TenantId::from_uuid(self.tenant_id),
            AccountId::from_uuid(self.account_id),
            decode_parsed(
                LedgerAccount::parse(&self.ledger_account),
                "ledger_account",
                &self.ledger_account,
            )?,
            side,
            super::decode_money(amount, &self.currency)?,
            self.transaction_date,
            decode_parsed(
                SourceType::parse(&self.source_type),
                "source_type",
                &self.source_type,
            )?,
            self.source_reference_id,
            self.metadata,
            UserId::from_uuid(self.created_by),
            self.created_at,
        ))
    }
}

async fn insert_entry_row(
    tx: &mut Transaction<'_, Postgres>,
    entry: &LedgerEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (
            id, tenant_id, account_id, ledger_account, debit_amount, credit_amount,
            currency, transaction_date, source_type, source_reference_id, metadata,
            created_at, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(entry.id().as_uuid())
    .bind(entry.tenant_id().as_uuid())
    .bind(entry.account_id().as_uuid())
    .bind(entry.ledger_account().as_str())
    .bind(entry.debit_amount().map(|m| m.amount()))
    .bind(entry.credit_amount().map(|m| m.amount()))
    .bind(entry.amount().currency().as_str())
    .bind(entry.transaction_date())
    .bind(entry.source_type().as_str())
    .bind(entry.source_reference_id())
    .bind(entry.metadata())
    .bind(entry.created_at())
    .bind(entry.created_by().as_uuid())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_ledger_entry", e))?;
    Ok(())
}

pub(super) async fn fetch_entries(
    pool: &sqlx::PgPool,
    tenant_id: TenantId,
    account_id: AccountId,
) -> Result<Vec<LedgerEntry>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
         WHERE tenant_id = $1 AND account_id = $2 \
         ORDER BY created_at ASC, id ASC"
    ))
    .bind(tenant_id.as_uuid())
    .bind(account_id.as_uuid())
    .fetch_all(pool)
    .await
    .map_err(|e| map_sqlx_error("fetch_ledger_entries", e))?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let entry = EntryRow::from_row(&row)
            .map_err(|e| StoreError::Decode(e.to_string()))?
            .into_entry()?;
        entries.push(entry);
    }
    Ok(entries)
}

#[async_trait]
impl AccountRepository for PgStore {
    #[instrument(skip(self, ctx, cancel), fields(tenant_id = %ctx.tenant_id(), account_id = %id))]
    async fn get_by_id(
        &self,
        ctx: &TenantContext,
        id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Option<AccountView>, StoreError> {
        run_cancellable(cancel, async {
            let row = sqlx::query(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE tenant_id = $1 AND id = $2"
            ))
            .bind(ctx.tenant_id().as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("account_get_by_id", e))?;

            row.map(|r| {
                AccountRow::from_row(&r)
                    .map_err(|e| StoreError::Decode(e.to_string()))?
                    .into_view()
            })
            .transpose()
        })
        .await
    }

    #[instrument(skip(self, ctx, cancel), fields(tenant_id = %ctx.tenant_id(), account_id = %id))]
    async fn get_by_id_with_entries(
        &self,
        ctx: &TenantContext,
        id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Option<Account>, StoreError> {
        run_cancellable(cancel, async {
            let Some(view) = fetch_view(&self.pool, ctx.tenant_id(), id).await? else {
                return Ok(None);
            };
            let entries = fetch_entries(&self.pool, ctx.tenant_id(), id).await?;

            Ok(Some(Account::rehydrate(
                view.id,
                view.tenant_id,
                view.name,
                view.account_type,
                view.status,
                view.currency,
                view.created_at,
                view.updated_at,
                entries,
            )))
        })
        .await
    }

    #[instrument(skip(self, ctx, cancel), fields(tenant_id = %ctx.tenant_id(), account_id = %id))]
    async fn exists(
        &self,
        ctx: &TenantContext,
        id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<bool, StoreError> {
        run_cancellable(cancel, async {
            let row = sqlx::query(
                "SELECT EXISTS (SELECT 1 FROM accounts WHERE tenant_id = $1 AND id = $2) AS present",
            )
            .bind(ctx.tenant_id().as_uuid())
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("account_exists", e))?;

            row.try_get::<bool, _>("present")
                .map_err(|e| StoreError::Decode(e.to_string()))
        })
        .await
    }

    #[instrument(
        skip(self, ctx, account, outbox, cancel),
        fields(tenant_id = %ctx.tenant_id(), account_id = %account.id())
    )]
    async fn add(
        &self,
        ctx: &TenantContext,
        account: &Account,
        outbox: &[OutboxMessage],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        run_cancellable(cancel, async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin", e))?;

            sqlx::query(
                r#"
                INSERT INTO accounts (
                    id, tenant_id, name, account_type, status, currency, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(account.id().as_uuid())
            .bind(ctx.tenant_id().as_uuid())
            .bind(account.name())
            .bind(account.account_type().as_str())
            .bind(account.status().as_str())
            .bind(account.currency().as_str())
            .bind(account.created_at())
            .bind(account.updated_at())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_account", e))?;

            for entry in account.entries() {
                insert_entry_row(&mut tx, entry).await?;
            }
            insert_outbox_rows(&mut tx, outbox).await?;

            tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
        })
        .await
    }

    #[instrument(
        skip(self, ctx, account, outbox, cancel),
        fields(
            tenant_id = %ctx.tenant_id(),
            account_id = %account.id(),
            new_entries = account.uncommitted_entries().len()
        )
    )]
    async fn update(
        &self,
        ctx: &TenantContext,
        account: &Account,
        outbox: &[OutboxMessage],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        run_cancellable(cancel, async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin", e))?;

            let updated = sqlx::query(
                r#"
                UPDATE accounts
                SET name = $3, account_type = $4, status = $5, updated_at = $6
                WHERE tenant_id = $1 AND id = $2
                "#,
            )
            .bind(ctx.tenant_id().as_uuid())
            .bind(account.id().as_uuid())
            .bind(account.name())
            .bind(account.account_type().as_str())
            .bind(account.status().as_str())
            .bind(account.updated_at())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_account", e))?;

            if updated.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }

            // Entries are immutable: only the ids appended since load are
            // inserted. A plain INSERT makes re-persisting an existing entry
            // fail on the primary key instead of silently rewriting history.
            for entry in account.uncommitted_entries() {
                insert_entry_row(&mut tx, entry).await?;
            }
            insert_outbox_rows(&mut tx, outbox).await?;

            tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
        })
        .await
    }
}

async fn fetch_view(
    pool: &sqlx::PgPool,
    tenant_id: TenantId,
    id: AccountId,
) -> Result<Option<AccountView>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(tenant_id.as_uuid())
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await
    .map_err(|e| map_sqlx_error("account_get_by_id", e))?;

    row.map(|r| {
        AccountRow::from_row(&r)
            .map_err(|e| StoreError::Decode(e.to_string()))?
            .into_view()
    })
    .transpose()
}
