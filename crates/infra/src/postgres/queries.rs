use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, Row};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use rideledger_core::{
    AccountId, LedgerEntryId, PageResult, Pagination, TenantContext,
};
use rideledger_ledger::{EntrySide, LedgerAccount, SourceType};

use crate::error::{map_sqlx_error, StoreError};
use crate::repository::{LedgerEntryView, LedgerQueries, TransactionFilter};

use super::{decode_parsed, run_cancellable, PgStore};

const VIEW_COLUMNS: &str = "id, account_id, ledger_account, debit_amount, credit_amount, \
     currency, transaction_date, source_type, source_reference_id, created_at";

#[derive(Debug)]
struct EntryViewRow {
    id: uuid::Uuid,
    account_id: uuid::Uuid,
    ledger_account: String,
    debit_amount: Option<Decimal>,
    credit_amount: Option<Decimal>,
    currency: String,
    transaction_date: NaiveDate,
    source_type: String,
    source_reference_id: String,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for EntryViewRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(EntryViewRow {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            ledger_account: row.try_get("ledger_account")?,
            debit_amount: row.try_get("debit_amount")?,
            credit_amount: row.try_get("credit_amount")?,
            currency: row.try_get("currency")?,
            transaction_date: row.try_get("transaction_date")?,
            source_type: row.try_get("source_type")?,
            source_reference_id: row.try_get("source_reference_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl EntryViewRow {
    fn into_view(self) -> Result<LedgerEntryView, StoreError> {
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

        Ok(LedgerEntryView {
            id: LedgerEntryId::from_uuid(self.id),
            account_id: AccountId::from_uuid(self.account_id),
            ledger_account: decode_parsed(
                LedgerAccount::parse(&self.ledger_account),
                "ledger_account",
                &self.ledger_account,
            )?,
            side,
            amount,
            currency: rideledger_core::Currency::new(&self.currency)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            transaction_date: self.transaction_date,
            source_type: decode_parsed(
                SourceType::parse(&self.source_type),
                "source_type",
                &self.source_type,
            )?,
            source_reference_id: self.source_reference_id,
            created_at: self.created_at,
        })
    }
}

impl PgStore {
    async fn ensure_account_exists(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
    ) -> Result<(), StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM accounts WHERE tenant_id = $1 AND id = $2) AS present",
        )
        .bind(ctx.tenant_id().as_uuid())
        .bind(account_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("account_exists", e))?;

        let present: bool = row
            .try_get("present")
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        if !present {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerQueries for PgStore {
    #[instrument(
        skip(self, ctx, cancel),
        fields(tenant_id = %ctx.tenant_id(), account_id = %account_id)
    )]
    async fn transactions(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        filter: TransactionFilter,
        page: Pagination,
        cancel: &CancellationToken,
    ) -> Result<PageResult<LedgerEntryView>, StoreError> {
        run_cancellable(cancel, async {
            self.ensure_account_exists(ctx, account_id).await?;

            let count_row = sqlx::query(
                r#"
                SELECT COUNT(*) AS total
                FROM ledger_entries
                WHERE tenant_id = $1 AND account_id = $2
                    AND ($3::date IS NULL OR transaction_date >= $3)
                    AND ($4::date IS NULL OR transaction_date <= $4)
                "#,
            )
            .bind(ctx.tenant_id().as_uuid())
            .bind(account_id.as_uuid())
            .bind(filter.start_date)
            .bind(filter.end_date)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("transactions_count", e))?;

            let total: i64 = count_row
                .try_get("total")
                .map_err(|e| StoreError::Decode(e.to_string()))?;

            let rows = sqlx::query(&format!(
                r#"
                SELECT {VIEW_COLUMNS}
                FROM ledger_entries
                WHERE tenant_id = $1 AND account_id = $2
                    AND ($3::date IS NULL OR transaction_date >= $3)
                    AND ($4::date IS NULL OR transaction_date <= $4)
                ORDER BY transaction_date DESC, created_at DESC, id DESC
                LIMIT $5 OFFSET $6
                "#
            ))
            .bind(ctx.tenant_id().as_uuid())
            .bind(account_id.as_uuid())
            .bind(filter.start_date)
            .bind(filter.end_date)
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("transactions", e))?;

            let views = rows
                .into_iter()
                .map(|r| {
                    EntryViewRow::from_row(&r)
                        .map_err(|e| StoreError::Decode(e.to_string()))?
                        .into_view()
                })
                .collect::<Result<Vec<_>, _>>()?;

            Ok(PageResult::new(views, page, total as u64))
        })
        .await
    }

    #[instrument(
        skip(self, ctx, cancel),
        fields(tenant_id = %ctx.tenant_id(), account_id = %account_id)
    )]
    async fn receivable_entries(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Vec<LedgerEntryView>, StoreError> {
        run_cancellable(cancel, async {
            self.ensure_account_exists(ctx, account_id).await?;

            let rows = sqlx::query(&format!(
                r#"
                SELECT {VIEW_COLUMNS}
                FROM ledger_entries
                WHERE tenant_id = $1 AND account_id = $2
                    AND ledger_account = 'accounts_receivable'
                    AND transaction_date >= $3 AND transaction_date <= $4
                ORDER BY transaction_date ASC, created_at ASC, id ASC
                "#
            ))
            .bind(ctx.tenant_id().as_uuid())
            .bind(account_id.as_uuid())
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("receivable_entries", e))?;

            rows.into_iter()
                .map(|r| {
                    EntryViewRow::from_row(&r)
                        .map_err(|e| StoreError::Decode(e.to_string()))?
                        .into_view()
                })
                .collect()
        })
        .await
    }

    #[instrument(
        skip(self, ctx, cancel),
        fields(tenant_id = %ctx.tenant_id(), account_id = %account_id)
    )]
    async fn receivable_balance(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        before: Option<NaiveDate>,
        cancel: &CancellationToken,
    ) -> Result<Decimal, StoreError> {
        run_cancellable(cancel, async {
            self.ensure_account_exists(ctx, account_id).await?;

            let row = sqlx::query(
                r#"
                SELECT COALESCE(SUM(COALESCE(debit_amount, 0) - COALESCE(credit_amount, 0)), 0)
                    AS balance
                FROM ledger_entries
                WHERE tenant_id = $1 AND account_id = $2
                    AND ledger_account = 'accounts_receivable'
                    AND ($3::date IS NULL OR transaction_date < $3)
                "#,
            )
            .bind(ctx.tenant_id().as_uuid())
            .bind(account_id.as_uuid())
            .bind(before)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("receivable_balance", e))?;

            row.try_get::<Decimal, _>("balance")
                .map_err(|e| StoreError::Decode(e.to_string()))
        })
        .await
    }
}
