use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, Postgres, Row, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use rideledger_core::{
    AccountId, InvoiceId, LedgerEntryId, LineItemId, PageResult, Pagination, TenantContext,
    TenantId,
};
use rideledger_events::OutboxMessage;
use rideledger_invoicing::{
    BillingFrequency, Invoice, InvoiceLineItem, InvoiceNumber, InvoiceStatus,
};

use crate::error::{map_sqlx_error, StoreError};
use crate::repository::{InvoiceRepository, InvoiceSearch, InvoiceSummary};

use super::outbox::insert_outbox_rows;
use super::{decode_money, decode_parsed, run_cancellable, PgStore};

const INVOICE_COLUMNS: &str = "id, tenant_id, account_id, invoice_number, billing_frequency, \
     billing_period_start, billing_period_end, generated_at, status, subtotal, \
     total_payments_applied, outstanding_balance, currency";

#[derive(Debug)]
struct InvoiceRow {
    id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    account_id: uuid::Uuid,
    invoice_number: String,
    billing_frequency: String,
    billing_period_start: NaiveDate,
    billing_period_end: NaiveDate,
    generated_at: DateTime<Utc>,
    status: String,
    subtotal: Decimal,
    total_payments_applied: Decimal,
    outstanding_balance: Decimal,
    currency: String,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for InvoiceRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(InvoiceRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            account_id: row.try_get("account_id")?,
            invoice_number: row.try_get("invoice_number")?,
            billing_frequency: row.try_get("billing_frequency")?,
            billing_period_start: row.try_get("billing_period_start")?,
            billing_period_end: row.try_get("billing_period_end")?,
            generated_at: row.try_get("generated_at")?,
            status: row.try_get("status")?,
            subtotal: row.try_get("subtotal")?,
            total_payments_applied: row.try_get("total_payments_applied")?,
            outstanding_balance: row.try_get("outstanding_balance")?,
            currency: row.try_get("currency")?,
        })
    }
}

impl InvoiceRow {
    fn into_summary(self) -> Result<InvoiceSummary, StoreError> {
        Ok(InvoiceSummary {
            id: InvoiceId::from_uuid(self.id),
            account_id: AccountId::from_uuid(self.account_id),
            invoice_number: InvoiceNumber::parse(&self.invoice_number)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            frequency: decode_parsed(
                BillingFrequency::parse(&self.billing_frequency),
                "billing_frequency",
                &self.billing_frequency,
            )?,
            period_start: self.billing_period_start,
            period_end: self.billing_period_end,
            generated_at: self.generated_at,
            status: decode_parsed(InvoiceStatus::parse(&self.status), "status", &self.status)?,
            subtotal: self.subtotal,
            total_payments_applied: self.total_payments_applied,
            outstanding_balance: self.outstanding_balance,
            currency: rideledger_core::Currency::new(&self.currency)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
        })
    }

    fn into_invoice(self, line_items: Vec<InvoiceLineItem>) -> Result<Invoice, StoreError> {
        let currency = rideledger_core::Currency::new(&self.currency)
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(Invoice::rehydrate(
            InvoiceId::from_uuid(self.id),
            TenantId::from_uuid(self.tenant_id),
            AccountId::from_uuid(self.account_id),
            InvoiceNumber::parse(&self.invoice_number)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            decode_parsed(
                BillingFrequency::parse(&self.billing_frequency),
                "billing_frequency",
                &self.billing_frequency,
            )?,
            self.billing_period_start,
            self.billing_period_end,
            self.generated_at,
            decode_parsed(InvoiceStatus::parse(&self.status), "status", &self.status)?,
            decode_money(self.subtotal, &self.currency)?,
            decode_money(self.total_payments_applied, &self.currency)?,
            decode_money(self.outstanding_balance, &self.currency)?,
            currency,
            line_items,
        ))
    }
}

#[derive(Debug)]
struct LineItemRow {
    id: uuid::Uuid,
    invoice_id: uuid::Uuid,
    ride_id: String,
    service_date: NaiveDate,
    amount: Decimal,
    description: String,
    ledger_entry_ids: Vec<uuid::Uuid>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for LineItemRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineItemRow {
            id: row.try_get("id")?,
            invoice_id: row.try_get("invoice_id")?,
            ride_id: row.try_get("ride_id")?,
            service_date: row.try_get("service_date")?,
            amount: row.try_get("amount")?,
            description: row.try_get("description")?,
            ledger_entry_ids: row.try_get("ledger_entry_ids")?,
        })
    }
}

impl LineItemRow {
    fn into_line_item(self, currency: &str) -> Result<InvoiceLineItem, StoreError> {
        Ok(InvoiceLineItem {
            id: LineItemId::from_uuid(self.id),
            invoice_id: InvoiceId::from_uuid(self.invoice_id),
            ride_id: self.ride_id,
            service_date: self.service_date,
            amount: decode_money(self.amount, currency)?,
            description: self.description,
            ledger_entry_ids: self
                .ledger_entry_ids
                .into_iter()
                .map(LedgerEntryId::from_uuid)
                .collect(),
        })
    }
}

async fn fetch_invoice_row(
    pool: &sqlx::PgPool,
    tenant_id: TenantId,
    id: InvoiceId,
) -> Result<Option<InvoiceRow>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(tenant_id.as_uuid())
    .bind(id.as_uuid())
    .fetch_optional(pool)
    .await
    .map_err(|e| map_sqlx_error("invoice_get_by_id", e))?;

    row.map(|r| InvoiceRow::from_row(&r).map_err(|e| StoreError::Decode(e.to_string())))
        .transpose()
}

async fn fetch_line_items(
    pool: &sqlx::PgPool,
    tenant_id: TenantId,
    invoice_id: InvoiceId,
    currency: &str,
) -> Result<Vec<InvoiceLineItem>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, invoice_id, ride_id, service_date, amount, description, ledger_entry_ids
        FROM invoice_line_items
        WHERE tenant_id = $1 AND invoice_id = $2
        ORDER BY service_date ASC, id ASC
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(invoice_id.as_uuid())
    .fetch_all(pool)
    .await
    .map_err(|e| map_sqlx_error("fetch_line_items", e))?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let item = LineItemRow::from_row(&row)
            .map_err(|e| StoreError::Decode(e.to_string()))?
            .into_line_item(currency)?;
        items.push(item);
    }
    Ok(items)
}

#[async_trait]
impl InvoiceRepository for PgStore {
    #[instrument(skip(self, ctx, cancel), fields(tenant_id = %ctx.tenant_id(), invoice_id = %id))]
    async fn get_by_id(
        &self,
        ctx: &TenantContext,
        id: InvoiceId,
        cancel: &CancellationToken,
    ) -> Result<Option<InvoiceSummary>, StoreError> {
        run_cancellable(cancel, async {
            fetch_invoice_row(&self.pool, ctx.tenant_id(), id)
                .await?
                .map(InvoiceRow::into_summary)
                .transpose()
        })
        .await
    }

    #[instrument(skip(self, ctx, cancel), fields(tenant_id = %ctx.tenant_id(), invoice_id = %id))]
    async fn get_by_id_with_line_items(
        &self,
        ctx: &TenantContext,
        id: InvoiceId,
        cancel: &CancellationToken,
    ) -> Result<Option<Invoice>, StoreError> {
        run_cancellable(cancel, async {
            let Some(row) = fetch_invoice_row(&self.pool, ctx.tenant_id(), id).await? else {
                return Ok(None);
            };
            let items =
                fetch_line_items(&self.pool, ctx.tenant_id(), id, &row.currency.clone()).await?;
            Ok(Some(row.into_invoice(items)?))
        })
        .await
    }

    #[instrument(skip(self, ctx, cancel), fields(tenant_id = %ctx.tenant_id(), number = %number))]
    async fn get_by_invoice_number(
        &self,
        ctx: &TenantContext,
        number: InvoiceNumber,
        cancel: &CancellationToken,
    ) -> Result<Option<Invoice>, StoreError> {
        run_cancellable(cancel, async {
            let row = sqlx::query(&format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices \
                 WHERE tenant_id = $1 AND invoice_number = $2"
            ))
            .bind(ctx.tenant_id().as_uuid())
            .bind(number.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("invoice_get_by_number", e))?;

            let Some(row) = row else {
                return Ok(None);
            };
            let row = InvoiceRow::from_row(&row).map_err(|e| StoreError::Decode(e.to_string()))?;
            let items = fetch_line_items(
                &self.pool,
                ctx.tenant_id(),
                InvoiceId::from_uuid(row.id),
                &row.currency.clone(),
            )
            .await?;
            Ok(Some(row.into_invoice(items)?))
        })
        .await
    }

    #[instrument(skip(self, ctx, cancel), fields(tenant_id = %ctx.tenant_id(), account_id = %account_id))]
    async fn get_by_account_id(
        &self,
        ctx: &TenantContext,
        account_id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Vec<InvoiceSummary>, StoreError> {
        run_cancellable(cancel, async {
            let rows = sqlx::query(&format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices \
                 WHERE tenant_id = $1 AND account_id = $2 \
                 ORDER BY generated_at DESC, invoice_number DESC"
            ))
            .bind(ctx.tenant_id().as_uuid())
            .bind(account_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("invoice_get_by_account", e))?;

            rows.into_iter()
                .map(|r| {
                    InvoiceRow::from_row(&r)
                        .map_err(|e| StoreError::Decode(e.to_string()))?
                        .into_summary()
                })
                .collect()
        })
        .await
    }

    #[instrument(skip(self, ctx, search, cancel), fields(tenant_id = %ctx.tenant_id()))]
    async fn search(
        &self,
        ctx: &TenantContext,
        search: &InvoiceSearch,
        page: Pagination,
        cancel: &CancellationToken,
    ) -> Result<PageResult<InvoiceSummary>, StoreError> {
        run_cancellable(cancel, async {
            let account_param = search.account_id.map(|id| *id.as_uuid());
            let status_param = search.status.map(|s| s.as_str());

            // A date range matches invoices whose billing period overlaps it.
            let count_row = sqlx::query(
                r#"
                SELECT COUNT(*) AS total
                FROM invoices
                WHERE tenant_id = $1
                    AND ($2::uuid IS NULL OR account_id = $2)
                    AND ($3::text IS NULL OR status = $3)
                    AND ($4::date IS NULL OR billing_period_end > $4)
                    AND ($5::date IS NULL OR billing_period_start < $5)
                "#,
            )
            .bind(ctx.tenant_id().as_uuid())
            .bind(account_param)
            .bind(status_param)
            .bind(search.period_start)
            .bind(search.period_end)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("invoice_search_count", e))?;

            let total: i64 = count_row
                .try_get("total")
                .map_err(|e| StoreError::Decode(e.to_string()))?;

            let rows = sqlx::query(&format!(
                r#"
                SELECT {INVOICE_COLUMNS}
                FROM invoices
                WHERE tenant_id = $1
                    AND ($2::uuid IS NULL OR account_id = $2)
                    AND ($3::text IS NULL OR status = $3)
                    AND ($4::date IS NULL OR billing_period_end > $4)
                    AND ($5::date IS NULL OR billing_period_start < $5)
                ORDER BY generated_at DESC, invoice_number DESC
                LIMIT $6 OFFSET $7
                "#
            ))
            .bind(ctx.tenant_id().as_uuid())
            .bind(account_param)
            .bind(status_param)
            .bind(search.period_start)
            .bind(search.period_end)
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("invoice_search", e))?;

            let summaries = rows
                .into_iter()
                .map(|r| {
                    InvoiceRow::from_row(&r)
                        .map_err(|e| StoreError::Decode(e.to_string()))?
                        .into_summary()
                })
                .collect::<Result<Vec<_>, _>>()?;

            Ok(PageResult::new(summaries, page, total as u64))
        })
        .await
    }

    #[instrument(skip(self, ctx, cancel), fields(tenant_id = %ctx.tenant_id()))]
    async fn latest_invoice_number(
        &self,
        ctx: &TenantContext,
        cancel: &CancellationToken,
    ) -> Result<Option<InvoiceNumber>, StoreError> {
        run_cancellable(cancel, async {
            let row = sqlx::query(
                "SELECT invoice_number FROM invoices WHERE tenant_id = $1 \
                 ORDER BY generated_at DESC, invoice_number DESC LIMIT 1",
            )
            .bind(ctx.tenant_id().as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("latest_invoice_number", e))?;

            row.map(|r| {
                let raw: String = r
                    .try_get("invoice_number")
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                InvoiceNumber::parse(&raw).map_err(|e| StoreError::Decode(e.to_string()))
            })
            .transpose()
        })
        .await
    }

    #[instrument(
        skip(self, ctx, invoice, outbox, cancel),
        fields(
            tenant_id = %ctx.tenant_id(),
            invoice_id = %invoice.id(),
            number = %invoice.invoice_number()
        )
    )]
    async fn add(
        &self,
        ctx: &TenantContext,
        invoice: &Invoice,
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
                INSERT INTO invoices (
                    id, tenant_id, account_id, invoice_number, billing_frequency,
                    billing_period_start, billing_period_end, generated_at, status,
                    subtotal, total_payments_applied, outstanding_balance, currency
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(invoice.id().as_uuid())
            .bind(ctx.tenant_id().as_uuid())
            .bind(invoice.account_id().as_uuid())
            .bind(invoice.invoice_number().to_string())
            .bind(invoice.frequency().as_str())
            .bind(invoice.period_start())
            .bind(invoice.period_end())
            .bind(invoice.generated_at())
            .bind(invoice.status().as_str())
            .bind(invoice.subtotal().amount())
            .bind(invoice.total_payments_applied().amount())
            .bind(invoice.outstanding_balance().amount())
            .bind(invoice.currency().as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_invoice", e))?;

            for item in invoice.line_items() {
                insert_line_item(&mut tx, ctx.tenant_id(), item).await?;
            }
            insert_outbox_rows(&mut tx, outbox).await?;

            tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
        })
        .await
    }

    #[instrument(
        skip(self, ctx, invoice, outbox, cancel),
        fields(tenant_id = %ctx.tenant_id(), invoice_id = %invoice.id())
    )]
    async fn update(
        &self,
        ctx: &TenantContext,
        invoice: &Invoice,
        outbox: &[OutboxMessage],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        run_cancellable(cancel, async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin", e))?;

            // Only the status transition is persistable; everything else on a
            // generated invoice is immutable, line items included.
            let updated = sqlx::query(
                "UPDATE invoices SET status = $3 WHERE tenant_id = $1 AND id = $2",
            )
            .bind(ctx.tenant_id().as_uuid())
            .bind(invoice.id().as_uuid())
            .bind(invoice.status().as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_invoice", e))?;

            if updated.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            insert_outbox_rows(&mut tx, outbox).await?;

            tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
        })
        .await
    }
}

async fn insert_line_item(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    item: &InvoiceLineItem,
) -> Result<(), StoreError> {
    let entry_ids: Vec<uuid::Uuid> = item
        .ledger_entry_ids
        .iter()
        .map(|id| *id.as_uuid())
        .collect();

    sqlx::query(
        r#"
        INSERT INTO invoice_line_items (
            id, tenant_id, invoice_id, ride_id, service_date, amount, description,
            ledger_entry_ids
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(item.id.as_uuid())
    .bind(tenant_id.as_uuid())
    .bind(item.invoice_id.as_uuid())
    .bind(&item.ride_id)
    .bind(item.service_date)
    .bind(item.amount.amount())
    .bind(&item.description)
    .bind(&entry_ids)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_line_item", e))?;
    Ok(())
}
