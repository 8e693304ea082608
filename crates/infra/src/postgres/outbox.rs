use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, Row, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use rideledger_core::{MessageId, TenantId};
use rideledger_events::OutboxMessage;

use crate::error::{map_sqlx_error, StoreError};
use crate::repository::OutboxStore;

use super::{run_cancellable, PgStore};

/// Write outbox rows inside the caller's transaction. This is the only
/// insertion path: a message is co-committed with the state change that
/// produced it or not at all.
pub(super) async fn insert_outbox_rows(
    tx: &mut Transaction<'_, Postgres>,
    messages: &[OutboxMessage],
) -> Result<(), StoreError> {
    for message in messages {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (
                message_id, tenant_id, event_type, payload, occurred_at,
                processed_at, retry_count
            )
            VALUES ($1, $2, $3, $4, $5, NULL, 0)
            "#,
        )
        .bind(message.message_id().as_uuid())
        .bind(message.tenant_id().as_uuid())
        .bind(message.event_type())
        .bind(message.payload())
        .bind(message.occurred_at())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_outbox_message", e))?;
    }
    Ok(())
}

#[derive(Debug)]
struct OutboxRow {
    message_id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    event_type: String,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    retry_count: i32,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for OutboxRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxRow {
            message_id: row.try_get("message_id")?,
            tenant_id: row.try_get("tenant_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            occurred_at: row.try_get("occurred_at")?,
            processed_at: row.try_get("processed_at")?,
            retry_count: row.try_get("retry_count")?,
        })
    }
}

impl From<OutboxRow> for OutboxMessage {
    fn from(row: OutboxRow) -> Self {
        OutboxMessage::rehydrate(
            MessageId::from_uuid(row.message_id),
            TenantId::from_uuid(row.tenant_id),
            row.event_type,
            row.payload,
            row.occurred_at,
            row.processed_at,
            row.retry_count,
        )
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    #[instrument(skip(self, cancel))]
    async fn fetch_unprocessed(
        &self,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        run_cancellable(cancel, async {
            let rows = sqlx::query(
                r#"
                SELECT message_id, tenant_id, event_type, payload, occurred_at,
                       processed_at, retry_count
                FROM outbox_messages
                WHERE processed_at IS NULL
                ORDER BY occurred_at ASC
                LIMIT $1
                "#,
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_unprocessed", e))?;

            rows.into_iter()
                .map(|r| {
                    OutboxRow::from_row(&r)
                        .map(OutboxMessage::from)
                        .map_err(|e| StoreError::Decode(e.to_string()))
                })
                .collect()
        })
        .await
    }

    #[instrument(skip(self, cancel), fields(message_id = %message_id))]
    async fn mark_processed(
        &self,
        message_id: MessageId,
        processed_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        run_cancellable(cancel, async {
            let updated = sqlx::query(
                "UPDATE outbox_messages SET processed_at = $2 \
                 WHERE message_id = $1 AND processed_at IS NULL",
            )
            .bind(message_id.as_uuid())
            .bind(processed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_processed", e))?;

            if updated.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, cancel), fields(message_id = %message_id))]
    async fn record_failure(
        &self,
        message_id: MessageId,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        run_cancellable(cancel, async {
            let updated = sqlx::query(
                "UPDATE outbox_messages SET retry_count = retry_count + 1 WHERE message_id = $1",
            )
            .bind(message_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_failure", e))?;

            if updated.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }
}
