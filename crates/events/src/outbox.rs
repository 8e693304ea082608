use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use rideledger_core::{MessageId, TenantId};

use crate::event::Event;
use crate::tenant::TenantScoped;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("payload serialization failed: {0}")]
    Serialize(String),
}

/// Publication record co-committed with the state change that produced it.
///
/// The writing side guarantees: no message row without its state change, no
/// state change without its message row, and no modification by domain code
/// after insert. A relay polls rows where `processed_at IS NULL` ordered by
/// `occurred_at`, dispatches them, and records the outcome through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    message_id: MessageId,
    tenant_id: TenantId,
    event_type: String,
    payload: JsonValue,
    occurred_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    retry_count: i32,
}

impl OutboxMessage {
    /// Build a message from a typed domain event.
    ///
    /// The payload is the event's deterministic JSON serialization and always
    /// embeds the tenant id, since every event is tenant-scoped.
    pub fn from_event<E>(event: &E) -> Result<Self, OutboxError>
    where
        E: Event + TenantScoped + Serialize,
    {
        let payload =
            serde_json::to_value(event).map_err(|e| OutboxError::Serialize(e.to_string()))?;

        Ok(Self {
            message_id: MessageId::new(),
            tenant_id: event.tenant_id(),
            event_type: event.event_type().to_string(),
            payload,
            occurred_at: event.occurred_at(),
            processed_at: None,
            retry_count: 0,
        })
    }

    /// Reconstitute a persisted message. For store implementations only.
    #[allow(clippy::too_many_arguments)]
    pub fn rehydrate(
        message_id: MessageId,
        tenant_id: TenantId,
        event_type: String,
        payload: JsonValue,
        occurred_at: DateTime<Utc>,
        processed_at: Option<DateTime<Utc>>,
        retry_count: i32,
    ) -> Self {
        Self {
            message_id,
            tenant_id,
            event_type,
            payload,
            occurred_at,
            processed_at,
            retry_count,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn retry_count(&self) -> i32 {
        self.retry_count
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

impl TenantScoped for OutboxMessage {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
