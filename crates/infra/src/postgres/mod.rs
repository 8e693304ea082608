//! Postgres-backed store.
//!
//! One module per repository. Every query filters on `tenant_id`; write
//! paths run in a transaction that co-commits the outbox rows with the state
//! change. Uniqueness backstops (ride/payment idempotency, invoice numbers)
//! are enforced by partial-unique indexes declared in
//! `migrations/0001_init.sql`; violations surface as
//! [`StoreError::UniqueViolation`] with the constraint name.
//!
//! ## Cancellation
//!
//! Every operation races its database future against the request's
//! [`CancellationToken`]. A signalled token drops the in-flight future
//! (rolling back any open transaction) and fails with
//! [`StoreError::Canceled`].

mod accounts;
mod invoices;
mod outbox;
mod queries;

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tokio_util::sync::CancellationToken;

use rideledger_core::{Currency, Money};

use crate::error::{map_sqlx_error, StoreError};

/// Default statement/command timeout.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Postgres-backed implementation of all repository traits.
///
/// Cheap to clone; the underlying `PgPool` is shared.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the default pool settings and a 30 s statement timeout.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| map_sqlx_error("connect", e))?
            .options([("statement_timeout", COMMAND_TIMEOUT.as_millis().to_string())]);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(COMMAND_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Race a store future against the cancellation token.
pub(crate) async fn run_cancellable<T, F>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    if cancel.is_cancelled() {
        return Err(StoreError::Canceled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Canceled),
        result = fut => result,
    }
}

pub(crate) fn decode_money(amount: Decimal, currency: &str) -> Result<Money, StoreError> {
    let currency = Currency::new(currency)
        .map_err(|e| StoreError::Decode(format!("currency '{currency}': {e}")))?;
    Money::new(amount, currency).map_err(|e| StoreError::Decode(e.to_string()))
}

pub(crate) fn decode_parsed<T>(parsed: Option<T>, field: &str, raw: &str) -> Result<T, StoreError> {
    parsed.ok_or_else(|| StoreError::Decode(format!("unknown {field}: '{raw}'")))
}
