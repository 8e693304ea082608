//! Persistence: tenant-scoped repositories over Postgres, an in-memory
//! store for tests/dev, and the transient-failure retry policy.

pub mod error;
pub mod in_memory;
pub mod postgres;
pub mod repository;
pub mod retry;

pub use error::{constraints, StoreError};
pub use in_memory::InMemoryStore;
pub use postgres::PgStore;
pub use repository::{
    AccountRepository, AccountView, InvoiceRepository, InvoiceSearch, InvoiceSummary,
    LedgerEntryView, LedgerQueries, OutboxStore, TransactionFilter,
};
pub use retry::{retry_transient, RetryPolicy};
