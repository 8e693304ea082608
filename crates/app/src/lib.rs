//! Application layer: command and query handlers over the repositories.
//!
//! Handlers load an aggregate through a tenant-scoped repository, invoke a
//! domain operation, persist the result together with its outbox rows in one
//! transaction, and translate storage-level uniqueness violations back into
//! the matching business errors.

pub mod commands;
pub mod config;
pub mod error;
pub mod queries;
pub mod service;

pub use commands::{
    ChargeResult, CreateAccount, DeactivateAccount, GenerateInvoice, PaymentResult, RecordCharge,
    RecordPayment, VoidInvoice,
};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use queries::{AccountStatement, GetTransactions, StatementLine};
pub use service::LedgerService;
