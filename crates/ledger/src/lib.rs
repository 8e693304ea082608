//! Double-entry ledger: immutable entries and the account aggregate.

pub mod account;
pub mod entry;

pub use account::{
    Account, AccountDeactivated, AccountOpened, AccountStatus, AccountType, ChargeRecorded,
    PaymentReceived,
};
pub use entry::{
    EntrySide, LedgerAccount, LedgerEntry, SourceType, MAX_SOURCE_REFERENCE_LEN,
};
