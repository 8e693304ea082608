//! Invoices: period-scoped aggregation of ride charges into immutable
//! billing documents, with per-tenant monotonic numbering.

pub mod invoice;
pub mod numbering;

pub use invoice::{
    BillingFrequency, Invoice, InvoiceGenerated, InvoiceLineItem, InvoiceStatus, InvoiceVoided,
};
pub use numbering::InvoiceNumber;
