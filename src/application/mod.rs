mod allocator;
mod coordinator;
mod error;
mod invoicing;
mod ledger;
mod lifecycle;
mod views;

pub use allocator::InvoicePaymentAllocator;
pub use coordinator::{BoxFuture, TransactionCoordinator, UnitOfWork};
pub use error::{CoreError, ErrorKind};
pub use invoicing::{InvoiceWorkflow, NewInvoice, NewPayment};
pub use ledger::{LedgerEngine, NewEntry};
pub use lifecycle::{NewService, ServiceLifecycle};
pub use views::{InvoiceSummary, QueryViews, ServiceSummary};
