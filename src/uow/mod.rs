//! Unit of work bound to a transaction.
//!
//! ## Separation of Concerns
//!
//! 1. **Register** - business code registers aggregates, messages and named
//!    signals into the unit of work of its current transaction
//! 2. **Pre-complete** - before the commit decision, handlers flush
//!    aggregates and write outbox rows with the same transaction key
//! 3. **Post-complete** - after the outcome, listeners see every
//!    registration; on success the message batch goes to the dispatch queue
//!
//! ```ignore
//! let tx = transactions.begin()?;
//! manager.register(Registration::created(order_record))?;
//! manager.register(Registration::message(order_created))?;
//! tx.commit()?; // flush + outbox write, then background dispatch
//! ```

mod error;
mod handler;
mod manager;
mod registration;
mod unit_of_work;

pub use error::UowError;
pub use handler::{
    AggregateFlushHandler, CompletionListener, OutboxListener, OutboxWriteHandler,
    PreCompleteHandler, FLUSH_ORDINAL, OUTBOX_ORDINAL,
};
pub use manager::{UnitOfWorkHandle, UnitOfWorksManager, UnitOfWorksManagerBuilder};
pub use registration::{Registration, RegistrationKey};
pub use unit_of_work::{UnitOfWork, UnitOfWorkStatus};
