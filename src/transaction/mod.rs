//! In-process transaction coordinator.
//!
//! Business code opens a [`Transaction`], writes through stores keyed by the
//! transaction's [`TransactionKey`], and commits. Components that must act at
//! the commit boundary register a [`Synchronization`]; it is called before
//! the commit decision (still able to write and to veto) and after the
//! outcome is known.
//!
//! ```text
//! commit()
//!   ├─ before_completion()   every synchronization, registration order
//!   ├─ prepare()             every resource
//!   ├─ commit()              every resource
//!   └─ after_completion(ok)  every synchronization, also on rollback
//! ```

mod error;
mod key;
mod manager;
mod resource;
mod synchronization;

pub use error::TransactionError;
pub use key::{TransactionKey, TransactionMode};
pub use manager::{Transaction, TransactionManager};
pub use resource::TransactionalResource;
pub use synchronization::{Synchronization, TransactionCoordinator};
