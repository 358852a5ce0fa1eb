//! Persistence seams and the in-memory store.
//!
//! Every write takes the [`TransactionKey`](crate::transaction::TransactionKey)
//! of the enclosing transaction and is staged until that transaction commits,
//! so aggregate writes and outbox rows become visible together or not at all.

mod error;
mod in_memory;
mod traits;

pub use error::StoreError;
pub use in_memory::InMemoryStore;
pub use traits::{AggregateStore, AggregateWrite, MessageStorage, SagaStore};
