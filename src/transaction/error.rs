use thiserror::Error;

use super::TransactionKey;
use crate::store::StoreError;
use crate::uow::UowError;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("no active transaction on this thread")]
    NoActiveTransaction,
    #[error("transaction {0} is not active")]
    NotActive(TransactionKey),
    #[error("transaction {key} rolled back: {reason}")]
    RolledBack { key: TransactionKey, reason: String },
    #[error("transaction registry lock poisoned")]
    LockPoisoned,
    #[error("invalid transaction configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Uow(#[from] UowError),
}

impl TransactionError {
    /// True when the failure was a constraint violation raised by a store.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TransactionError::Store(StoreError::Conflict { .. }))
    }
}
