use thiserror::Error;

use crate::store::StoreError;
use crate::transaction::TransactionError;

#[derive(Debug, Error)]
pub enum SagaError {
    #[error("saga type {type_name} is not persistable")]
    NotPersistable { type_name: &'static str },
    #[error("no saga tracked by {token} on {queue}")]
    UnknownTrackingToken { queue: String, token: String },
    #[error("saga manager {manager} failed: {reason}")]
    Manager { manager: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}
