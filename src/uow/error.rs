use thiserror::Error;

use super::UnitOfWorkStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UowError {
    #[error("unit of work {id} is {status:?} and accepts no registrations")]
    NotActive {
        id: String,
        status: UnitOfWorkStatus,
    },
    #[error("no active transaction to bind a unit of work to")]
    NoActiveTransaction,
    #[error("unit of work registry lock poisoned")]
    LockPoisoned,
    #[error("could not bind unit of work to transaction: {0}")]
    Binding(String),
}
