use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("concurrent write detected for {id} (expected version {expected}, got {actual})")]
    Conflict {
        id: String,
        expected: u64,
        actual: u64,
    },
    #[error("message {0} already stored")]
    DuplicateMessage(String),
    #[error("{0} not found")]
    NotFound(String),
}
