use super::TransactionKey;
use crate::store::StoreError;

/// A store that stages writes per transaction and applies them on commit.
pub trait TransactionalResource: Send + Sync {
    fn name(&self) -> &str;

    /// Check that the staged writes can be applied. Must leave the resource
    /// able to either commit or roll back.
    fn prepare(&self, key: &TransactionKey) -> Result<(), StoreError>;

    /// Apply the staged writes.
    fn commit(&self, key: &TransactionKey) -> Result<(), StoreError>;

    /// Discard the staged writes. Must not fail.
    fn rollback(&self, key: &TransactionKey);
}
