use std::sync::Arc;

use super::{TransactionError, TransactionKey, TransactionMode};

/// Two-phase completion hook bound to one transaction.
pub trait Synchronization: Send + Sync {
    /// Called before the commit decision. Writes staged here commit together
    /// with the business writes; an error rolls the transaction back.
    fn before_completion(&self, key: &TransactionKey) -> Result<(), TransactionError>;

    /// Called once the outcome is known, on commit and on rollback.
    fn after_completion(&self, key: &TransactionKey, committed: bool);
}

/// What the unit-of-work manager needs from a transaction coordinator.
pub trait TransactionCoordinator: Send + Sync {
    /// The transaction bound to the calling thread, if any.
    fn current_transaction(&self) -> Option<TransactionKey>;

    fn register_synchronization(
        &self,
        key: &TransactionKey,
        synchronization: Arc<dyn Synchronization>,
    ) -> Result<(), TransactionError>;

    fn set_rollback_only(&self, key: &TransactionKey) -> Result<(), TransactionError>;

    fn mode(&self) -> TransactionMode;

    /// Whether the coordinator's own crash recovery re-delivers outbox rows
    /// committed before a crash. When false the recovery sweep must run.
    fn recovers_outbox(&self) -> bool {
        false
    }
}
