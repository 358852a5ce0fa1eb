use tracing::trace;

use super::{Registration, RegistrationKey, UowError};
use crate::aggregate::{AggregateRecord, LifecycleState};
use crate::message::Message;
use crate::store::AggregateWrite;
use crate::transaction::TransactionKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitOfWorkStatus {
    Active,
    Completing,
    Completed,
}

/// Ordered registrations collected during one transaction.
///
/// Registrations keep first-registration order. A registration that merges
/// with an earlier one takes the earlier one's slot.
#[derive(Clone, Debug)]
pub struct UnitOfWork {
    id: TransactionKey,
    status: UnitOfWorkStatus,
    registrations: Vec<Registration>,
}

impl UnitOfWork {
    pub fn new(id: TransactionKey) -> Self {
        Self {
            id,
            status: UnitOfWorkStatus::Active,
            registrations: Vec::new(),
        }
    }

    pub fn id(&self) -> &TransactionKey {
        &self.id
    }

    pub fn status(&self) -> UnitOfWorkStatus {
        self.status
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.registrations.iter().filter_map(Registration::as_message)
    }

    pub fn aggregate_writes(&self) -> Vec<AggregateWrite> {
        self.registrations
            .iter()
            .filter_map(Registration::as_aggregate_write)
            .collect()
    }

    pub fn named(&self, key: &str) -> Option<&serde_json::Value> {
        self.registrations.iter().find_map(|registration| match registration {
            Registration::Named { key: k, value } if k == key => Some(value),
            _ => None,
        })
    }

    /// Add a registration, merging it with an earlier compatible one.
    ///
    /// - messages merge when merge keys and destinations match
    /// - aggregates combine lifecycle states; Created then Removed cancels,
    ///   Removed then Created replaces the row
    /// - named signals replace the earlier value for the same key
    pub fn register(&mut self, registration: Registration) -> Result<(), UowError> {
        self.ensure_active()?;

        match registration {
            Registration::Message(message) => self.register_message(message),
            Registration::Aggregate { record, state } => self.register_aggregate(record, state),
            Registration::Named { key, value } => {
                let existing = self.registrations.iter_mut().find_map(|r| match r {
                    Registration::Named { key: k, value: v } if *k == key => Some(v),
                    _ => None,
                });
                match existing {
                    Some(slot) => *slot = value,
                    None => self.registrations.push(Registration::Named { key, value }),
                }
            }
        }
        Ok(())
    }

    fn register_message(&mut self, message: Message) {
        let existing = self.registrations.iter().position(|r| {
            matches!(r, Registration::Message(earlier) if earlier.is_mergeable_with(&message))
        });
        let Some(index) = existing else {
            self.registrations.push(Registration::Message(message));
            return;
        };
        if let Registration::Message(earlier) = &self.registrations[index] {
            trace!(unit = %self.id, earlier = %earlier.id, later = %message.id, "merging message");
            let merged = earlier.clone().merge(message);
            self.registrations[index] = Registration::Message(merged);
        }
    }

    fn register_aggregate(&mut self, record: AggregateRecord, state: LifecycleState) {
        let existing = self
            .registrations
            .iter()
            .enumerate()
            .find_map(|(index, r)| match r {
                Registration::Aggregate {
                    record: earlier,
                    state: earlier_state,
                } if earlier.id == record.id => Some((index, earlier.version, *earlier_state)),
                _ => None,
            });
        let Some((index, version, earlier_state)) = existing else {
            self.registrations
                .push(Registration::Aggregate { record, state });
            return;
        };
        match earlier_state.combine(state) {
            None => {
                trace!(unit = %self.id, aggregate = %record.id, "created and removed, dropping");
                self.registrations.remove(index);
            }
            Some(combined) => {
                // the earlier version is the one the store knows
                self.registrations[index] = Registration::Aggregate {
                    record: AggregateRecord::new(record.id, version, record.state),
                    state: combined,
                };
            }
        }
    }

    /// Remove a registration. Returns whether one was removed.
    pub fn deregister(&mut self, key: &RegistrationKey) -> Result<bool, UowError> {
        self.ensure_active()?;
        let before = self.registrations.len();
        self.registrations.retain(|registration| registration.key() != *key);
        Ok(self.registrations.len() != before)
    }

    /// ACTIVE -> COMPLETING. No further registrations are accepted.
    pub fn begin_completion(&mut self) -> Result<(), UowError> {
        self.ensure_active()?;
        self.status = UnitOfWorkStatus::Completing;
        Ok(())
    }

    /// Finish the unit and hand its registrations out for post-complete
    /// listeners. A second call returns nothing.
    pub fn complete(&mut self, success: bool) -> Vec<Registration> {
        if self.status == UnitOfWorkStatus::Completed {
            return Vec::new();
        }
        trace!(unit = %self.id, success, registrations = self.registrations.len(), "unit of work completed");
        self.status = UnitOfWorkStatus::Completed;
        std::mem::take(&mut self.registrations)
    }

    fn ensure_active(&self) -> Result<(), UowError> {
        if self.status != UnitOfWorkStatus::Active {
            return Err(UowError::NotActive {
                id: self.id.to_string(),
                status: self.status,
            });
        }
        Ok(())
    }
}
