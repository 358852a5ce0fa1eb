//! Unit of work and outbox tests
//!
//! Business writes and outbox rows commit together; committed messages are
//! dispatched off the committing thread, in registration order, after
//! merging.

#[path = "../support/mod.rs"]
mod support;

mod atomicity;
mod marshalling;
#[cfg(feature = "emitter")]
mod notifications;
mod ordering;
mod rollback;
