//! Outbox messages: what gets written next to the aggregate and dispatched
//! after commit.

mod destination;
mod message;
mod payload;

pub use destination::{Destination, DEFAULT_BROKER};
pub use message::{DispatchStatus, Message};
pub use payload::Payload;
