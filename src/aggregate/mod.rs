mod record;

pub use record::{AggregateId, AggregateRecord, LifecycleState};
