//! Real-time match synchronization
//!
//! One event channel per live match carries every event class, tagged with
//! its kind: ephemeral events are fan-out only, durable events are persisted
//! before they are broadcast, presence events are derived from heartbeats.

pub mod bus;
pub mod coordinator;
pub mod presence;

pub use bus::{EventBus, EventEnvelope};
pub use coordinator::MatchCoordinator;
pub use presence::{PresenceSweep, PresenceTracker};
