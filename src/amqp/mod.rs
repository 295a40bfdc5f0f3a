//! AMQP integration for durable-event notifications
//!
//! Durable match events are mirrored to an AMQP topic exchange so downstream
//! consumers (leaderboards, replay archival, anti-abuse) observe them without
//! subscribing to per-match channels.

pub mod connection;
pub mod messages;
pub mod publisher;

pub use connection::AmqpConnection;
pub use messages::{MessageEnvelope, MATCH_EVENTS_EXCHANGE};
pub use publisher::{AmqpNoticePublisher, MockNoticePublisher, NoticePublisher, PublisherConfig};
