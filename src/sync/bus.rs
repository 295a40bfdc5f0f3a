//! Per-match broadcast channels for the unified event stream

use crate::error::{ArenaError, Result};
use crate::types::{EventKind, MatchEvent, MatchId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

/// An event as it travels over a match channel
///
/// Every event carries its kind tag so subscribers apply the right delivery
/// expectations: a missed `Ephemeral` event is gone, a missed `Durable` one
/// is recoverable by re-querying the snapshot.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub match_id: MatchId,
    pub correlation_id: String,
    pub kind: EventKind,
    pub event: MatchEvent,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(match_id: MatchId, event: MatchEvent) -> Self {
        Self {
            match_id,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            kind: event.kind(),
            event,
            timestamp: Utc::now(),
        }
    }
}

/// Registry of per-match broadcast channels
///
/// Publishing is fire-and-forget: a slow subscriber lags and loses the
/// oldest buffered events rather than applying backpressure to the match
/// worker. Dropped durable events converge via snapshot reconciliation.
pub struct EventBus {
    capacity: usize,
    channels: RwLock<HashMap<MatchId, broadcast::Sender<EventEnvelope>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Open the channel for a match. Idempotent.
    pub fn open(&self, match_id: MatchId) -> Result<()> {
        let mut channels = self.channels.write().map_err(|_| ArenaError::InternalError {
            message: "Failed to acquire event bus lock".to_string(),
        })?;
        channels
            .entry(match_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(())
    }

    /// Publish an event to a match's channel. Returns the number of
    /// subscribers that received it; zero subscribers is not an error.
    pub fn publish(&self, match_id: MatchId, event: MatchEvent) -> Result<usize> {
        let channels = self.channels.read().map_err(|_| ArenaError::InternalError {
            message: "Failed to acquire event bus lock".to_string(),
        })?;
        let sender = channels
            .get(&match_id)
            .ok_or_else(|| ArenaError::MatchNotFound {
                match_id: match_id.to_string(),
            })?;

        let envelope = EventEnvelope::new(match_id, event);
        Ok(sender.send(envelope).unwrap_or(0))
    }

    /// Subscribe to a match's event stream.
    pub fn subscribe(&self, match_id: MatchId) -> Result<BroadcastStream<EventEnvelope>> {
        let channels = self.channels.read().map_err(|_| ArenaError::InternalError {
            message: "Failed to acquire event bus lock".to_string(),
        })?;
        let sender = channels
            .get(&match_id)
            .ok_or_else(|| ArenaError::MatchNotFound {
                match_id: match_id.to_string(),
            })?;
        Ok(BroadcastStream::new(sender.subscribe()))
    }

    /// Current subscriber count for a match, zero if the channel is closed.
    pub fn subscriber_count(&self, match_id: MatchId) -> usize {
        self.channels
            .read()
            .ok()
            .and_then(|channels| channels.get(&match_id).map(|s| s.receiver_count()))
            .unwrap_or(0)
    }

    /// Close a match's channel. Pending subscribers observe the stream end.
    pub fn close(&self, match_id: MatchId) {
        if let Ok(mut channels) = self.channels.write() {
            if channels.remove(&match_id).is_some() {
                debug!(match_id = %match_id, "Closed match event channel");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::generate_match_id;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new(16);
        let match_id = generate_match_id();
        bus.open(match_id).unwrap();

        let mut stream = bus.subscribe(match_id).unwrap();
        bus.publish(match_id, MatchEvent::MatchStarted).unwrap();

        let envelope = stream.next().await.unwrap().unwrap();
        assert_eq!(envelope.match_id, match_id);
        assert_eq!(envelope.kind, EventKind::Durable);
        assert!(matches!(envelope.event, MatchEvent::MatchStarted));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(16);
        let match_id = generate_match_id();
        bus.open(match_id).unwrap();

        let delivered = bus
            .publish(
                match_id,
                MatchEvent::Tick {
                    remaining_seconds: 42,
                },
            )
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_unknown_match_is_rejected() {
        let bus = EventBus::new(16);
        assert!(bus.subscribe(generate_match_id()).is_err());
        assert!(bus
            .publish(generate_match_id(), MatchEvent::MatchStarted)
            .is_err());
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let match_id = generate_match_id();
        bus.open(match_id).unwrap();

        let mut stream = bus.subscribe(match_id).unwrap();
        for i in 0..5 {
            bus.publish(match_id, MatchEvent::Tick { remaining_seconds: i })
                .unwrap();
        }

        // The first poll reports the lag, subsequent polls yield the
        // retained tail of the buffer
        let first = stream.next().await.unwrap();
        assert!(first.is_err());
        let second = stream.next().await.unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let bus = EventBus::new(16);
        let match_id = generate_match_id();
        bus.open(match_id).unwrap();

        let mut stream = bus.subscribe(match_id).unwrap();
        bus.close(match_id);
        assert!(stream.next().await.is_none());
        assert_eq!(bus.subscriber_count(match_id), 0);
    }
}
