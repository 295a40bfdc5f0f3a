//! AMQP notice publisher for outbound match events

use crate::amqp::messages::{
    MatchCancelledNotice, MatchEndedNotice, MatchStartedNotice, MessageEnvelope,
    QueueExpiredNotice, SubmissionNotice, VerdictNotice, MATCH_CANCELLED_ROUTING_KEY,
    MATCH_ENDED_ROUTING_KEY, MATCH_EVENTS_EXCHANGE, MATCH_STARTED_ROUTING_KEY,
    MATCH_SUBMISSION_ROUTING_KEY, MATCH_VERDICT_ROUTING_KEY, QUEUE_EXPIRED_ROUTING_KEY,
};
use crate::error::{ArenaError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing durable-event notifications
///
/// The sync coordinator publishes through this seam; tests swap in
/// `MockNoticePublisher` and assert on what was sent.
#[async_trait]
pub trait NoticePublisher: Send + Sync {
    async fn publish_match_started(&self, notice: MatchStartedNotice) -> Result<()>;

    async fn publish_submission_recorded(&self, notice: SubmissionNotice) -> Result<()>;

    async fn publish_verdict_assigned(&self, notice: VerdictNotice) -> Result<()>;

    async fn publish_match_ended(&self, notice: MatchEndedNotice) -> Result<()>;

    async fn publish_match_cancelled(&self, notice: MatchCancelledNotice) -> Result<()>;

    async fn publish_queue_expired(&self, notice: QueueExpiredNotice) -> Result<()>;
}

/// Configuration for notice publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
        }
    }
}

/// AMQP-backed publisher
pub struct AmqpNoticePublisher {
    channel: amqprs::channel::Channel,
    config: PublisherConfig,
    published: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl AmqpNoticePublisher {
    /// Create a publisher and declare the match-events exchange.
    pub async fn new(channel: amqprs::channel::Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self {
            channel,
            config,
            published: std::sync::Mutex::new(std::collections::HashSet::new()),
        };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args =
            amqprs::channel::ExchangeDeclareArguments::new(MATCH_EVENTS_EXCHANGE, "topic");
        self.channel
            .exchange_declare(args)
            .await
            .map_err(|e| ArenaError::AmqpConnectionFailed {
                message: format!("Failed to declare match events exchange: {}", e),
            })?;
        info!(exchange = MATCH_EVENTS_EXCHANGE, "Declared AMQP exchange");
        Ok(())
    }

    /// Publish with bounded retry. Correlation ids of delivered envelopes are
    /// remembered so a retried caller cannot double-send; consumers still see
    /// at-least-once delivery overall and must dedupe on correlation_id.
    async fn publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        if self.config.enable_deduplication {
            let published = self.published.lock().map_err(|_| ArenaError::InternalError {
                message: "Failed to acquire published messages lock".to_string(),
            })?;
            if published.contains(&envelope.correlation_id) {
                debug!(
                    correlation_id = %envelope.correlation_id,
                    "Notice already published, skipping"
                );
                return Ok(());
            }
        }

        let mut attempt = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(()) => {
                    if self.config.enable_deduplication {
                        if let Ok(mut published) = self.published.lock() {
                            published.insert(envelope.correlation_id.clone());
                        }
                    }
                    debug!(
                        correlation_id = %envelope.correlation_id,
                        routing_key = %envelope.routing_key,
                        "Published notice"
                    );
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        error!(
                            correlation_id = %envelope.correlation_id,
                            "Failed to publish notice after {} retries: {}",
                            self.config.max_retries, e
                        );
                        return Err(e);
                    }
                    warn!(
                        "Publish attempt {} failed for notice {}: {}. Retrying in {:?}",
                        attempt, envelope.correlation_id, e, delay
                    );
                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    async fn try_publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = amqprs::channel::BasicPublishArguments::new(
            MATCH_EVENTS_EXCHANGE,
            &envelope.routing_key,
        );
        let mut properties = amqprs::BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| ArenaError::AmqpConnectionFailed {
                message: format!("Failed to publish notice: {}", e),
            })?;
        Ok(())
    }
}

#[async_trait]
impl NoticePublisher for AmqpNoticePublisher {
    async fn publish_match_started(&self, notice: MatchStartedNotice) -> Result<()> {
        let envelope = MessageEnvelope::new(notice, MATCH_STARTED_ROUTING_KEY.to_string());
        self.publish(&envelope).await
    }

    async fn publish_submission_recorded(&self, notice: SubmissionNotice) -> Result<()> {
        let envelope = MessageEnvelope::new(notice, MATCH_SUBMISSION_ROUTING_KEY.to_string());
        self.publish(&envelope).await
    }

    async fn publish_verdict_assigned(&self, notice: VerdictNotice) -> Result<()> {
        let envelope = MessageEnvelope::new(notice, MATCH_VERDICT_ROUTING_KEY.to_string());
        self.publish(&envelope).await
    }

    async fn publish_match_ended(&self, notice: MatchEndedNotice) -> Result<()> {
        let envelope = MessageEnvelope::new(notice, MATCH_ENDED_ROUTING_KEY.to_string());
        self.publish(&envelope).await
    }

    async fn publish_match_cancelled(&self, notice: MatchCancelledNotice) -> Result<()> {
        let envelope = MessageEnvelope::new(notice, MATCH_CANCELLED_ROUTING_KEY.to_string());
        self.publish(&envelope).await
    }

    async fn publish_queue_expired(&self, notice: QueueExpiredNotice) -> Result<()> {
        let envelope = MessageEnvelope::new(notice, QUEUE_EXPIRED_ROUTING_KEY.to_string());
        self.publish(&envelope).await
    }
}

/// Mock publisher for testing
#[derive(Debug, Default)]
pub struct MockNoticePublisher {
    published_notices: std::sync::Mutex<Vec<String>>,
}

impl MockNoticePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routing keys of all published notices, in publish order.
    pub fn published_notices(&self) -> Vec<String> {
        self.published_notices
            .lock()
            .map(|notices| notices.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut notices) = self.published_notices.lock() {
            notices.clear();
        }
    }

    fn record(&self, routing_key: &str) {
        if let Ok(mut notices) = self.published_notices.lock() {
            notices.push(routing_key.to_string());
        }
    }
}

#[async_trait]
impl NoticePublisher for MockNoticePublisher {
    async fn publish_match_started(&self, _notice: MatchStartedNotice) -> Result<()> {
        self.record(MATCH_STARTED_ROUTING_KEY);
        Ok(())
    }

    async fn publish_submission_recorded(&self, _notice: SubmissionNotice) -> Result<()> {
        self.record(MATCH_SUBMISSION_ROUTING_KEY);
        Ok(())
    }

    async fn publish_verdict_assigned(&self, _notice: VerdictNotice) -> Result<()> {
        self.record(MATCH_VERDICT_ROUTING_KEY);
        Ok(())
    }

    async fn publish_match_ended(&self, _notice: MatchEndedNotice) -> Result<()> {
        self.record(MATCH_ENDED_ROUTING_KEY);
        Ok(())
    }

    async fn publish_match_cancelled(&self, _notice: MatchCancelledNotice) -> Result<()> {
        self.record(MATCH_CANCELLED_ROUTING_KEY);
        Ok(())
    }

    async fn publish_queue_expired(&self, _notice: QueueExpiredNotice) -> Result<()> {
        self.record(QUEUE_EXPIRED_ROUTING_KEY);
        Ok(())
    }
}
