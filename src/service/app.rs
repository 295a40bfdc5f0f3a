//! Main application state and service coordination
//!
//! Builds the whole dependency graph from configuration: the queue store and
//! its per-mode workers, the match store, the event bus, the sync
//! coordinator, the AMQP publisher and the metrics collector. Everything is
//! injected through constructors, so tests assemble the same graph with an
//! in-memory store and a mock publisher.

use crate::amqp::connection::AmqpConnection;
use crate::amqp::publisher::{AmqpNoticePublisher, NoticePublisher, PublisherConfig};
use crate::config::AppConfig;
use crate::matchmaking::MatchmakingService;
use crate::metrics::MetricsCollector;
use crate::queue::QueueStore;
use crate::rating::EloEngine;
use crate::store::{InMemoryMatchStore, MatchStore};
use crate::sync::{EventBus, MatchCoordinator};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    queue: Arc<QueueStore>,
    store: Arc<dyn MatchStore>,
    coordinator: Arc<MatchCoordinator>,
    matchmaking: Arc<MatchmakingService>,
    metrics: MetricsCollector,
    amqp_connection: Option<Arc<AmqpConnection>>,
    background_tasks: RwLock<Vec<JoinHandle<()>>>,
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application against a live AMQP broker.
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!(
            service = %config.service.name,
            amqp_url = %config.amqp.url,
            "Initializing arena service"
        );

        let connection = AmqpConnection::connect(&config.amqp)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to connect to AMQP: {}", e),
            })?;
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open AMQP channel: {}", e),
            })?;
        let publisher_config = PublisherConfig {
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            enable_deduplication: true,
        };
        let publisher: Arc<dyn NoticePublisher> = Arc::new(
            AmqpNoticePublisher::new(channel, publisher_config)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to initialize notice publisher: {}", e),
                })?,
        );

        Self::with_publisher(config, publisher, Some(Arc::new(connection)))
    }

    /// Assemble the dependency graph around an injected publisher. Used by
    /// `new` and directly by tests and dry runs that skip the broker.
    pub fn with_publisher(
        config: AppConfig,
        publisher: Arc<dyn NoticePublisher>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Result<Self, ServiceError> {
        let metrics = MetricsCollector::new().map_err(|e| ServiceError::Initialization {
            message: format!("Failed to create metrics collector: {}", e),
        })?;

        let queue = Arc::new(QueueStore::new());
        let store: Arc<dyn MatchStore> = Arc::new(InMemoryMatchStore::new());
        let bus = Arc::new(EventBus::new(config.sync.event_channel_capacity));
        let engine = EloEngine::new(config.rating.clone());
        let baseline_elo = engine.baseline_elo();

        let coordinator = Arc::new(MatchCoordinator::new(
            store.clone(),
            bus,
            publisher.clone(),
            engine,
            config.sync.clone(),
            metrics.clone(),
        ));

        let matchmaking = Arc::new(MatchmakingService::start(
            config.matchmaking.clone(),
            queue.clone(),
            store.clone(),
            coordinator.clone(),
            publisher,
            baseline_elo,
            metrics.clone(),
        ));

        Ok(Self {
            config,
            queue,
            store,
            coordinator,
            matchmaking,
            metrics,
            amqp_connection,
            background_tasks: RwLock::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    /// Start the health server and background maintenance.
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        *self.is_running.write().await = true;

        let mut tasks = self.background_tasks.write().await;

        // Health and metrics endpoints
        let router = crate::service::health::router(self.clone());
        let addr = format!("0.0.0.0:{}", self.config.service.health_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to bind health server to {}: {}", addr, e),
            })?;
        info!(addr = %addr, "Health endpoints listening");
        tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("Health server failed: {}", e);
            }
        }));

        // Reap finished match workers and keep coarse gauges fresh
        let coordinator = self.coordinator.clone();
        let is_running = self.is_running.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            while *is_running.read().await {
                interval.tick().await;
                coordinator.reap().await;
            }
        }));

        info!(service = %self.config.service.name, "Arena service started");
        Ok(())
    }

    /// Graceful shutdown: stop accepting work, abort workers, close AMQP.
    pub async fn shutdown(&self) {
        info!("Shutting down arena service");
        *self.is_running.write().await = false;

        self.matchmaking.shutdown();
        self.coordinator.shutdown().await;

        let mut tasks = self.background_tasks.write().await;
        for task in tasks.drain(..) {
            task.abort();
        }

        if self.amqp_connection.is_some() {
            // The connection closes when the last Arc drops; an explicit
            // close would need ownership, which health checks still share
            warn!("AMQP connection will close on drop");
        }
        info!("Arena service shutdown completed");
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn matchmaking(&self) -> Arc<MatchmakingService> {
        self.matchmaking.clone()
    }

    pub fn coordinator(&self) -> Arc<MatchCoordinator> {
        self.coordinator.clone()
    }

    pub fn store(&self) -> Arc<dyn MatchStore> {
        self.store.clone()
    }

    pub fn queue(&self) -> Arc<QueueStore> {
        self.queue.clone()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Whether the service holds a live broker connection. False in dry runs.
    pub fn amqp_connected(&self) -> bool {
        self.amqp_connection.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockNoticePublisher;
    use crate::types::{JoinOutcome, Mode};

    fn app() -> Arc<AppState> {
        let publisher = Arc::new(MockNoticePublisher::new());
        Arc::new(AppState::with_publisher(AppConfig::default(), publisher, None).unwrap())
    }

    #[tokio::test]
    async fn test_wired_graph_runs_a_join() {
        let app = app();
        let outcome = app
            .matchmaking()
            .join(Mode::Quick1v1, "alice", None)
            .await
            .unwrap();
        assert!(matches!(outcome, JoinOutcome::Waiting));

        let status = app.matchmaking().status(Mode::Quick1v1).await.unwrap();
        assert_eq!(status.waiting, 1);
    }

    #[tokio::test]
    async fn test_running_flag() {
        let app = app();
        assert!(!app.is_running().await);
        *app.is_running.write().await = true;
        assert!(app.is_running().await);
        app.shutdown().await;
        assert!(!app.is_running().await);
    }
}
