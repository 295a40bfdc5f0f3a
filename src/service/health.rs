//! Health, readiness and metrics endpoints
//!
//! HTTP surface for orchestration probes and Prometheus scraping, served on
//! the configured health port via Axum. `/health` runs the full component
//! check; `/ready` and `/live` are the cheap probe variants.

use crate::service::app::AppState;
use crate::types::Mode;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Service statistics reported alongside the health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Players waiting across all queues
    pub players_waiting: usize,
    /// Matches with a live sync worker
    pub active_matches: usize,
}

/// Full health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

impl HealthCheck {
    /// Run every component check and roll them up into one status.
    pub async fn check(app: Arc<AppState>) -> Self {
        let mut checks = Vec::new();
        let mut overall = HealthStatus::Healthy;

        for check in [
            Self::check_service_running(&app).await,
            Self::check_queue_workers(&app).await,
            Self::check_amqp(&app),
        ] {
            match check.status {
                HealthStatus::Unhealthy => overall = HealthStatus::Unhealthy,
                HealthStatus::Degraded if overall == HealthStatus::Healthy => {
                    overall = HealthStatus::Degraded;
                }
                _ => {}
            }
            checks.push(check);
        }

        let stats = Self::gather_stats(&app).await;

        HealthCheck {
            status: overall,
            service: app.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        }
    }

    /// Liveness: the process is up and has not begun shutting down.
    pub async fn liveness(app: &AppState) -> HealthStatus {
        if app.is_running().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Readiness: running and the queue workers answer commands.
    pub async fn readiness(app: &AppState) -> HealthStatus {
        if !app.is_running().await {
            return HealthStatus::Unhealthy;
        }
        Self::check_queue_workers(app).await.status
    }

    async fn check_service_running(app: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();
        let (status, message) = if app.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };
        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Round-trip a status command through every mode's worker.
    async fn check_queue_workers(app: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();
        let matchmaking = app.matchmaking();

        let mut status = HealthStatus::Healthy;
        let mut message = None;
        for mode in Mode::ALL {
            if let Err(e) = matchmaking.status(mode).await {
                error!(mode = %mode, "Queue worker status check failed: {}", e);
                status = HealthStatus::Unhealthy;
                message = Some(format!("Queue worker for {} unresponsive: {}", mode, e));
                break;
            }
        }

        ComponentCheck {
            name: "queue_workers".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp(app: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();
        let (status, message) = if app.amqp_connected() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Degraded,
                Some("Running without a broker connection".to_string()),
            )
        };
        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_stats(app: &AppState) -> ServiceStats {
        let mut players_waiting = 0;
        let matchmaking = app.matchmaking();
        for mode in Mode::ALL {
            if let Ok(status) = matchmaking.status(mode).await {
                players_waiting += status.waiting;
            }
        }
        ServiceStats {
            players_waiting,
            active_matches: app.coordinator().live_matches().await,
        }
    }
}

/// Build the router serving the operational endpoints.
pub fn router(app: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/live", get(live_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(app)
}

async fn root_handler(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "service": app.config().service.name,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/ready", "/live", "/metrics"]
    }))
}

async fn health_handler(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Health check requested");
    let health = HealthCheck::check(app).await;
    let code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(health))
}

async fn ready_handler(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    match HealthCheck::readiness(&app).await {
        HealthStatus::Healthy => (StatusCode::OK, "Ready"),
        HealthStatus::Degraded => (StatusCode::OK, "Degraded but ready"),
        HealthStatus::Unhealthy => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
    }
}

async fn live_handler(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    match HealthCheck::liveness(&app).await {
        HealthStatus::Healthy => (StatusCode::OK, "Alive"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
    }
}

async fn metrics_handler(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    let families = app.metrics().registry().gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", encoder.format_type())
            .body(body)
            .unwrap(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body("Failed to encode metrics".to_string())
                .unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockNoticePublisher;
    use crate::config::AppConfig;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt; // for oneshot

    fn app_state() -> Arc<AppState> {
        let publisher = Arc::new(MockNoticePublisher::new());
        Arc::new(AppState::with_publisher(AppConfig::default(), publisher, None).unwrap())
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let router = router(app_state());
        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_live_reports_unhealthy_before_start() {
        let router = router(app_state());
        let response = router
            .oneshot(Request::builder().uri("/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_prometheus_text() {
        let state = app_state();
        state.metrics().record_join(crate::types::Mode::Quick1v1);

        let router = router(state);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));
    }

    #[tokio::test]
    async fn test_health_check_degrades_without_broker() {
        let health = HealthCheck::check(app_state()).await;
        // Not started and no broker, so never fully healthy
        assert_ne!(health.status, HealthStatus::Healthy);
        assert!(health
            .checks
            .iter()
            .any(|c| c.name == "amqp_connection" && c.status == HealthStatus::Degraded));
    }

    #[tokio::test]
    async fn test_queue_workers_answer_status() {
        let state = app_state();
        let check = HealthCheck::check_queue_workers(&state).await;
        assert_eq!(check.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_404_handling() {
        let router = router(app_state());
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
