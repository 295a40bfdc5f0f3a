//! Metrics collection using Prometheus
//!
//! Counters and gauges for the queue, match lifecycle and sync protocol,
//! exposed through the health server's /metrics endpoint.

use crate::types::Mode;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;

/// Main metrics collector for the arena service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    queue_metrics: QueueMetrics,
    match_metrics: MatchMetrics,
    sync_metrics: SyncMetrics,
    performance_metrics: PerformanceMetrics,
}

/// Queue-related metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Total queue joins by mode
    pub joins_total: IntCounterVec,

    /// Total explicit leaves by mode
    pub leaves_total: IntCounterVec,

    /// Total entries purged by the expiry sweep
    pub expired_total: IntCounterVec,

    /// Players currently waiting by mode
    pub players_waiting: IntGaugeVec,

    /// Time spent in queue before pairing
    pub wait_time_seconds: HistogramVec,
}

/// Match lifecycle metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Total matches created by mode
    pub created_total: IntCounterVec,

    /// Total matches completed by mode
    pub completed_total: IntCounterVec,

    /// Matches cancelled or expired before starting
    pub abandoned_total: IntCounterVec,

    /// Completions decided by forfeiture walkover
    pub walkovers_total: IntCounter,

    /// Matches currently in progress
    pub active_matches: IntGauge,
}

/// Sync protocol metrics
#[derive(Clone)]
pub struct SyncMetrics {
    /// Submissions recorded, by mode
    pub submissions_total: IntCounterVec,

    /// Verdicts recorded, by verdict
    pub verdicts_total: IntCounterVec,

    /// Participants flipped to disconnected by the presence sweep
    pub disconnects_total: IntCounter,

    /// AMQP notices published, by routing key and status
    pub notices_total: IntCounterVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Pairing scan duration
    pub pairing_duration: Histogram,

    /// Rating calculation duration
    pub rating_duration: Histogram,
}

fn mode_label(mode: Mode) -> String {
    mode.to_string()
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let sync_metrics = SyncMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            queue_metrics,
            match_metrics,
            sync_metrics,
            performance_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn sync(&self) -> &SyncMetrics {
        &self.sync_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a queue join.
    pub fn record_join(&self, mode: Mode) {
        self.queue_metrics
            .joins_total
            .with_label_values(&[&mode_label(mode)])
            .inc();
    }

    /// Record an explicit leave.
    pub fn record_leave(&self, mode: Mode) {
        self.queue_metrics
            .leaves_total
            .with_label_values(&[&mode_label(mode)])
            .inc();
    }

    /// Record entries purged by the expiry sweep.
    pub fn record_expired(&self, mode: Mode, count: usize) {
        self.queue_metrics
            .expired_total
            .with_label_values(&[&mode_label(mode)])
            .inc_by(count as u64);
    }

    /// Update the waiting gauge for a mode.
    pub fn set_players_waiting(&self, mode: Mode, waiting: usize) {
        self.queue_metrics
            .players_waiting
            .with_label_values(&[&mode_label(mode)])
            .set(waiting as i64);
    }

    /// Record a successful pairing, with the wait each entry spent queued.
    pub fn record_match_created(&self, mode: Mode, waits: &[Duration]) {
        self.match_metrics
            .created_total
            .with_label_values(&[&mode_label(mode)])
            .inc();
        for wait in waits {
            self.queue_metrics
                .wait_time_seconds
                .with_label_values(&[&mode_label(mode)])
                .observe(wait.as_secs_f64());
        }
    }

    /// Record a match moving to in-progress.
    pub fn record_match_started(&self) {
        self.match_metrics.active_matches.inc();
    }

    /// Record a completed match.
    pub fn record_match_completed(&self, mode: Mode, walkover: bool) {
        self.match_metrics
            .completed_total
            .with_label_values(&[&mode_label(mode)])
            .inc();
        if walkover {
            self.match_metrics.walkovers_total.inc();
        }
        self.match_metrics.active_matches.dec();
    }

    /// Record a match cancelled or expired before starting.
    pub fn record_match_abandoned(&self, mode: Mode, reason: &str) {
        self.match_metrics
            .abandoned_total
            .with_label_values(&[&mode_label(mode), reason])
            .inc();
    }

    /// Record a stored submission.
    pub fn record_submission(&self, mode: Mode) {
        self.sync_metrics
            .submissions_total
            .with_label_values(&[&mode_label(mode)])
            .inc();
    }

    /// Record a verdict by its wire name.
    pub fn record_verdict(&self, verdict: &str) {
        self.sync_metrics
            .verdicts_total
            .with_label_values(&[verdict])
            .inc();
    }

    /// Record a presence-sweep disconnect.
    pub fn record_disconnect(&self) {
        self.sync_metrics.disconnects_total.inc();
    }

    /// Record an AMQP notice publish attempt.
    pub fn record_notice(&self, routing_key: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.sync_metrics
            .notices_total
            .with_label_values(&[routing_key, status])
            .inc();
    }

    /// Record a pairing scan duration.
    pub fn record_pairing_duration(&self, duration: Duration) {
        self.performance_metrics
            .pairing_duration
            .observe(duration.as_secs_f64());
    }

    /// Record a rating calculation duration.
    pub fn record_rating_duration(&self, duration: Duration) {
        self.performance_metrics
            .rating_duration
            .observe(duration.as_secs_f64());
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let joins_total = IntCounterVec::new(
            Opts::new("arena_queue_joins_total", "Total queue joins"),
            &["mode"],
        )?;
        let leaves_total = IntCounterVec::new(
            Opts::new("arena_queue_leaves_total", "Total explicit queue leaves"),
            &["mode"],
        )?;
        let expired_total = IntCounterVec::new(
            Opts::new(
                "arena_queue_expired_total",
                "Queue entries purged by the expiry sweep",
            ),
            &["mode"],
        )?;
        let players_waiting = IntGaugeVec::new(
            Opts::new("arena_players_waiting", "Players currently waiting in queue"),
            &["mode"],
        )?;
        let wait_time_seconds = HistogramVec::new(
            HistogramOpts::new(
                "arena_queue_wait_time_seconds",
                "Time spent in queue before pairing",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
            &["mode"],
        )?;

        registry.register(Box::new(joins_total.clone()))?;
        registry.register(Box::new(leaves_total.clone()))?;
        registry.register(Box::new(expired_total.clone()))?;
        registry.register(Box::new(players_waiting.clone()))?;
        registry.register(Box::new(wait_time_seconds.clone()))?;

        Ok(Self {
            joins_total,
            leaves_total,
            expired_total,
            players_waiting,
            wait_time_seconds,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let created_total = IntCounterVec::new(
            Opts::new("arena_matches_created_total", "Total matches created"),
            &["mode"],
        )?;
        let completed_total = IntCounterVec::new(
            Opts::new("arena_matches_completed_total", "Total matches completed"),
            &["mode"],
        )?;
        let abandoned_total = IntCounterVec::new(
            Opts::new(
                "arena_matches_abandoned_total",
                "Matches cancelled or expired before starting",
            ),
            &["mode", "reason"],
        )?;
        let walkovers_total = IntCounter::new(
            "arena_walkovers_total",
            "Completions decided by forfeiture walkover",
        )?;
        let active_matches =
            IntGauge::new("arena_active_matches", "Matches currently in progress")?;

        registry.register(Box::new(created_total.clone()))?;
        registry.register(Box::new(completed_total.clone()))?;
        registry.register(Box::new(abandoned_total.clone()))?;
        registry.register(Box::new(walkovers_total.clone()))?;
        registry.register(Box::new(active_matches.clone()))?;

        Ok(Self {
            created_total,
            completed_total,
            abandoned_total,
            walkovers_total,
            active_matches,
        })
    }
}

impl SyncMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let submissions_total = IntCounterVec::new(
            Opts::new("arena_submissions_total", "Submissions recorded"),
            &["mode"],
        )?;
        let verdicts_total = IntCounterVec::new(
            Opts::new("arena_verdicts_total", "Verdicts recorded"),
            &["verdict"],
        )?;
        let disconnects_total = IntCounter::new(
            "arena_disconnects_total",
            "Participants flipped to disconnected by the presence sweep",
        )?;
        let notices_total = IntCounterVec::new(
            Opts::new("arena_notices_total", "AMQP notices published"),
            &["routing_key", "status"],
        )?;

        registry.register(Box::new(submissions_total.clone()))?;
        registry.register(Box::new(verdicts_total.clone()))?;
        registry.register(Box::new(disconnects_total.clone()))?;
        registry.register(Box::new(notices_total.clone()))?;

        Ok(Self {
            submissions_total,
            verdicts_total,
            disconnects_total,
            notices_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pairing_duration = Histogram::with_opts(
            HistogramOpts::new("arena_pairing_duration_seconds", "Pairing scan duration")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        let rating_duration = Histogram::with_opts(
            HistogramOpts::new(
                "arena_rating_duration_seconds",
                "Rating calculation duration",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01]),
        )?;

        registry.register(Box::new(pairing_duration.clone()))?;
        registry.register(Box::new(rating_duration.clone()))?;

        Ok(Self {
            pairing_duration,
            rating_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_registers_metrics() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_join(Mode::Ranked1v1);
        collector.record_match_created(Mode::Ranked1v1, &[Duration::from_secs(3)]);
        collector.record_match_started();
        collector.record_match_completed(Mode::Ranked1v1, false);

        let families = collector.registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "arena_queue_joins_total"));
        assert!(families
            .iter()
            .any(|f| f.get_name() == "arena_active_matches"));
    }

    #[test]
    fn test_active_matches_gauge_tracks_lifecycle() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_match_started();
        collector.record_match_started();
        collector.record_match_completed(Mode::Quick1v1, true);

        assert_eq!(collector.matches().active_matches.get(), 1);
        assert_eq!(collector.matches().walkovers_total.get(), 1);
    }

    #[test]
    fn test_separate_collectors_use_separate_registries() {
        let a = MetricsCollector::new().unwrap();
        let b = MetricsCollector::new().unwrap();
        a.record_join(Mode::Quick1v1);
        assert_eq!(
            b.queue()
                .joins_total
                .with_label_values(&["quick_1v1"])
                .get(),
            0
        );
    }
}
