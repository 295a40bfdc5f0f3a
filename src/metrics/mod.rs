//! Prometheus metrics for the arena service

pub mod collector;

pub use collector::MetricsCollector;
