//! Utility functions for the matchmaking and sync engine

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

/// Generate a new unique match ID
pub fn generate_match_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique submission ID
pub fn generate_submission_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Calculate the absolute difference between two ratings
pub fn rating_difference(rating1: i32, rating2: i32) -> i32 {
    (rating1 - rating2).abs()
}

/// Check if two ratings are within the given tolerance
pub fn ratings_within_tolerance(rating1: i32, rating2: i32, tolerance: i32) -> bool {
    rating_difference(rating1, rating2) <= tolerance
}

/// Wall-clock readings driven by the tokio clock
///
/// `now()` is the wall time captured at construction plus the tokio-clock
/// elapsed time since then, so workers that measure silence or queue age
/// observe time passing exactly as their timers do, including under
/// `tokio::time::pause`.
#[derive(Debug, Clone)]
pub struct WorkerClock {
    wall: DateTime<Utc>,
    instant: tokio::time::Instant,
}

impl WorkerClock {
    pub fn start() -> Self {
        Self {
            wall: current_timestamp(),
            instant: tokio::time::Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.instant.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }
}

/// Exponential backoff with jitter for transport retries
///
/// Delays grow by `factor` from `base` up to `cap`, with up to 25% random
/// jitter added to each delay to avoid thundering reconnects.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    factor: u32,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, factor: u32, cap: Duration) -> Self {
        Self {
            base,
            factor,
            cap,
            attempt: 0,
        }
    }

    /// Defaults matching the reconnection policy: base 1s, factor 2, cap 30s.
    pub fn transport() -> Self {
        Self::new(Duration::from_secs(1), 2, Duration::from_secs(30))
    }

    /// Next delay to sleep before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.factor.saturating_pow(self.attempt.min(16));
        let raw = self.base.saturating_mul(exp).min(self.cap);
        self.attempt = self.attempt.saturating_add(1);

        let jitter_max = raw.as_millis() as u64 / 4;
        let jitter = if jitter_max > 0 {
            rand::thread_rng().gen_range(0..=jitter_max)
        } else {
            0
        };
        raw + Duration::from_millis(jitter)
    }

    /// Reset after a successful attempt.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        assert_ne!(generate_match_id(), generate_match_id());
        assert_ne!(generate_submission_id(), generate_submission_id());
    }

    #[test]
    fn test_rating_difference() {
        assert_eq!(rating_difference(1500, 1400), 100);
        assert_eq!(rating_difference(1400, 1500), 100);
        assert_eq!(rating_difference(1500, 1500), 0);
    }

    #[test]
    fn test_ratings_within_tolerance() {
        assert!(ratings_within_tolerance(1500, 1450, 100));
        assert!(!ratings_within_tolerance(1500, 1350, 100));
        assert!(ratings_within_tolerance(1500, 1500, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_clock_follows_tokio_time() {
        let clock = WorkerClock::start();
        let before = clock.now();
        tokio::time::advance(std::time::Duration::from_secs(30)).await;
        assert!((clock.now() - before).num_seconds() >= 30);
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 2, Duration::from_secs(30));

        let first = backoff.next_delay();
        assert!(first >= Duration::from_secs(1));
        assert!(first <= Duration::from_millis(1250));

        let second = backoff.next_delay();
        assert!(second >= Duration::from_secs(2));

        // After many attempts the delay stays within cap + 25% jitter
        for _ in 0..20 {
            let d = backoff.next_delay();
            assert!(d <= Duration::from_millis(37_500));
        }
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::transport();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert!(backoff.next_delay() <= Duration::from_millis(1250));
    }
}
