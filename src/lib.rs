//! Algo Arena - Matchmaking and synchronization engine for competitive
//! programming battles
//!
//! This crate pairs players into rated 1v1 and 3v3 matches, keeps live
//! matches synchronized through a kind-tagged event bus, resolves concurrent
//! submissions against server-assigned timestamps, and settles Elo ratings
//! when matches end.

pub mod amqp;
pub mod config;
pub mod error;
pub mod matchmaking;
pub mod metrics;
pub mod queue;
pub mod rating;
pub mod resolver;
pub mod service;
pub mod store;
pub mod sync;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{ArenaError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::NoticePublisher;
pub use matchmaking::MatchmakingService;
pub use store::{InMemoryMatchStore, MatchStore};
pub use sync::{EventBus, MatchCoordinator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
