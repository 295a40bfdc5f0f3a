//! Matchmaking: tolerance-window pairing and the per-mode queue workers

pub mod pairing;
pub mod service;

pub use service::MatchmakingService;
