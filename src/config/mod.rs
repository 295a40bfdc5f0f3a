//! Configuration management for the arena service

pub mod app;

pub use app::{
    validate_config, AmqpSettings, AppConfig, MatchmakingSettings, RatingSettings,
    ServiceSettings, SyncSettings,
};
