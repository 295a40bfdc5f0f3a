//! Queue store for pending matchmaking entries

pub mod store;

pub use store::QueueStore;
