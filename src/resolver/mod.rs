//! Conflict resolution over the durable submission log

pub mod conflict;

pub use conflict::{authoritative_submissions, first_solves, placements_for_sides, scoreboard};
