//! Persistent store for durable match entities
//!
//! The store is the single source of truth for matches, participants, the
//! append-only submission log, and rating records. The broadcast channel
//! carries no authoritative state; a client can always rebuild from here.

pub mod memory;

use crate::error::Result;
use crate::types::{
    ConnectionState, MatchId, MatchOutcome, MatchRecord, MatchStatus, Mode, Participant,
    RatingRecord, Submission, SubmissionId, UserId, Verdict,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::InMemoryMatchStore;

/// Storage interface for all durable entities
///
/// Implementations must make `transition_status` enforce strictly-forward
/// status transitions, assign server-side monotonic submission timestamps,
/// and apply match completion (status + outcome + rating records) as a
/// single atomic, idempotent unit.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Create a match row together with its participant rows.
    async fn create_match(&self, record: MatchRecord) -> Result<()>;

    async fn get_match(&self, match_id: MatchId) -> Result<MatchRecord>;

    /// Move a match to `next`, stamping `started_at`/`ended_at` as
    /// appropriate. Rejects terminal matches with `MatchTerminal` and any
    /// backward transition.
    async fn transition_status(&self, match_id: MatchId, next: MatchStatus) -> Result<MatchRecord>;

    /// The non-terminal match a user is currently part of for a mode, if any.
    async fn active_match_for(&self, user_id: &str, mode: Mode) -> Result<Option<MatchId>>;

    async fn participants(&self, match_id: MatchId) -> Result<Vec<Participant>>;

    /// Record a presence heartbeat. Advisory only; never gates scoring.
    async fn record_heartbeat(
        &self,
        match_id: MatchId,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn set_connection_state(
        &self,
        match_id: MatchId,
        user_id: &str,
        state: ConnectionState,
    ) -> Result<()>;

    /// Append a submission to the log. The server assigns `submitted_at` at
    /// store time, strictly monotonic within the match; client-reported time
    /// is never consulted.
    async fn append_submission(
        &self,
        match_id: MatchId,
        user_id: &str,
        problem_id: &str,
    ) -> Result<Submission>;

    /// Record a verdict. Re-recording the same final verdict is a no-op
    /// (duplicate notifications are tolerated); changing a final verdict is
    /// an error.
    async fn record_verdict(&self, submission_id: SubmissionId, verdict: Verdict)
        -> Result<Submission>;

    /// The full submission log for a match, ordered by `submitted_at`.
    async fn submissions(&self, match_id: MatchId) -> Result<Vec<Submission>>;

    /// Overwrite participant scores from a scoreboard recomputation.
    async fn update_scores(&self, match_id: MatchId, scores: &[(UserId, i64)]) -> Result<()>;

    async fn rating(&self, user_id: &str, mode: Mode) -> Result<Option<RatingRecord>>;

    /// Complete a match: transition to `Completed`, record the outcome and
    /// replace the rating records, all atomically. Returns `false` without
    /// touching anything if the match is already completed, making a retried
    /// completion event a no-op.
    async fn apply_completion(
        &self,
        match_id: MatchId,
        outcome: MatchOutcome,
        records: Vec<RatingRecord>,
    ) -> Result<bool>;
}
