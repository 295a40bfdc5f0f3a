//! AMQP message definitions and serialization

use crate::error::{ArenaError, Result};
use crate::types::{
    MatchId, MatchOutcome, Mode, ProblemId, RatingChange, Submission, SubmissionId, UserId,
    Verdict,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic exchange carrying all outbound match notifications
pub const MATCH_EVENTS_EXCHANGE: &str = "arena.match_events";

/// Routing keys per notification type
pub const MATCH_STARTED_ROUTING_KEY: &str = "match.started";
pub const MATCH_SUBMISSION_ROUTING_KEY: &str = "match.submission";
pub const MATCH_VERDICT_ROUTING_KEY: &str = "match.verdict";
pub const MATCH_ENDED_ROUTING_KEY: &str = "match.ended";
pub const MATCH_CANCELLED_ROUTING_KEY: &str = "match.cancelled";
pub const QUEUE_EXPIRED_ROUTING_KEY: &str = "queue.expired";

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            routing_key,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            ArenaError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            ArenaError::InternalError {
                message: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// A match moved to in-progress after both sides acknowledged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchStartedNotice {
    pub match_id: MatchId,
    pub mode: Mode,
    pub sides: [Vec<UserId>; 2],
    pub problem_set: Vec<ProblemId>,
    pub started_at: DateTime<Utc>,
}

/// A submission was durably recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionNotice {
    pub match_id: MatchId,
    pub submission: Submission,
}

/// A judging verdict landed for a stored submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictNotice {
    pub match_id: MatchId,
    pub submission_id: SubmissionId,
    pub user_id: UserId,
    pub problem_id: ProblemId,
    pub verdict: Verdict,
}

/// A match reached `Completed`, with its outcome and rating movements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEndedNotice {
    pub match_id: MatchId,
    pub mode: Mode,
    pub outcome: MatchOutcome,
    pub rating_changes: Vec<RatingChange>,
}

/// A waiting match was cancelled or expired before starting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCancelledNotice {
    pub match_id: MatchId,
    pub mode: Mode,
    pub reason: String,
}

/// A queue entry aged past the TTL and was purged without finding a match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueExpiredNotice {
    pub user_id: UserId,
    pub mode: Mode,
    pub enqueued_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}
