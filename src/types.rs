//! Common types used throughout the matchmaking and sync engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for players (supplied by the identity provider)
pub type UserId = String;

/// Identifier for a pre-formed team
pub type TeamId = String;

/// Identifier for a problem in the problem set
pub type ProblemId = String;

/// Unique identifier for matches
pub type MatchId = Uuid;

/// Unique identifier for submissions
pub type SubmissionId = Uuid;

/// Matchmaking mode a player can queue for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Quick1v1,
    Ranked1v1,
    Team3v3,
}

impl Mode {
    /// All modes, in queue-sweep order.
    pub const ALL: [Mode; 3] = [Mode::Quick1v1, Mode::Ranked1v1, Mode::Team3v3];

    /// Number of players on each side of a match.
    pub fn team_size(&self) -> usize {
        match self {
            Mode::Quick1v1 | Mode::Ranked1v1 => 1,
            Mode::Team3v3 => 3,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Quick1v1 => write!(f, "quick_1v1"),
            Mode::Ranked1v1 => write!(f, "ranked_1v1"),
            Mode::Team3v3 => write!(f, "3v3_team"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = crate::error::ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick_1v1" => Ok(Mode::Quick1v1),
            "ranked_1v1" => Ok(Mode::Ranked1v1),
            "3v3_team" => Ok(Mode::Team3v3),
            other => Err(crate::error::ArenaError::InvalidMode {
                value: other.to_string(),
            }),
        }
    }
}

/// A pending request to be matched, scoped to one mode
///
/// Owned exclusively by the queue store; created on join and removed on
/// pairing success, explicit leave, or TTL expiry. At most one live entry
/// exists per (user, mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub user_id: UserId,
    pub mode: Mode,
    pub rating: i32,
    pub enqueued_at: DateTime<Utc>,
    pub team_id: Option<TeamId>,
}

impl QueueEntry {
    /// How long this entry has been waiting at `now`.
    pub fn waited(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.enqueued_at
    }
}

/// Lifecycle status of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Waiting,
    InProgress,
    Completed,
    Cancelled,
    Expired,
}

impl MatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MatchStatus::Completed | MatchStatus::Cancelled | MatchStatus::Expired
        )
    }

    /// Status transitions are strictly forward. A live match can only end in
    /// `Completed` (including forfeiture walkovers); `Cancelled` and `Expired`
    /// are reachable only from `Waiting`.
    pub fn can_transition_to(&self, next: MatchStatus) -> bool {
        match (self, next) {
            (MatchStatus::Waiting, MatchStatus::InProgress) => true,
            (MatchStatus::Waiting, MatchStatus::Cancelled) => true,
            (MatchStatus::Waiting, MatchStatus::Expired) => true,
            (MatchStatus::InProgress, MatchStatus::Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchStatus::Waiting => "waiting",
            MatchStatus::InProgress => "in_progress",
            MatchStatus::Completed => "completed",
            MatchStatus::Cancelled => "cancelled",
            MatchStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// Final outcome of a match, expressed as placements (1 = first)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub placements: Vec<(UserId, u32)>,
    /// True when the outcome was produced by a forfeiture walkover rather
    /// than the submission log.
    pub walkover: bool,
}

impl MatchOutcome {
    pub fn placement_of(&self, user_id: &str) -> Option<u32> {
        self.placements
            .iter()
            .find(|(id, _)| id == user_id)
            .map(|(_, p)| *p)
    }
}

/// A match row, owned by the persistent store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub mode: Mode,
    pub status: MatchStatus,
    /// The two sides of the match, fixed at pairing time.
    pub sides: [Vec<UserId>; 2],
    pub problem_set: Vec<ProblemId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<MatchOutcome>,
}

impl MatchRecord {
    /// All participants across both sides.
    pub fn participants(&self) -> impl Iterator<Item = &UserId> {
        self.sides.iter().flatten()
    }

    /// Which side (0 or 1) a user plays on.
    pub fn side_of(&self, user_id: &str) -> Option<usize> {
        self.sides
            .iter()
            .position(|side| side.iter().any(|u| u == user_id))
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.side_of(user_id).is_some()
    }
}

/// Advisory connection state derived from presence heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        write!(f, "{}", s)
    }
}

/// One row per player per match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub match_id: MatchId,
    pub user_id: UserId,
    pub connection_state: ConnectionState,
    pub last_heartbeat_at: DateTime<Utc>,
    pub score: i64,
    pub submissions: Vec<SubmissionId>,
}

/// Judging verdict for a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pending,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    CompileError,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Verdict::Pending)
    }
}

/// An entry in the append-only submission log
///
/// `submitted_at` is assigned by the server when the submission is durably
/// stored and is strictly monotonic within a match; it is the sole ordering
/// authority for "who scored first". Immutable once a final verdict lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub match_id: MatchId,
    pub user_id: UserId,
    pub problem_id: ProblemId,
    pub submitted_at: DateTime<Utc>,
    pub verdict: Verdict,
}

/// Discrete skill band derived from elo via fixed thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl Tier {
    pub fn from_elo(elo: i32) -> Self {
        match elo {
            e if e < 1200 => Tier::Bronze,
            e if e < 1600 => Tier::Silver,
            e if e < 2000 => Tier::Gold,
            e if e < 2400 => Tier::Platinum,
            _ => Tier::Diamond,
        }
    }
}

/// Per-user, per-mode skill record. Mutated only by the rating engine,
/// exactly once per completed match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingRecord {
    pub user_id: UserId,
    pub mode: Mode,
    pub elo: i32,
    pub tier: Tier,
    pub matches_played: u32,
    pub matches_won: u32,
    pub current_win_streak: u32,
}

impl RatingRecord {
    pub fn new(user_id: UserId, mode: Mode, elo: i32) -> Self {
        Self {
            user_id,
            mode,
            elo,
            tier: Tier::from_elo(elo),
            matches_played: 0,
            matches_won: 0,
            current_win_streak: 0,
        }
    }
}

/// Rating movement for one player after a completed match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingChange {
    pub user_id: UserId,
    pub old_elo: i32,
    pub new_elo: i32,
    pub delta: i32,
    pub placement: u32,
}

/// Class of a match event, determining its delivery guarantees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Best-effort fan-out, no persistence, safe to drop
    Ephemeral,
    /// Persisted first, then fanned out; recoverable via snapshot re-query
    Durable,
    /// Derived from heartbeats; informational only
    Presence,
}

/// All events that flow over a match's event channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchEvent {
    Tick {
        remaining_seconds: u64,
    },
    Typing {
        user_id: UserId,
    },
    Chat {
        user_id: UserId,
        message: String,
    },
    MatchStarted,
    SubmissionRecorded {
        submission: Submission,
    },
    VerdictAssigned {
        submission_id: SubmissionId,
        user_id: UserId,
        problem_id: ProblemId,
        verdict: Verdict,
    },
    PlayerLeft {
        user_id: UserId,
    },
    MatchEnded {
        outcome: MatchOutcome,
        rating_changes: Vec<RatingChange>,
    },
    PresenceChanged {
        user_id: UserId,
        state: ConnectionState,
    },
}

impl MatchEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MatchEvent::Tick { .. } | MatchEvent::Typing { .. } | MatchEvent::Chat { .. } => {
                EventKind::Ephemeral
            }
            MatchEvent::MatchStarted
            | MatchEvent::SubmissionRecorded { .. }
            | MatchEvent::VerdictAssigned { .. }
            | MatchEvent::PlayerLeft { .. }
            | MatchEvent::MatchEnded { .. } => EventKind::Durable,
            MatchEvent::PresenceChanged { .. } => EventKind::Presence,
        }
    }
}

/// Result of a queue join
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JoinOutcome {
    /// No eligible opponent yet; the entry waits in the queue
    Waiting,
    /// Paired immediately; the match awaits both sides' acknowledgment
    Matched { match_id: MatchId },
}

/// Aggregate queue statistics. Never leaks other users' identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub mode: Mode,
    pub waiting: usize,
    pub avg_wait_ms: u64,
}

/// Per-player line of the derived scoreboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreLine {
    pub user_id: UserId,
    pub score: i64,
    pub solved: Vec<ProblemId>,
    pub first_solves: Vec<ProblemId>,
}

/// Full durable state of a match, used for reconnect reconciliation
///
/// A client that missed any number of events converges by replacing its
/// local state with a snapshot before resuming incremental updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub record: MatchRecord,
    pub participants: Vec<Participant>,
    pub submissions: Vec<Submission>,
    pub scoreboard: Vec<ScoreLine>,
}
