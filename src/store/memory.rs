//! In-memory `MatchStore` backed by a single `RwLock`
//!
//! One lock over the whole state keeps the completion path (status change,
//! outcome, rating records) a single atomic unit without cross-map ordering
//! concerns. Fine for a single-process deployment; a database-backed
//! implementation would use a transaction in the same places.

use crate::error::{ArenaError, Result};
use crate::store::MatchStore;
use crate::types::{
    ConnectionState, MatchId, MatchOutcome, MatchRecord, MatchStatus, Mode, Participant,
    RatingRecord, Submission, SubmissionId, UserId, Verdict,
};
use crate::utils::{current_timestamp, generate_submission_id};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    matches: HashMap<MatchId, MatchRecord>,
    participants: HashMap<MatchId, Vec<Participant>>,
    submissions: HashMap<MatchId, Vec<Submission>>,
    submission_index: HashMap<SubmissionId, MatchId>,
    ratings: HashMap<(UserId, Mode), RatingRecord>,
}

/// In-memory implementation of the match store
#[derive(Debug, Default)]
pub struct InMemoryMatchStore {
    inner: RwLock<Inner>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a rating record, mainly for tests and backfills.
    pub async fn put_rating(&self, record: RatingRecord) {
        let mut inner = self.inner.write().await;
        inner
            .ratings
            .insert((record.user_id.clone(), record.mode), record);
    }
}

fn not_found(match_id: MatchId) -> anyhow::Error {
    ArenaError::MatchNotFound {
        match_id: match_id.to_string(),
    }
    .into()
}

fn terminal(record: &MatchRecord) -> anyhow::Error {
    ArenaError::MatchTerminal {
        match_id: record.id.to_string(),
        status: record.status.to_string(),
    }
    .into()
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn create_match(&self, record: MatchRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.matches.contains_key(&record.id) {
            return Err(ArenaError::InternalError {
                message: format!("Match {} already exists", record.id),
            }
            .into());
        }

        let now = current_timestamp();
        let rows: Vec<Participant> = record
            .participants()
            .map(|user_id| Participant {
                match_id: record.id,
                user_id: user_id.clone(),
                connection_state: ConnectionState::Connected,
                last_heartbeat_at: now,
                score: 0,
                submissions: Vec::new(),
            })
            .collect();

        inner.participants.insert(record.id, rows);
        inner.submissions.insert(record.id, Vec::new());
        inner.matches.insert(record.id, record);
        Ok(())
    }

    async fn get_match(&self, match_id: MatchId) -> Result<MatchRecord> {
        let inner = self.inner.read().await;
        inner
            .matches
            .get(&match_id)
            .cloned()
            .ok_or_else(|| not_found(match_id))
    }

    async fn transition_status(&self, match_id: MatchId, next: MatchStatus) -> Result<MatchRecord> {
        let mut inner = self.inner.write().await;
        let record = inner
            .matches
            .get_mut(&match_id)
            .ok_or_else(|| not_found(match_id))?;

        if record.status.is_terminal() {
            return Err(terminal(record));
        }
        if !record.status.can_transition_to(next) {
            return Err(ArenaError::InternalError {
                message: format!(
                    "Illegal status transition {} -> {} for match {}",
                    record.status, next, match_id
                ),
            }
            .into());
        }

        let now = current_timestamp();
        record.status = next;
        match next {
            MatchStatus::InProgress => record.started_at = Some(now),
            s if s.is_terminal() => record.ended_at = Some(now),
            _ => {}
        }
        Ok(record.clone())
    }

    async fn active_match_for(&self, user_id: &str, mode: Mode) -> Result<Option<MatchId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .matches
            .values()
            .find(|m| m.mode == mode && !m.status.is_terminal() && m.is_participant(user_id))
            .map(|m| m.id))
    }

    async fn participants(&self, match_id: MatchId) -> Result<Vec<Participant>> {
        let inner = self.inner.read().await;
        inner
            .participants
            .get(&match_id)
            .cloned()
            .ok_or_else(|| not_found(match_id))
    }

    async fn record_heartbeat(
        &self,
        match_id: MatchId,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let rows = inner
            .participants
            .get_mut(&match_id)
            .ok_or_else(|| not_found(match_id))?;
        let row = rows
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or_else(|| ArenaError::NotAParticipant {
                user_id: user_id.to_string(),
                match_id: match_id.to_string(),
            })?;
        row.last_heartbeat_at = at;
        Ok(())
    }

    async fn set_connection_state(
        &self,
        match_id: MatchId,
        user_id: &str,
        state: ConnectionState,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let rows = inner
            .participants
            .get_mut(&match_id)
            .ok_or_else(|| not_found(match_id))?;
        let row = rows
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or_else(|| ArenaError::NotAParticipant {
                user_id: user_id.to_string(),
                match_id: match_id.to_string(),
            })?;
        row.connection_state = state;
        Ok(())
    }

    async fn append_submission(
        &self,
        match_id: MatchId,
        user_id: &str,
        problem_id: &str,
    ) -> Result<Submission> {
        let mut inner = self.inner.write().await;
        let record = inner
            .matches
            .get(&match_id)
            .ok_or_else(|| not_found(match_id))?;

        if record.status.is_terminal() {
            return Err(terminal(record));
        }
        if record.status != MatchStatus::InProgress {
            return Err(ArenaError::InternalError {
                message: format!("Match {} has not started", match_id),
            }
            .into());
        }
        if !record.is_participant(user_id) {
            return Err(ArenaError::NotAParticipant {
                user_id: user_id.to_string(),
                match_id: match_id.to_string(),
            }
            .into());
        }

        // The store clock is the ordering authority. Bump past the previous
        // entry if the wall clock has not advanced, so timestamps within a
        // match are strictly increasing.
        let log = inner.submissions.entry(match_id).or_default();
        let mut submitted_at = current_timestamp();
        if let Some(last) = log.last() {
            if submitted_at <= last.submitted_at {
                submitted_at = last.submitted_at + Duration::milliseconds(1);
            }
        }

        let submission = Submission {
            id: generate_submission_id(),
            match_id,
            user_id: user_id.to_string(),
            problem_id: problem_id.to_string(),
            submitted_at,
            verdict: Verdict::Pending,
        };
        log.push(submission.clone());
        inner.submission_index.insert(submission.id, match_id);

        if let Some(rows) = inner.participants.get_mut(&match_id) {
            if let Some(row) = rows.iter_mut().find(|p| p.user_id == user_id) {
                row.submissions.push(submission.id);
            }
        }

        Ok(submission)
    }

    async fn record_verdict(
        &self,
        submission_id: SubmissionId,
        verdict: Verdict,
    ) -> Result<Submission> {
        let mut inner = self.inner.write().await;
        let match_id = *inner.submission_index.get(&submission_id).ok_or_else(|| {
            ArenaError::InternalError {
                message: format!("Unknown submission {}", submission_id),
            }
        })?;

        let log = inner
            .submissions
            .get_mut(&match_id)
            .ok_or_else(|| not_found(match_id))?;
        let submission = log
            .iter_mut()
            .find(|s| s.id == submission_id)
            .ok_or_else(|| ArenaError::InternalError {
                message: format!("Unknown submission {}", submission_id),
            })?;

        if submission.verdict.is_final() {
            // Duplicate delivery of the same verdict is tolerated
            if submission.verdict == verdict {
                return Ok(submission.clone());
            }
            return Err(ArenaError::InternalError {
                message: format!(
                    "Submission {} already has final verdict {:?}",
                    submission_id, submission.verdict
                ),
            }
            .into());
        }

        submission.verdict = verdict;
        Ok(submission.clone())
    }

    async fn submissions(&self, match_id: MatchId) -> Result<Vec<Submission>> {
        let inner = self.inner.read().await;
        inner
            .submissions
            .get(&match_id)
            .cloned()
            .ok_or_else(|| not_found(match_id))
    }

    async fn update_scores(&self, match_id: MatchId, scores: &[(UserId, i64)]) -> Result<()> {
        let mut inner = self.inner.write().await;
        let rows = inner
            .participants
            .get_mut(&match_id)
            .ok_or_else(|| not_found(match_id))?;
        for (user_id, score) in scores {
            if let Some(row) = rows.iter_mut().find(|p| &p.user_id == user_id) {
                row.score = *score;
            }
        }
        Ok(())
    }

    async fn rating(&self, user_id: &str, mode: Mode) -> Result<Option<RatingRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.ratings.get(&(user_id.to_string(), mode)).cloned())
    }

    async fn apply_completion(
        &self,
        match_id: MatchId,
        outcome: MatchOutcome,
        records: Vec<RatingRecord>,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let record = inner
            .matches
            .get_mut(&match_id)
            .ok_or_else(|| not_found(match_id))?;

        match record.status {
            // Retried completion of an already-completed match is a no-op
            MatchStatus::Completed => return Ok(false),
            MatchStatus::InProgress => {}
            _ => return Err(terminal(record)),
        }

        record.status = MatchStatus::Completed;
        record.ended_at = Some(current_timestamp());
        record.outcome = Some(outcome);

        for rating in records {
            inner
                .ratings
                .insert((rating.user_id.clone(), rating.mode), rating);
        }
        Ok(true)
    }
}
