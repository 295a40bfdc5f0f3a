//! Per-match sync workers
//!
//! Every live match is owned by exactly one worker task. All durable
//! mutations for a match (submissions, verdicts, presence flips, completion)
//! flow through its command channel, so ordering within a match needs no
//! further locking. The worker also runs the match clock: periodic ticks,
//! presence sweeps, forfeiture and the duration deadline.

use crate::amqp::messages::{MatchEndedNotice, MatchStartedNotice, SubmissionNotice, VerdictNotice};
use crate::amqp::publisher::NoticePublisher;
use crate::config::SyncSettings;
use crate::error::{ArenaError, Result};
use crate::metrics::MetricsCollector;
use crate::rating::EloEngine;
use crate::resolver;
use crate::store::MatchStore;
use crate::sync::bus::{EventBus, EventEnvelope};
use crate::sync::presence::PresenceTracker;
use crate::types::{
    ConnectionState, EventKind, MatchEvent, MatchId, MatchOutcome, MatchRecord, MatchSnapshot,
    MatchStatus, ProblemId, RatingRecord, Submission, SubmissionId, UserId, Verdict,
};
use crate::utils::{current_timestamp, WorkerClock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 128;

enum SyncCommand {
    Submit {
        user_id: UserId,
        problem_id: ProblemId,
        reply: oneshot::Sender<Result<Submission>>,
    },
    Verdict {
        submission_id: SubmissionId,
        verdict: Verdict,
        reply: oneshot::Sender<Result<()>>,
    },
    Heartbeat {
        user_id: UserId,
        reply: oneshot::Sender<Result<()>>,
    },
    Leave {
        user_id: UserId,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        user_id: Option<UserId>,
        reply: oneshot::Sender<Result<MatchSnapshot>>,
    },
}

struct WorkerHandle {
    sender: mpsc::Sender<SyncCommand>,
    handle: JoinHandle<()>,
}

/// Routes match operations to the owning worker task
pub struct MatchCoordinator {
    store: Arc<dyn MatchStore>,
    bus: Arc<EventBus>,
    publisher: Arc<dyn NoticePublisher>,
    engine: EloEngine,
    settings: SyncSettings,
    metrics: MetricsCollector,
    workers: RwLock<HashMap<MatchId, WorkerHandle>>,
}

impl MatchCoordinator {
    pub fn new(
        store: Arc<dyn MatchStore>,
        bus: Arc<EventBus>,
        publisher: Arc<dyn NoticePublisher>,
        engine: EloEngine,
        settings: SyncSettings,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            store,
            bus,
            publisher,
            engine,
            settings,
            metrics,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Start a fully acknowledged match: move it to in-progress, open its
    /// event channel, announce it and spawn the owning worker.
    pub async fn start_match(&self, match_id: MatchId) -> Result<()> {
        let record = self
            .store
            .transition_status(match_id, MatchStatus::InProgress)
            .await?;

        self.bus.open(match_id)?;
        if let Err(e) = self.bus.publish(match_id, MatchEvent::MatchStarted) {
            warn!(match_id = %match_id, "Failed to broadcast match start: {}", e);
        }

        let notice = MatchStartedNotice {
            match_id,
            mode: record.mode,
            sides: record.sides.clone(),
            problem_set: record.problem_set.clone(),
            started_at: record.started_at.unwrap_or_else(current_timestamp),
        };
        if let Err(e) = self.publisher.publish_match_started(notice).await {
            error!(match_id = %match_id, "Failed to publish match started notice: {}", e);
            self.metrics.record_notice("match.started", false);
        } else {
            self.metrics.record_notice("match.started", true);
        }
        self.metrics.record_match_started();

        let worker = SyncWorker {
            record,
            store: self.store.clone(),
            bus: self.bus.clone(),
            publisher: self.publisher.clone(),
            engine: self.engine.clone(),
            tracker: PresenceTracker::new(&self.settings),
            settings: self.settings.clone(),
            metrics: self.metrics.clone(),
            left: HashSet::new(),
            clock: WorkerClock::start(),
        };
        let (sender, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = tokio::spawn(worker.run(receiver));

        let mut workers = self.workers.write().await;
        workers.insert(match_id, WorkerHandle { sender, handle });
        info!(match_id = %match_id, "Match in progress");
        Ok(())
    }

    async fn sender_for(&self, match_id: MatchId) -> Result<mpsc::Sender<SyncCommand>> {
        {
            let workers = self.workers.read().await;
            if let Some(handle) = workers.get(&match_id).filter(|h| !h.sender.is_closed()) {
                return Ok(handle.sender.clone());
            }
        }

        // No live worker: a finished match rejects mutation as terminal, an
        // unknown id as not-found
        let record = self.store.get_match(match_id).await?;
        if record.status.is_terminal() {
            Err(ArenaError::MatchTerminal {
                match_id: match_id.to_string(),
                status: record.status.to_string(),
            }
            .into())
        } else {
            Err(ArenaError::MatchNotFound {
                match_id: match_id.to_string(),
            }
            .into())
        }
    }

    async fn dispatch<T>(
        &self,
        match_id: MatchId,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> SyncCommand,
    ) -> Result<T> {
        let sender = self.sender_for(match_id).await?;
        let (reply, response) = oneshot::channel();
        sender
            .send(build(reply))
            .await
            .map_err(|_| ArenaError::MatchTerminal {
                match_id: match_id.to_string(),
                status: MatchStatus::Completed.to_string(),
            })?;
        response.await.map_err(|_| {
            ArenaError::InternalError {
                message: format!("Match worker for {} dropped a reply", match_id),
            }
        })?
    }

    /// Record a submission for a live match.
    pub async fn submit(
        &self,
        match_id: MatchId,
        user_id: &str,
        problem_id: &str,
    ) -> Result<Submission> {
        let user_id = user_id.to_string();
        let problem_id = problem_id.to_string();
        self.dispatch(match_id, |reply| SyncCommand::Submit {
            user_id,
            problem_id,
            reply,
        })
        .await
    }

    /// Record a judging verdict for a stored submission.
    pub async fn record_verdict(
        &self,
        match_id: MatchId,
        submission_id: SubmissionId,
        verdict: Verdict,
    ) -> Result<()> {
        self.dispatch(match_id, |reply| SyncCommand::Verdict {
            submission_id,
            verdict,
            reply,
        })
        .await
    }

    /// Record a presence heartbeat.
    pub async fn heartbeat(&self, match_id: MatchId, user_id: &str) -> Result<()> {
        let user_id = user_id.to_string();
        self.dispatch(match_id, |reply| SyncCommand::Heartbeat { user_id, reply })
            .await
    }

    /// Explicitly leave a live match. When a whole side has left, the match
    /// completes immediately as a walkover for the remaining side.
    pub async fn leave(&self, match_id: MatchId, user_id: &str) -> Result<()> {
        let user_id = user_id.to_string();
        self.dispatch(match_id, |reply| SyncCommand::Leave { user_id, reply })
            .await
    }

    /// Full durable state of a match for reconnect reconciliation. When the
    /// requesting user is named, their advisory state is restored to
    /// connected. Falls back to the store for matches with no live worker,
    /// so terminal matches remain queryable.
    pub async fn snapshot(
        &self,
        match_id: MatchId,
        user_id: Option<&str>,
    ) -> Result<MatchSnapshot> {
        let user_id = user_id.map(|u| u.to_string());
        match self.sender_for(match_id).await {
            Ok(_) => {
                self.dispatch(match_id, |reply| SyncCommand::Snapshot { user_id, reply })
                    .await
            }
            Err(_) => compose_snapshot(self.store.as_ref(), match_id).await,
        }
    }

    /// Publish a fire-and-forget ephemeral event (chat, typing) from a
    /// participant. Never persisted; dropped on the floor if no one listens.
    pub async fn publish_ephemeral(&self, match_id: MatchId, event: MatchEvent) -> Result<()> {
        if event.kind() != EventKind::Ephemeral {
            return Err(ArenaError::InternalError {
                message: "Only ephemeral events may bypass the durable path".to_string(),
            }
            .into());
        }
        let sender_id = match &event {
            MatchEvent::Typing { user_id } | MatchEvent::Chat { user_id, .. } => Some(user_id.clone()),
            _ => None,
        };
        if let Some(user_id) = sender_id {
            let record = self.store.get_match(match_id).await?;
            if !record.is_participant(&user_id) {
                return Err(ArenaError::NotAParticipant {
                    user_id,
                    match_id: match_id.to_string(),
                }
                .into());
            }
        }
        self.bus.publish(match_id, event)?;
        Ok(())
    }

    /// Subscribe to a live match's event stream.
    pub fn subscribe(&self, match_id: MatchId) -> Result<BroadcastStream<EventEnvelope>> {
        self.bus.subscribe(match_id)
    }

    /// Whether a worker currently owns this match.
    pub async fn is_live(&self, match_id: MatchId) -> bool {
        self.workers
            .read()
            .await
            .get(&match_id)
            .map(|h| !h.sender.is_closed())
            .unwrap_or(false)
    }

    /// Number of live match workers.
    pub async fn live_matches(&self) -> usize {
        let workers = self.workers.read().await;
        workers.values().filter(|h| !h.sender.is_closed()).count()
    }

    /// Drop bookkeeping for workers that have finished.
    pub async fn reap(&self) {
        let mut workers = self.workers.write().await;
        workers.retain(|_, handle| !handle.sender.is_closed());
    }

    /// Abort all workers, for shutdown.
    pub async fn shutdown(&self) {
        let mut workers = self.workers.write().await;
        for (match_id, handle) in workers.drain() {
            handle.handle.abort();
            self.bus.close(match_id);
        }
    }
}

async fn compose_snapshot(store: &dyn MatchStore, match_id: MatchId) -> Result<MatchSnapshot> {
    let record = store.get_match(match_id).await?;
    let participants = store.participants(match_id).await?;
    let submissions = store.submissions(match_id).await?;
    let users: Vec<UserId> = record.participants().cloned().collect();
    let scoreboard = resolver::scoreboard(&users, &submissions);
    Ok(MatchSnapshot {
        record,
        participants,
        submissions,
        scoreboard,
    })
}

fn verdict_label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Pending => "pending",
        Verdict::Accepted => "accepted",
        Verdict::WrongAnswer => "wrong_answer",
        Verdict::TimeLimitExceeded => "time_limit_exceeded",
        Verdict::RuntimeError => "runtime_error",
        Verdict::CompileError => "compile_error",
    }
}

struct SyncWorker {
    record: MatchRecord,
    store: Arc<dyn MatchStore>,
    bus: Arc<EventBus>,
    publisher: Arc<dyn NoticePublisher>,
    engine: EloEngine,
    tracker: PresenceTracker,
    settings: SyncSettings,
    metrics: MetricsCollector,
    left: HashSet<UserId>,
    // Silence and the match clock are measured against the tokio clock so
    // paused-time tests drive presence the same way they drive timers
    clock: WorkerClock,
}

impl SyncWorker {
    async fn run(mut self, mut receiver: mpsc::Receiver<SyncCommand>) {
        let match_id = self.record.id;
        let duration = std::time::Duration::from_secs(self.settings.match_duration_seconds);
        let ends_at = self.clock.now() + chrono::Duration::seconds(duration.as_secs() as i64);
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        let mut clock = tokio::time::interval(std::time::Duration::from_secs(
            self.settings.heartbeat_interval_seconds,
        ));
        clock.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick fires immediately
        clock.tick().await;

        loop {
            tokio::select! {
                command = receiver.recv() => {
                    match command {
                        Some(command) => {
                            if self.handle_command(command).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = clock.tick() => {
                    let remaining = (ends_at - self.clock.now()).num_seconds().max(0) as u64;
                    let _ = self.bus.publish(match_id, MatchEvent::Tick { remaining_seconds: remaining });

                    if self.run_presence_sweep().await {
                        break;
                    }
                }
                _ = &mut deadline => {
                    debug!(match_id = %match_id, "Match clock expired");
                    if let Err(e) = self.complete_from_log().await {
                        error!(match_id = %match_id, "Failed to complete match on deadline: {}", e);
                    }
                    break;
                }
            }
        }

        self.bus.close(match_id);
        debug!(match_id = %match_id, "Match worker finished");
    }

    /// Handle one command; returns true when the match reached completion.
    async fn handle_command(&mut self, command: SyncCommand) -> bool {
        match command {
            SyncCommand::Submit {
                user_id,
                problem_id,
                reply,
            } => {
                let result = self.handle_submit(&user_id, &problem_id).await;
                let _ = reply.send(result);
                false
            }
            SyncCommand::Verdict {
                submission_id,
                verdict,
                reply,
            } => match self.handle_verdict(submission_id, verdict).await {
                Ok(completed) => {
                    let _ = reply.send(Ok(()));
                    completed
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    false
                }
            },
            SyncCommand::Heartbeat { user_id, reply } => {
                let _ = reply.send(self.handle_heartbeat(&user_id).await);
                false
            }
            SyncCommand::Leave { user_id, reply } => match self.handle_leave(&user_id).await {
                Ok(completed) => {
                    let _ = reply.send(Ok(()));
                    completed
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    false
                }
            },
            SyncCommand::Snapshot { user_id, reply } => {
                let _ = reply.send(self.handle_snapshot(user_id.as_deref()).await);
                false
            }
        }
    }

    async fn handle_submit(&self, user_id: &str, problem_id: &str) -> Result<Submission> {
        let submission = self
            .store
            .append_submission(self.record.id, user_id, problem_id)
            .await?;

        // Durable ordering: stored first, then broadcast
        let _ = self.bus.publish(
            self.record.id,
            MatchEvent::SubmissionRecorded {
                submission: submission.clone(),
            },
        );

        let notice = SubmissionNotice {
            match_id: self.record.id,
            submission: submission.clone(),
        };
        if let Err(e) = self.publisher.publish_submission_recorded(notice).await {
            error!(match_id = %self.record.id, "Failed to publish submission notice: {}", e);
            self.metrics.record_notice("match.submission", false);
        } else {
            self.metrics.record_notice("match.submission", true);
        }
        self.metrics.record_submission(self.record.mode);

        Ok(submission)
    }

    async fn handle_verdict(
        &self,
        submission_id: SubmissionId,
        verdict: Verdict,
    ) -> Result<bool> {
        let submission = self.store.record_verdict(submission_id, verdict).await?;

        // Scoreboard is always a full recomputation over the log, so a
        // replayed or out-of-order verdict converges to the same result
        let submissions = self.store.submissions(self.record.id).await?;
        let users: Vec<UserId> = self.record.participants().cloned().collect();
        let board = resolver::scoreboard(&users, &submissions);
        let scores: Vec<(UserId, i64)> =
            board.iter().map(|l| (l.user_id.clone(), l.score)).collect();
        self.store.update_scores(self.record.id, &scores).await?;

        let _ = self.bus.publish(
            self.record.id,
            MatchEvent::VerdictAssigned {
                submission_id,
                user_id: submission.user_id.clone(),
                problem_id: submission.problem_id.clone(),
                verdict,
            },
        );

        let notice = VerdictNotice {
            match_id: self.record.id,
            submission_id,
            user_id: submission.user_id,
            problem_id: submission.problem_id,
            verdict,
        };
        if let Err(e) = self.publisher.publish_verdict_assigned(notice).await {
            error!(match_id = %self.record.id, "Failed to publish verdict notice: {}", e);
            self.metrics.record_notice("match.verdict", false);
        } else {
            self.metrics.record_notice("match.verdict", true);
        }
        self.metrics.record_verdict(verdict_label(verdict));

        // A side that has solved the whole problem set ends the match early.
        // This is a result earned through the log, not a walkover.
        if verdict.is_accepted() {
            if let Some(winner) = self.side_with_full_solve(&board) {
                self.finish(self.side_placements(winner), false).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn side_with_full_solve(&self, board: &[crate::types::ScoreLine]) -> Option<usize> {
        if self.record.problem_set.is_empty() {
            return None;
        }
        for (idx, side) in self.record.sides.iter().enumerate() {
            let solved: HashSet<&ProblemId> = board
                .iter()
                .filter(|line| side.contains(&line.user_id))
                .flat_map(|line| line.solved.iter())
                .collect();
            if self.record.problem_set.iter().all(|p| solved.contains(p)) {
                return Some(idx);
            }
        }
        None
    }

    async fn handle_heartbeat(&self, user_id: &str) -> Result<()> {
        let now = self.clock.now();
        self.store
            .record_heartbeat(self.record.id, user_id, now)
            .await?;

        let participants = self.store.participants(self.record.id).await?;
        let state = participants
            .iter()
            .find(|p| p.user_id == user_id)
            .map(|p| p.connection_state);

        // A heartbeat after silence starts reconnection; the client converges
        // through a snapshot before it is considered connected again
        if state == Some(ConnectionState::Disconnected) {
            self.store
                .set_connection_state(self.record.id, user_id, ConnectionState::Reconnecting)
                .await?;
            let _ = self.bus.publish(
                self.record.id,
                MatchEvent::PresenceChanged {
                    user_id: user_id.to_string(),
                    state: ConnectionState::Reconnecting,
                },
            );
        }
        Ok(())
    }

    async fn handle_leave(&mut self, user_id: &str) -> Result<bool> {
        let side = self
            .record
            .side_of(user_id)
            .ok_or_else(|| ArenaError::NotAParticipant {
                user_id: user_id.to_string(),
                match_id: self.record.id.to_string(),
            })?;

        self.left.insert(user_id.to_string());
        self.store
            .set_connection_state(self.record.id, user_id, ConnectionState::Disconnected)
            .await?;
        let _ = self.bus.publish(
            self.record.id,
            MatchEvent::PlayerLeft {
                user_id: user_id.to_string(),
            },
        );

        // A side that has fully left forfeits immediately
        if self.record.sides[side].iter().all(|u| self.left.contains(u)) {
            info!(match_id = %self.record.id, side, "Side left the match, awarding walkover");
            self.complete_walkover(Some(1 - side)).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn handle_snapshot(&self, user_id: Option<&str>) -> Result<MatchSnapshot> {
        if let Some(user_id) = user_id {
            let participants = self.store.participants(self.record.id).await?;
            let state = participants
                .iter()
                .find(|p| p.user_id == user_id)
                .map(|p| p.connection_state)
                .ok_or_else(|| ArenaError::NotAParticipant {
                    user_id: user_id.to_string(),
                    match_id: self.record.id.to_string(),
                })?;

            if state != ConnectionState::Connected {
                self.store
                    .set_connection_state(self.record.id, user_id, ConnectionState::Connected)
                    .await?;
                let _ = self.bus.publish(
                    self.record.id,
                    MatchEvent::PresenceChanged {
                        user_id: user_id.to_string(),
                        state: ConnectionState::Connected,
                    },
                );
            }
        }
        compose_snapshot(self.store.as_ref(), self.record.id).await
    }

    /// Run one presence sweep; returns true if forfeiture completed the match.
    async fn run_presence_sweep(&self) -> bool {
        let participants = match self.store.participants(self.record.id).await {
            Ok(p) => p,
            Err(e) => {
                error!(match_id = %self.record.id, "Presence sweep failed: {}", e);
                return false;
            }
        };

        let sweep = self.tracker.sweep(&participants, self.clock.now());
        for user_id in &sweep.disconnected {
            if let Err(e) = self
                .store
                .set_connection_state(self.record.id, user_id, ConnectionState::Disconnected)
                .await
            {
                warn!(match_id = %self.record.id, "Failed to mark {} disconnected: {}", user_id, e);
                continue;
            }
            self.metrics.record_disconnect();
            let _ = self.bus.publish(
                self.record.id,
                MatchEvent::PresenceChanged {
                    user_id: user_id.clone(),
                    state: ConnectionState::Disconnected,
                },
            );
        }

        // Forfeiture: a side silent past the threshold loses by walkover.
        // Both sides silent completes the match as a drawn walkover.
        let gone: HashSet<&UserId> = sweep
            .forfeit_candidates
            .iter()
            .chain(self.left.iter())
            .collect();
        let side_gone: Vec<bool> = self
            .record
            .sides
            .iter()
            .map(|side| side.iter().all(|u| gone.contains(u)))
            .collect();

        let winner = match (side_gone[0], side_gone[1]) {
            (false, false) => return false,
            (true, false) => Some(1),
            (false, true) => Some(0),
            (true, true) => None,
        };

        info!(match_id = %self.record.id, ?winner, "Forfeiture threshold reached");
        match self.complete_walkover(winner).await {
            Ok(()) => true,
            Err(e) => {
                error!(match_id = %self.record.id, "Failed to complete forfeited match: {}", e);
                false
            }
        }
    }

    /// Complete on forfeiture. Only this path sets the walkover flag; a
    /// victory earned through the submission log never does.
    async fn complete_walkover(&self, winner: Option<usize>) -> Result<()> {
        let placements = match winner {
            Some(side) => self.side_placements(side),
            // Both sides abandoned: complete as a drawn walkover
            None => self.record.participants().map(|u| (u.clone(), 1)).collect(),
        };
        self.finish(placements, true).await
    }

    /// Complete with placements derived from the submission log.
    async fn complete_from_log(&self) -> Result<()> {
        let submissions = self.store.submissions(self.record.id).await?;
        let users: Vec<UserId> = self.record.participants().cloned().collect();
        let board = resolver::scoreboard(&users, &submissions);
        let placements = resolver::placements_for_sides(&self.record.sides, &board);
        self.finish(placements, false).await
    }

    /// Placements with every member of `winner` first, the other side second.
    fn side_placements(&self, winner: usize) -> Vec<(UserId, u32)> {
        let mut placements = Vec::new();
        for (idx, side) in self.record.sides.iter().enumerate() {
            let place = if idx == winner { 1 } else { 2 };
            placements.extend(side.iter().map(|u| (u.clone(), place)));
        }
        placements
    }

    async fn finish(&self, placements: Vec<(UserId, u32)>, walkover: bool) -> Result<()> {
        let started = std::time::Instant::now();
        let mode = self.record.mode;

        let mut records: Vec<RatingRecord> = Vec::new();
        for user_id in self.record.participants() {
            let record = match self.store.rating(user_id, mode).await? {
                Some(record) => record,
                None => RatingRecord::new(user_id.clone(), mode, self.engine.baseline_elo()),
            };
            records.push(record);
        }

        let rated: Vec<(UserId, i32)> = records
            .iter()
            .map(|r| (r.user_id.clone(), r.elo))
            .collect();
        let changes = self.engine.rate_ranking(mode, &rated, &placements)?;
        for change in &changes {
            if let Some(record) = records.iter_mut().find(|r| r.user_id == change.user_id) {
                EloEngine::apply_change(record, change, &placements);
            }
        }
        self.metrics.record_rating_duration(started.elapsed());

        let outcome = MatchOutcome {
            placements,
            walkover,
        };
        let applied = self
            .store
            .apply_completion(self.record.id, outcome.clone(), records)
            .await?;
        if !applied {
            debug!(match_id = %self.record.id, "Completion already applied, skipping");
            return Ok(());
        }

        let _ = self.bus.publish(
            self.record.id,
            MatchEvent::MatchEnded {
                outcome: outcome.clone(),
                rating_changes: changes.clone(),
            },
        );

        let notice = MatchEndedNotice {
            match_id: self.record.id,
            mode,
            outcome,
            rating_changes: changes,
        };
        if let Err(e) = self.publisher.publish_match_ended(notice).await {
            error!(match_id = %self.record.id, "Failed to publish match ended notice: {}", e);
            self.metrics.record_notice("match.ended", false);
        } else {
            self.metrics.record_notice("match.ended", true);
        }
        self.metrics.record_match_completed(mode, walkover);
        info!(match_id = %self.record.id, walkover, "Match completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockNoticePublisher;
    use crate::config::RatingSettings;
    use crate::store::InMemoryMatchStore;
    use crate::types::Mode;
    use crate::utils::generate_match_id;
    use tokio_stream::StreamExt;

    struct Fixture {
        coordinator: MatchCoordinator,
        store: Arc<InMemoryMatchStore>,
        publisher: Arc<MockNoticePublisher>,
        match_id: MatchId,
    }

    async fn fixture(settings: SyncSettings) -> Fixture {
        let store = Arc::new(InMemoryMatchStore::new());
        let publisher = Arc::new(MockNoticePublisher::new());
        let bus = Arc::new(EventBus::new(settings.event_channel_capacity));
        let coordinator = MatchCoordinator::new(
            store.clone(),
            bus,
            publisher.clone(),
            EloEngine::new(RatingSettings::default()),
            settings,
            MetricsCollector::new().unwrap(),
        );

        let match_id = generate_match_id();
        let record = MatchRecord {
            id: match_id,
            mode: Mode::Ranked1v1,
            status: MatchStatus::Waiting,
            sides: [vec!["alice".to_string()], vec!["bob".to_string()]],
            problem_set: vec!["p1".to_string(), "p2".to_string()],
            created_at: current_timestamp(),
            started_at: None,
            ended_at: None,
            outcome: None,
        };
        store.create_match(record).await.unwrap();

        Fixture {
            coordinator,
            store,
            publisher,
            match_id,
        }
    }

    #[tokio::test]
    async fn test_start_match_moves_to_in_progress() {
        let f = fixture(SyncSettings::default()).await;
        f.coordinator.start_match(f.match_id).await.unwrap();

        let record = f.store.get_match(f.match_id).await.unwrap();
        assert_eq!(record.status, MatchStatus::InProgress);
        assert!(f.coordinator.is_live(f.match_id).await);
        assert_eq!(f.publisher.published_notices(), vec!["match.started"]);
    }

    #[tokio::test]
    async fn test_submission_is_stored_then_broadcast() {
        let f = fixture(SyncSettings::default()).await;
        f.coordinator.start_match(f.match_id).await.unwrap();

        let mut stream = f.coordinator.subscribe(f.match_id).unwrap();
        let submission = f
            .coordinator
            .submit(f.match_id, "alice", "p1")
            .await
            .unwrap();
        assert_eq!(submission.verdict, Verdict::Pending);

        let envelope = stream.next().await.unwrap().unwrap();
        match envelope.event {
            MatchEvent::SubmissionRecorded { submission: s } => assert_eq!(s.id, submission.id),
            other => panic!("unexpected event {:?}", other),
        }

        // The durable copy exists regardless of subscribers
        let log = f.store.submissions(f.match_id).await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_non_participant_cannot_submit() {
        let f = fixture(SyncSettings::default()).await;
        f.coordinator.start_match(f.match_id).await.unwrap();

        let err = f
            .coordinator
            .submit(f.match_id, "mallory", "p1")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArenaError>(),
            Some(ArenaError::NotAParticipant { .. })
        ));
    }

    #[tokio::test]
    async fn test_verdict_updates_scores() {
        let f = fixture(SyncSettings::default()).await;
        f.coordinator.start_match(f.match_id).await.unwrap();

        let submission = f
            .coordinator
            .submit(f.match_id, "alice", "p1")
            .await
            .unwrap();
        f.coordinator
            .record_verdict(f.match_id, submission.id, Verdict::Accepted)
            .await
            .unwrap();

        let participants = f.store.participants(f.match_id).await.unwrap();
        let alice = participants.iter().find(|p| p.user_id == "alice").unwrap();
        assert_eq!(
            alice.score,
            resolver::conflict::SOLVE_POINTS + resolver::conflict::FIRST_SOLVE_BONUS
        );
    }

    #[tokio::test]
    async fn test_full_solve_completes_match_and_applies_ratings() {
        let f = fixture(SyncSettings::default()).await;
        f.coordinator.start_match(f.match_id).await.unwrap();

        for problem in ["p1", "p2"] {
            let s = f
                .coordinator
                .submit(f.match_id, "alice", problem)
                .await
                .unwrap();
            f.coordinator
                .record_verdict(f.match_id, s.id, Verdict::Accepted)
                .await
                .unwrap();
        }

        let record = f.store.get_match(f.match_id).await.unwrap();
        assert_eq!(record.status, MatchStatus::Completed);
        let outcome = record.outcome.unwrap();
        assert_eq!(outcome.placement_of("alice"), Some(1));
        assert_eq!(outcome.placement_of("bob"), Some(2));
        assert!(!outcome.walkover);

        // Both were unrated: baseline 1200 each, K=32, so +/-16
        let alice = f.store.rating("alice", Mode::Ranked1v1).await.unwrap().unwrap();
        let bob = f.store.rating("bob", Mode::Ranked1v1).await.unwrap().unwrap();
        assert_eq!(alice.elo, 1216);
        assert_eq!(bob.elo, 1184);
        assert_eq!(alice.current_win_streak, 1);

        assert!(f
            .publisher
            .published_notices()
            .contains(&"match.ended".to_string()));
    }

    #[tokio::test]
    async fn test_whole_side_leaving_awards_walkover() {
        let f = fixture(SyncSettings::default()).await;
        f.coordinator.start_match(f.match_id).await.unwrap();

        f.coordinator.leave(f.match_id, "bob").await.unwrap();

        let record = f.store.get_match(f.match_id).await.unwrap();
        assert_eq!(record.status, MatchStatus::Completed);
        let outcome = record.outcome.unwrap();
        assert!(outcome.walkover);
        assert_eq!(outcome.placement_of("alice"), Some(1));
    }

    #[tokio::test]
    async fn test_finished_match_rejects_mutation_as_terminal() {
        let f = fixture(SyncSettings::default()).await;
        f.coordinator.start_match(f.match_id).await.unwrap();
        f.coordinator.leave(f.match_id, "bob").await.unwrap();
        // Let the worker observe completion and exit
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let err = f
            .coordinator
            .submit(f.match_id, "alice", "p1")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArenaError>(),
            Some(ArenaError::MatchTerminal { .. })
        ));

        // An id that never existed is still not-found
        let err = f
            .coordinator
            .heartbeat(generate_match_id(), "alice")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArenaError>(),
            Some(ArenaError::MatchNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_snapshot_restores_connection_state() {
        let f = fixture(SyncSettings::default()).await;
        f.coordinator.start_match(f.match_id).await.unwrap();

        f.store
            .set_connection_state(f.match_id, "alice", ConnectionState::Disconnected)
            .await
            .unwrap();

        let snapshot = f
            .coordinator
            .snapshot(f.match_id, Some("alice"))
            .await
            .unwrap();
        assert_eq!(snapshot.submissions.len(), 0);

        let participants = f.store.participants(f.match_id).await.unwrap();
        let alice = participants.iter().find(|p| p.user_id == "alice").unwrap();
        assert_eq!(alice.connection_state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_snapshot_matches_event_replay() {
        // A client that applies durable events and one that re-queries the
        // snapshot must agree on the scoreboard
        let f = fixture(SyncSettings::default()).await;
        f.coordinator.start_match(f.match_id).await.unwrap();

        let s = f
            .coordinator
            .submit(f.match_id, "bob", "p1")
            .await
            .unwrap();
        f.coordinator
            .record_verdict(f.match_id, s.id, Verdict::Accepted)
            .await
            .unwrap();

        let snapshot = f.coordinator.snapshot(f.match_id, None).await.unwrap();
        let board = resolver::scoreboard(
            &["alice".to_string(), "bob".to_string()],
            &snapshot.submissions,
        );
        assert_eq!(snapshot.scoreboard, board);
    }

    #[tokio::test]
    async fn test_ephemeral_rejects_non_participants() {
        let f = fixture(SyncSettings::default()).await;
        f.coordinator.start_match(f.match_id).await.unwrap();

        let err = f
            .coordinator
            .publish_ephemeral(
                f.match_id,
                MatchEvent::Chat {
                    user_id: "mallory".to_string(),
                    message: "hi".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArenaError>(),
            Some(ArenaError::NotAParticipant { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forfeiture_after_silence() {
        let mut settings = SyncSettings::default();
        settings.heartbeat_interval_seconds = 1;
        settings.missed_heartbeats_disconnect = 2;
        settings.forfeit_after_seconds = 5;
        settings.match_duration_seconds = 3600;
        let f = fixture(settings).await;
        f.coordinator.start_match(f.match_id).await.unwrap();

        // alice keeps heartbeating, bob goes silent
        for _ in 0..8 {
            tokio::time::advance(std::time::Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
            let _ = f.coordinator.heartbeat(f.match_id, "alice").await;
        }
        // Allow the sweep to run to completion
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let record = f.store.get_match(f.match_id).await.unwrap();
        assert_eq!(record.status, MatchStatus::Completed);
        let outcome = record.outcome.unwrap();
        assert!(outcome.walkover);
        assert_eq!(outcome.placement_of("alice"), Some(1));
        assert_eq!(outcome.placement_of("bob"), Some(2));
    }
}
