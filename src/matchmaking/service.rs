//! Per-mode matchmaking workers
//!
//! Each mode's waiting list is owned by a single worker task; joins, leaves,
//! acknowledgments and the expiry sweep all arrive over its command channel.
//! Pairing therefore never races with itself within a mode, and the queue
//! store's compare-and-remove is the final safety net.

use crate::amqp::messages::{MatchCancelledNotice, QueueExpiredNotice};
use crate::amqp::publisher::NoticePublisher;
use crate::config::MatchmakingSettings;
use crate::error::{ArenaError, Result};
use crate::matchmaking::pairing;
use crate::metrics::MetricsCollector;
use crate::queue::QueueStore;
use crate::store::MatchStore;
use crate::sync::MatchCoordinator;
use crate::types::{
    JoinOutcome, MatchId, MatchRecord, MatchStatus, Mode, ProblemId, QueueEntry, QueueStatus,
    TeamId, UserId,
};
use crate::utils::{generate_match_id, WorkerClock};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 256;
const PROBLEMS_PER_MATCH: usize = 3;

/// Curated problem pool a match's set is drawn from
const PROBLEM_POOL: [&str; 12] = [
    "interval-scheduling",
    "two-pointer-dedup",
    "matrix-rotation",
    "topological-order",
    "substring-rolling-hash",
    "union-find-islands",
    "binary-lifting",
    "knapsack-bounded",
    "segment-range-min",
    "dijkstra-modified",
    "bitmask-subsets",
    "monotonic-stack-spans",
];

fn assign_problem_set() -> Vec<ProblemId> {
    let mut rng = rand::thread_rng();
    PROBLEM_POOL
        .choose_multiple(&mut rng, PROBLEMS_PER_MATCH)
        .map(|p| p.to_string())
        .collect()
}

enum QueueCommand {
    Join {
        user_id: UserId,
        team_id: Option<TeamId>,
        reply: oneshot::Sender<Result<JoinOutcome>>,
    },
    Leave {
        user_id: UserId,
        reply: oneshot::Sender<Result<bool>>,
    },
    Status {
        reply: oneshot::Sender<Result<QueueStatus>>,
    },
    Acknowledge {
        match_id: MatchId,
        user_id: UserId,
        reply: oneshot::Sender<Result<()>>,
    },
    AckTimeout {
        match_id: MatchId,
    },
}

/// Entry point to the per-mode queue workers
pub struct MatchmakingService {
    senders: HashMap<Mode, mpsc::Sender<QueueCommand>>,
    handles: Vec<JoinHandle<()>>,
    store: Arc<dyn MatchStore>,
}

impl MatchmakingService {
    /// Spawn one worker per mode.
    pub fn start(
        settings: MatchmakingSettings,
        queue: Arc<QueueStore>,
        store: Arc<dyn MatchStore>,
        coordinator: Arc<MatchCoordinator>,
        publisher: Arc<dyn NoticePublisher>,
        baseline_elo: i32,
        metrics: MetricsCollector,
    ) -> Self {
        let mut senders = HashMap::new();
        let mut handles = Vec::new();

        for mode in Mode::ALL {
            let (sender, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
            let worker = ModeWorker {
                mode,
                settings: settings.clone(),
                queue: queue.clone(),
                store: store.clone(),
                coordinator: coordinator.clone(),
                publisher: publisher.clone(),
                baseline_elo,
                metrics: metrics.clone(),
                pending: HashMap::new(),
                self_sender: sender.clone(),
                clock: WorkerClock::start(),
            };
            handles.push(tokio::spawn(worker.run(receiver)));
            senders.insert(mode, sender);
        }

        Self {
            senders,
            handles,
            store,
        }
    }

    async fn dispatch<T>(
        &self,
        mode: Mode,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> QueueCommand,
    ) -> Result<T> {
        let sender = self
            .senders
            .get(&mode)
            .ok_or_else(|| ArenaError::InvalidMode {
                value: mode.to_string(),
            })?;
        let (reply, response) = oneshot::channel();
        sender
            .send(build(reply))
            .await
            .map_err(|_| ArenaError::InternalError {
                message: format!("Queue worker for {} is gone", mode),
            })?;
        response.await.map_err(|_| {
            ArenaError::InternalError {
                message: format!("Queue worker for {} dropped a reply", mode),
            }
        })?
    }

    /// Join the queue for a mode. Pairs immediately when an eligible
    /// opponent is already waiting.
    pub async fn join(
        &self,
        mode: Mode,
        user_id: &str,
        team_id: Option<TeamId>,
    ) -> Result<JoinOutcome> {
        let user_id = user_id.to_string();
        self.dispatch(mode, |reply| QueueCommand::Join {
            user_id,
            team_id,
            reply,
        })
        .await
    }

    /// Leave the queue. Idempotent: returns whether an entry was removed.
    pub async fn leave(&self, mode: Mode, user_id: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        self.dispatch(mode, |reply| QueueCommand::Leave { user_id, reply })
            .await
    }

    /// Aggregate queue statistics for a mode.
    pub async fn status(&self, mode: Mode) -> Result<QueueStatus> {
        self.dispatch(mode, |reply| QueueCommand::Status { reply })
            .await
    }

    /// Acknowledge a freshly paired match. The match starts once every
    /// participant has acknowledged within the grace period.
    pub async fn acknowledge(&self, match_id: MatchId, user_id: &str) -> Result<()> {
        let mode = self.store.get_match(match_id).await?.mode;
        let user_id = user_id.to_string();
        self.dispatch(mode, |reply| QueueCommand::Acknowledge {
            match_id,
            user_id,
            reply,
        })
        .await
    }

    /// Abort all queue workers, for shutdown.
    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

struct PendingAck {
    entries: Vec<QueueEntry>,
    acked: HashSet<UserId>,
}

struct ModeWorker {
    mode: Mode,
    settings: MatchmakingSettings,
    queue: Arc<QueueStore>,
    store: Arc<dyn MatchStore>,
    coordinator: Arc<MatchCoordinator>,
    publisher: Arc<dyn NoticePublisher>,
    baseline_elo: i32,
    metrics: MetricsCollector,
    pending: HashMap<MatchId, PendingAck>,
    self_sender: mpsc::Sender<QueueCommand>,
    // Queue age and window growth follow the tokio clock so paused-time
    // tests drive the TTL sweep the same way they drive the ack timer
    clock: WorkerClock,
}

impl ModeWorker {
    async fn run(mut self, mut receiver: mpsc::Receiver<QueueCommand>) {
        let mut sweep = tokio::time::interval(std::time::Duration::from_secs(
            self.settings.sweep_interval_seconds,
        ));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        sweep.tick().await;

        debug!(mode = %self.mode, "Queue worker started");
        loop {
            tokio::select! {
                command = receiver.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                _ = sweep.tick() => {
                    self.run_sweep().await;
                }
            }
        }
        debug!(mode = %self.mode, "Queue worker stopped");
    }

    async fn handle_command(&mut self, command: QueueCommand) {
        match command {
            QueueCommand::Join {
                user_id,
                team_id,
                reply,
            } => {
                let _ = reply.send(self.handle_join(user_id, team_id).await);
            }
            QueueCommand::Leave { user_id, reply } => {
                let _ = reply.send(self.handle_leave(&user_id));
            }
            QueueCommand::Status { reply } => {
                let _ = reply.send(self.handle_status());
            }
            QueueCommand::Acknowledge {
                match_id,
                user_id,
                reply,
            } => {
                let _ = reply.send(self.handle_acknowledge(match_id, &user_id).await);
            }
            QueueCommand::AckTimeout { match_id } => {
                self.handle_ack_timeout(match_id).await;
            }
        }
    }

    async fn handle_join(
        &mut self,
        user_id: UserId,
        team_id: Option<TeamId>,
    ) -> Result<JoinOutcome> {
        if let Some(active) = self.store.active_match_for(&user_id, self.mode).await? {
            debug!(mode = %self.mode, user_id = %user_id, match_id = %active, "Join rejected, already in a match");
            return Err(ArenaError::AlreadyInMatch {
                user_id,
                mode: self.mode.to_string(),
            }
            .into());
        }

        let rating = self
            .store
            .rating(&user_id, self.mode)
            .await?
            .map(|r| r.elo)
            .unwrap_or(self.baseline_elo);

        let entry = QueueEntry {
            user_id: user_id.clone(),
            mode: self.mode,
            rating,
            enqueued_at: self.clock.now(),
            team_id,
        };
        self.queue.insert(entry)?;
        self.metrics.record_join(self.mode);

        let paired = self.try_pair().await?;
        self.update_waiting_gauge();

        match paired {
            Some(ref users) if users.iter().any(|(u, _)| u == &user_id) => {
                let match_id = users
                    .first()
                    .map(|(_, id)| *id)
                    .unwrap_or_else(generate_match_id);
                Ok(JoinOutcome::Matched { match_id })
            }
            _ => Ok(JoinOutcome::Waiting),
        }
    }

    fn handle_leave(&self, user_id: &str) -> Result<bool> {
        let removed = self.queue.remove(self.mode, user_id)?;
        if removed {
            self.metrics.record_leave(self.mode);
            self.update_waiting_gauge();
        }
        Ok(removed)
    }

    fn handle_status(&self) -> Result<QueueStatus> {
        Ok(QueueStatus {
            mode: self.mode,
            waiting: self.queue.len(self.mode)?,
            avg_wait_ms: self.queue.avg_wait_ms(self.mode, self.clock.now())?,
        })
    }

    async fn handle_acknowledge(&mut self, match_id: MatchId, user_id: &str) -> Result<()> {
        let Some(pending) = self.pending.get_mut(&match_id) else {
            // Late or duplicate acknowledgment
            let record = self.store.get_match(match_id).await?;
            return match record.status {
                MatchStatus::InProgress | MatchStatus::Completed => Ok(()),
                status => Err(ArenaError::MatchTerminal {
                    match_id: match_id.to_string(),
                    status: status.to_string(),
                }
                .into()),
            };
        };

        if !pending.entries.iter().any(|e| e.user_id == user_id) {
            return Err(ArenaError::NotAParticipant {
                user_id: user_id.to_string(),
                match_id: match_id.to_string(),
            }
            .into());
        }

        pending.acked.insert(user_id.to_string());
        if pending.acked.len() == pending.entries.len() {
            self.pending.remove(&match_id);
            self.coordinator.start_match(match_id).await?;
        }
        Ok(())
    }

    /// The grace period ran out. A match no one acknowledged expires; one
    /// that only some acknowledged is cancelled, and the responsive players
    /// re-enter the queue with their original enqueue time so they lose no
    /// priority.
    async fn handle_ack_timeout(&mut self, match_id: MatchId) {
        let Some(pending) = self.pending.remove(&match_id) else {
            return;
        };

        let (status, reason) = if pending.acked.is_empty() {
            (MatchStatus::Expired, "expired")
        } else {
            (MatchStatus::Cancelled, "ack_timeout")
        };

        if let Err(e) = self.store.transition_status(match_id, status).await {
            error!(match_id = %match_id, "Failed to abandon unacknowledged match: {}", e);
            return;
        }
        info!(mode = %self.mode, match_id = %match_id, reason, "Abandoned unacknowledged match");

        for entry in pending
            .entries
            .into_iter()
            .filter(|e| pending.acked.contains(&e.user_id))
        {
            if let Err(e) = self.queue.insert(entry) {
                warn!(match_id = %match_id, "Failed to re-queue acknowledged player: {}", e);
            }
        }

        self.metrics.record_match_abandoned(self.mode, reason);
        self.update_waiting_gauge();

        let notice = MatchCancelledNotice {
            match_id,
            mode: self.mode,
            reason: reason.to_string(),
        };
        if let Err(e) = self.publisher.publish_match_cancelled(notice).await {
            error!(match_id = %match_id, "Failed to publish cancellation notice: {}", e);
        }
    }

    /// One pairing attempt over the current waiting list. Returns the
    /// participants and match id when a match was formed.
    async fn try_pair(&mut self) -> Result<Option<Vec<(UserId, MatchId)>>> {
        let started = std::time::Instant::now();
        let mut attempts = 0;

        let result = loop {
            let now = self.clock.now();
            let pool = self.queue.snapshot(self.mode)?;
            let Some(group) =
                pairing::find_group(&self.settings, &pool, self.mode.team_size(), now)
            else {
                break None;
            };

            let sides = pairing::snake_draft(&group);
            let users: Vec<UserId> = group.iter().map(|e| e.user_id.clone()).collect();

            match self.queue.take_entries(self.mode, &users) {
                Ok(entries) => {
                    let match_id = self.create_pending_match(sides, entries).await?;
                    break Some(users.into_iter().map(|u| (u, match_id)).collect());
                }
                Err(e) => {
                    let race = e
                        .downcast_ref::<ArenaError>()
                        .map(|e| e.is_transient())
                        .unwrap_or(false);
                    attempts += 1;
                    if !race || attempts > self.settings.pairing_retry_limit {
                        return Err(e);
                    }
                    debug!(mode = %self.mode, attempts, "Pairing raced, re-scanning");
                }
            }
        };

        self.metrics.record_pairing_duration(started.elapsed());
        Ok(result)
    }

    async fn create_pending_match(
        &mut self,
        sides: [Vec<UserId>; 2],
        entries: Vec<QueueEntry>,
    ) -> Result<MatchId> {
        let now = self.clock.now();
        let match_id = generate_match_id();
        let record = MatchRecord {
            id: match_id,
            mode: self.mode,
            status: MatchStatus::Waiting,
            sides,
            problem_set: assign_problem_set(),
            created_at: now,
            started_at: None,
            ended_at: None,
            outcome: None,
        };
        self.store.create_match(record).await?;

        let waits: Vec<std::time::Duration> = entries
            .iter()
            .map(|e| e.waited(now).to_std().unwrap_or_default())
            .collect();
        self.metrics.record_match_created(self.mode, &waits);
        info!(
            mode = %self.mode,
            match_id = %match_id,
            players = entries.len(),
            "Paired match awaiting acknowledgment"
        );

        self.pending.insert(
            match_id,
            PendingAck {
                entries,
                acked: HashSet::new(),
            },
        );

        let sender = self.self_sender.clone();
        let grace = std::time::Duration::from_secs(self.settings.ack_grace_seconds);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = sender.send(QueueCommand::AckTimeout { match_id }).await;
        });

        Ok(match_id)
    }

    async fn run_sweep(&mut self) {
        let now = self.clock.now();
        let ttl = chrono::Duration::seconds(self.settings.queue_ttl_seconds as i64);
        match self.queue.purge_expired(self.mode, ttl, now) {
            Ok(expired) if !expired.is_empty() => {
                info!(mode = %self.mode, count = expired.len(), "Purged expired queue entries");
                self.metrics.record_expired(self.mode, expired.len());
                // Each purged joiner is told their wait came to nothing
                for entry in expired {
                    let notice = QueueExpiredNotice {
                        user_id: entry.user_id,
                        mode: self.mode,
                        enqueued_at: entry.enqueued_at,
                        expired_at: now,
                    };
                    if let Err(e) = self.publisher.publish_queue_expired(notice).await {
                        error!(mode = %self.mode, "Failed to publish queue expiry notice: {}", e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => error!(mode = %self.mode, "Expiry sweep failed: {}", e),
        }

        // Entries that were too far apart at join time become compatible as
        // their windows widen; the sweep picks those pairings up
        loop {
            match self.try_pair().await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    error!(mode = %self.mode, "Sweep pairing failed: {}", e);
                    break;
                }
            }
        }
        self.update_waiting_gauge();
    }

    fn update_waiting_gauge(&self) {
        if let Ok(waiting) = self.queue.len(self.mode) {
            self.metrics.set_players_waiting(self.mode, waiting);
        }
    }
}
