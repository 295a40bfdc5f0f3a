//! Integration tests for the arena service
//!
//! These tests wire the full dependency graph (queue workers, match store,
//! event bus, sync coordinator) around a mock notice publisher and exercise
//! the system end to end: queueing and pairing, acknowledgment, live match
//! play, completion with rating settlement, and reconnect reconciliation.

use algo_arena::amqp::publisher::MockNoticePublisher;
use algo_arena::config::AppConfig;
use algo_arena::error::ArenaError;
use algo_arena::resolver;
use algo_arena::service::AppState;
use algo_arena::types::{
    JoinOutcome, MatchId, MatchOutcome, MatchStatus, Mode, Verdict,
};
use std::sync::Arc;

struct TestSystem {
    app: Arc<AppState>,
    publisher: Arc<MockNoticePublisher>,
}

fn create_test_system() -> TestSystem {
    let publisher = Arc::new(MockNoticePublisher::new());
    let app = Arc::new(
        AppState::with_publisher(AppConfig::default(), publisher.clone(), None)
            .expect("Failed to wire test system"),
    );
    TestSystem { app, publisher }
}

/// Queue two players, acknowledge on both sides and return the started match.
async fn start_1v1(system: &TestSystem, mode: Mode, a: &str, b: &str) -> MatchId {
    let matchmaking = system.app.matchmaking();

    let first = matchmaking.join(mode, a, None).await.unwrap();
    assert!(matches!(first, JoinOutcome::Waiting));

    let match_id = match matchmaking.join(mode, b, None).await.unwrap() {
        JoinOutcome::Matched { match_id } => match_id,
        JoinOutcome::Waiting => panic!("Second join should have paired"),
    };

    matchmaking.acknowledge(match_id, a).await.unwrap();
    matchmaking.acknowledge(match_id, b).await.unwrap();

    let record = system.app.store().get_match(match_id).await.unwrap();
    assert_eq!(record.status, MatchStatus::InProgress);
    match_id
}

#[tokio::test]
async fn test_complete_ranked_match_workflow() {
    let system = create_test_system();
    let match_id = start_1v1(&system, Mode::Ranked1v1, "alice", "bob").await;
    let coordinator = system.app.coordinator();

    // Alice solves the whole set, which ends the match early
    let record = system.app.store().get_match(match_id).await.unwrap();
    for problem in &record.problem_set {
        let submission = coordinator.submit(match_id, "alice", problem).await.unwrap();
        assert_eq!(submission.verdict, Verdict::Pending);
        coordinator
            .record_verdict(match_id, submission.id, Verdict::Accepted)
            .await
            .unwrap();
    }

    let record = system.app.store().get_match(match_id).await.unwrap();
    assert_eq!(record.status, MatchStatus::Completed);
    let outcome = record.outcome.unwrap();
    assert!(!outcome.walkover);
    assert_eq!(outcome.placement_of("alice"), Some(1));
    assert_eq!(outcome.placement_of("bob"), Some(2));

    // Two unrated players at the 1200 baseline with K=32 settle at +/-16
    let store = system.app.store();
    let alice = store.rating("alice", Mode::Ranked1v1).await.unwrap().unwrap();
    let bob = store.rating("bob", Mode::Ranked1v1).await.unwrap().unwrap();
    assert_eq!(alice.elo, 1216);
    assert_eq!(bob.elo, 1184);
    assert_eq!(alice.matches_won, 1);
    assert_eq!(bob.matches_won, 0);

    let notices = system.publisher.published_notices();
    assert!(notices.contains(&"match.started".to_string()));
    assert!(notices.contains(&"match.submission".to_string()));
    assert!(notices.contains(&"match.verdict".to_string()));
    assert!(notices.contains(&"match.ended".to_string()));
}

#[tokio::test]
async fn test_quick_matches_use_half_k_factor() {
    let system = create_test_system();
    let match_id = start_1v1(&system, Mode::Quick1v1, "carol", "dave").await;
    let coordinator = system.app.coordinator();

    let record = system.app.store().get_match(match_id).await.unwrap();
    for problem in &record.problem_set {
        let s = coordinator.submit(match_id, "carol", problem).await.unwrap();
        coordinator
            .record_verdict(match_id, s.id, Verdict::Accepted)
            .await
            .unwrap();
    }

    let carol = system
        .app
        .store()
        .rating("carol", Mode::Quick1v1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(carol.elo, 1208);
}

#[tokio::test]
async fn test_queue_leave_is_idempotent() {
    let system = create_test_system();
    let matchmaking = system.app.matchmaking();

    matchmaking.join(Mode::Ranked1v1, "alice", None).await.unwrap();
    assert!(matchmaking.leave(Mode::Ranked1v1, "alice").await.unwrap());
    assert!(!matchmaking.leave(Mode::Ranked1v1, "alice").await.unwrap());

    let status = matchmaking.status(Mode::Ranked1v1).await.unwrap();
    assert_eq!(status.waiting, 0);
}

#[tokio::test]
async fn test_duplicate_join_is_rejected() {
    let system = create_test_system();
    let matchmaking = system.app.matchmaking();

    matchmaking.join(Mode::Ranked1v1, "alice", None).await.unwrap();
    let err = matchmaking
        .join(Mode::Ranked1v1, "alice", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ArenaError>(),
        Some(ArenaError::AlreadyQueued { .. })
    ));
}

#[tokio::test]
async fn test_participant_in_live_match_cannot_requeue() {
    let system = create_test_system();
    let match_id = start_1v1(&system, Mode::Ranked1v1, "alice", "bob").await;
    assert!(system.app.coordinator().is_live(match_id).await);

    let err = system
        .app
        .matchmaking()
        .join(Mode::Ranked1v1, "alice", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ArenaError>(),
        Some(ArenaError::AlreadyInMatch { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_joins_consume_each_entry_once() {
    let system = create_test_system();
    let matchmaking = system.app.matchmaking();

    let mut handles = Vec::new();
    for i in 0..10 {
        let matchmaking = matchmaking.clone();
        handles.push(tokio::spawn(async move {
            matchmaking
                .join(Mode::Quick1v1, &format!("player_{}", i), None)
                .await
        }));
    }

    let mut matched = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap().unwrap() {
            JoinOutcome::Matched { .. } => matched += 1,
            JoinOutcome::Waiting => {}
        }
    }

    // Ten compatible players form exactly five matches; every queue entry is
    // consumed exactly once
    assert_eq!(matched, 5);
    let status = matchmaking.status(Mode::Quick1v1).await.unwrap();
    assert_eq!(status.waiting, 0);
    assert_eq!(system.app.coordinator().live_matches().await, 0);
}

#[tokio::test]
async fn test_team_mode_pairs_six_players() {
    let system = create_test_system();
    let matchmaking = system.app.matchmaking();

    let mut match_id = None;
    for i in 0..6 {
        match matchmaking
            .join(Mode::Team3v3, &format!("team_player_{}", i), None)
            .await
            .unwrap()
        {
            JoinOutcome::Matched { match_id: id } => match_id = Some(id),
            JoinOutcome::Waiting => {}
        }
    }
    let match_id = match_id.expect("Sixth join should have formed a team match");

    let record = system.app.store().get_match(match_id).await.unwrap();
    assert_eq!(record.sides[0].len(), 3);
    assert_eq!(record.sides[1].len(), 3);
    assert_eq!(record.status, MatchStatus::Waiting);
}

#[tokio::test]
async fn test_walkover_on_leave_and_terminal_snapshot() {
    let system = create_test_system();
    let match_id = start_1v1(&system, Mode::Ranked1v1, "alice", "bob").await;
    let coordinator = system.app.coordinator();

    coordinator.leave(match_id, "bob").await.unwrap();

    let record = system.app.store().get_match(match_id).await.unwrap();
    assert_eq!(record.status, MatchStatus::Completed);
    let outcome = record.outcome.clone().unwrap();
    assert!(outcome.walkover);
    assert_eq!(outcome.placement_of("alice"), Some(1));

    // Terminal matches stay queryable through the snapshot path
    let snapshot = coordinator.snapshot(match_id, None).await.unwrap();
    assert_eq!(snapshot.record.status, MatchStatus::Completed);
    assert!(snapshot.record.outcome.is_some());
}

#[tokio::test]
async fn test_completion_is_idempotent() {
    let system = create_test_system();
    let match_id = start_1v1(&system, Mode::Ranked1v1, "alice", "bob").await;
    let coordinator = system.app.coordinator();

    coordinator.leave(match_id, "bob").await.unwrap();
    let record = system.app.store().get_match(match_id).await.unwrap();
    let outcome = record.outcome.clone().unwrap();
    let alice_before = system
        .app
        .store()
        .rating("alice", Mode::Ranked1v1)
        .await
        .unwrap()
        .unwrap();

    // A replayed completion is a no-op and never re-applies rating changes
    let applied = system
        .app
        .store()
        .apply_completion(
            match_id,
            MatchOutcome {
                placements: outcome.placements.clone(),
                walkover: true,
            },
            Vec::new(),
        )
        .await
        .unwrap();
    assert!(!applied);

    let alice_after = system
        .app
        .store()
        .rating("alice", Mode::Ranked1v1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alice_before.elo, alice_after.elo);
    assert_eq!(alice_before.matches_played, alice_after.matches_played);
}

#[tokio::test]
async fn test_first_solve_goes_to_earliest_server_timestamp() {
    let system = create_test_system();
    let match_id = start_1v1(&system, Mode::Ranked1v1, "alice", "bob").await;
    let coordinator = system.app.coordinator();

    let record = system.app.store().get_match(match_id).await.unwrap();
    let problem = record.problem_set[0].clone();

    // Arrival order at the server decides the first solve, regardless of
    // which verdict lands first
    let first = coordinator.submit(match_id, "alice", &problem).await.unwrap();
    let second = coordinator.submit(match_id, "bob", &problem).await.unwrap();
    assert!(first.submitted_at < second.submitted_at);

    coordinator
        .record_verdict(match_id, second.id, Verdict::Accepted)
        .await
        .unwrap();
    coordinator
        .record_verdict(match_id, first.id, Verdict::Accepted)
        .await
        .unwrap();

    let snapshot = coordinator.snapshot(match_id, None).await.unwrap();
    let alice = snapshot
        .scoreboard
        .iter()
        .find(|l| l.user_id == "alice")
        .unwrap();
    let bob = snapshot
        .scoreboard
        .iter()
        .find(|l| l.user_id == "bob")
        .unwrap();
    assert_eq!(alice.first_solves, vec![problem.clone()]);
    assert!(bob.first_solves.is_empty());
    assert!(alice.score > bob.score);
}

#[tokio::test]
async fn test_resubmission_supersedes_earlier_attempt() {
    let system = create_test_system();
    let match_id = start_1v1(&system, Mode::Ranked1v1, "alice", "bob").await;
    let coordinator = system.app.coordinator();

    let record = system.app.store().get_match(match_id).await.unwrap();
    let problem = record.problem_set[0].clone();

    let rejected = coordinator.submit(match_id, "alice", &problem).await.unwrap();
    coordinator
        .record_verdict(match_id, rejected.id, Verdict::WrongAnswer)
        .await
        .unwrap();
    let accepted = coordinator.submit(match_id, "alice", &problem).await.unwrap();
    coordinator
        .record_verdict(match_id, accepted.id, Verdict::Accepted)
        .await
        .unwrap();

    // Both attempts stay in the log; only the latest counts
    let snapshot = coordinator.snapshot(match_id, None).await.unwrap();
    assert_eq!(snapshot.submissions.len(), 2);
    let alice = snapshot
        .scoreboard
        .iter()
        .find(|l| l.user_id == "alice")
        .unwrap();
    assert_eq!(alice.solved, vec![problem]);
}

#[tokio::test]
async fn test_snapshot_agrees_with_recomputed_scoreboard() {
    let system = create_test_system();
    let match_id = start_1v1(&system, Mode::Ranked1v1, "alice", "bob").await;
    let coordinator = system.app.coordinator();

    let record = system.app.store().get_match(match_id).await.unwrap();
    let s1 = coordinator
        .submit(match_id, "alice", &record.problem_set[0])
        .await
        .unwrap();
    coordinator
        .record_verdict(match_id, s1.id, Verdict::Accepted)
        .await
        .unwrap();
    let s2 = coordinator
        .submit(match_id, "bob", &record.problem_set[1])
        .await
        .unwrap();
    coordinator
        .record_verdict(match_id, s2.id, Verdict::TimeLimitExceeded)
        .await
        .unwrap();

    // A client reconciling from the snapshot and one replaying the durable
    // log must converge on the same scoreboard
    let snapshot = coordinator.snapshot(match_id, None).await.unwrap();
    let users = vec!["alice".to_string(), "bob".to_string()];
    let replayed = resolver::scoreboard(&users, &snapshot.submissions);
    assert_eq!(snapshot.scoreboard, replayed);
}
