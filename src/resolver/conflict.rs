//! Arbitration of concurrent submissions and out-of-order verdicts
//!
//! The server-assigned `submitted_at` timestamp, recorded when a submission is
//! durably stored, is the only ordering authority. Everything here is a pure
//! recomputation over the append-only submission log: nothing is cached from a
//! client-observed order, so replaying a verdict can never double-count and
//! every function is safe to call on every change.

use crate::types::{ProblemId, ScoreLine, Submission, UserId};
use std::collections::HashMap;

/// Points credited for an accepted solve
pub const SOLVE_POINTS: i64 = 100;

/// Bonus for being first across the match to solve a problem
pub const FIRST_SOLVE_BONUS: i64 = 20;

/// The authoritative submission per (user, problem): the most recent by
/// server timestamp. Earlier submissions are superseded, not deleted; they
/// remain in the log as an audit trail but carry no scoring weight.
pub fn authoritative_submissions(submissions: &[Submission]) -> Vec<&Submission> {
    let mut latest: HashMap<(&str, &str), &Submission> = HashMap::new();
    for submission in submissions {
        let key = (submission.user_id.as_str(), submission.problem_id.as_str());
        match latest.get(&key) {
            Some(current) if current.submitted_at >= submission.submitted_at => {}
            _ => {
                latest.insert(key, submission);
            }
        }
    }

    let mut result: Vec<&Submission> = latest.into_values().collect();
    result.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
    result
}

/// First solve per problem: the earliest accepted authoritative submission,
/// strictly by server timestamp. Recomputed from the log whenever a verdict
/// lands, never carried over from a previous computation.
pub fn first_solves(submissions: &[Submission]) -> HashMap<ProblemId, UserId> {
    let mut firsts: HashMap<ProblemId, &Submission> = HashMap::new();
    for submission in authoritative_submissions(submissions) {
        if !submission.verdict.is_accepted() {
            continue;
        }
        match firsts.get(&submission.problem_id) {
            Some(current) if current.submitted_at <= submission.submitted_at => {}
            _ => {
                firsts.insert(submission.problem_id.clone(), submission);
            }
        }
    }

    firsts
        .into_iter()
        .map(|(problem, submission)| (problem, submission.user_id.clone()))
        .collect()
}

/// Full scoreboard recomputation for a set of participants.
///
/// Solved problems come from the authoritative submissions; first-solve
/// bonuses from `first_solves`. Output is sorted by score descending, then
/// user id, for deterministic presentation.
pub fn scoreboard(participants: &[UserId], submissions: &[Submission]) -> Vec<ScoreLine> {
    let firsts = first_solves(submissions);
    let authoritative = authoritative_submissions(submissions);

    let mut lines: Vec<ScoreLine> = participants
        .iter()
        .map(|user| {
            let mut solved: Vec<ProblemId> = authoritative
                .iter()
                .filter(|s| &s.user_id == user && s.verdict.is_accepted())
                .map(|s| s.problem_id.clone())
                .collect();
            solved.sort();

            let mut first: Vec<ProblemId> = firsts
                .iter()
                .filter(|(_, u)| *u == user)
                .map(|(p, _)| p.clone())
                .collect();
            first.sort();

            let score =
                solved.len() as i64 * SOLVE_POINTS + first.len() as i64 * FIRST_SOLVE_BONUS;

            ScoreLine {
                user_id: user.clone(),
                score,
                solved,
                first_solves: first,
            }
        })
        .collect();

    lines.sort_by(|a, b| b.score.cmp(&a.score).then(a.user_id.cmp(&b.user_id)));
    lines
}

/// Placements for a two-sided match from the scoreboard.
///
/// Each side's score is the sum of its members' scores; every member carries
/// the side's placement. An exact tie places both sides first (a draw).
pub fn placements_for_sides(
    sides: &[Vec<UserId>; 2],
    scoreboard: &[ScoreLine],
) -> Vec<(UserId, u32)> {
    let score_of = |user: &UserId| -> i64 {
        scoreboard
            .iter()
            .find(|line| &line.user_id == user)
            .map(|line| line.score)
            .unwrap_or(0)
    };

    let totals: Vec<i64> = sides
        .iter()
        .map(|side| side.iter().map(score_of).sum())
        .collect();

    let mut placements = Vec::new();
    for (idx, side) in sides.iter().enumerate() {
        let other = totals[1 - idx];
        let place = match totals[idx].cmp(&other) {
            std::cmp::Ordering::Greater => 1,
            std::cmp::Ordering::Equal => 1,
            std::cmp::Ordering::Less => 2,
        };
        for user in side {
            placements.push((user.clone(), place));
        }
    }
    placements
}
