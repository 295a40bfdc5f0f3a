//! Elo rating calculations
//!
//! Computes rating deltas from match outcomes: classic pairwise Elo for 1v1
//! and an N-way extension for multi-player rankings where each participant is
//! scored against every opponent. Deltas are rounded per player, so aggregate
//! drift of a point per pair is possible and accepted; exact zero-sum is not
//! enforced.

use crate::config::RatingSettings;
use crate::error::{ArenaError, Result};
use crate::types::{Mode, RatingChange, RatingRecord, Tier, UserId};

/// Outcome of a pairwise match from one player's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    Win,
    Loss,
    Draw,
}

impl PairOutcome {
    fn actual_score(&self) -> f64 {
        match self {
            PairOutcome::Win => 1.0,
            PairOutcome::Loss => 0.0,
            PairOutcome::Draw => 0.5,
        }
    }

    fn inverse(&self) -> Self {
        match self {
            PairOutcome::Win => PairOutcome::Loss,
            PairOutcome::Loss => PairOutcome::Win,
            PairOutcome::Draw => PairOutcome::Draw,
        }
    }
}

/// Elo rating engine with per-mode K-factors
#[derive(Debug, Clone)]
pub struct EloEngine {
    config: RatingSettings,
}

impl EloEngine {
    pub fn new(config: RatingSettings) -> Self {
        Self { config }
    }

    /// Baseline elo for players without a rating record.
    pub fn baseline_elo(&self) -> i32 {
        self.config.baseline_elo
    }

    fn k_for(&self, mode: Mode) -> f64 {
        match mode {
            Mode::Quick1v1 => self.config.k_quick,
            Mode::Ranked1v1 => self.config.k_ranked,
            Mode::Team3v3 => self.config.k_team,
        }
    }

    /// Expected score of `a` against `b`: 1 / (1 + 10^((R_b - R_a)/400)).
    pub fn expected_score(rating_a: i32, rating_b: i32) -> f64 {
        1.0 / (1.0 + 10f64.powf((rating_b as f64 - rating_a as f64) / 400.0))
    }

    /// Rating deltas for a pairwise match, from player a's perspective.
    pub fn rate_pair(
        &self,
        mode: Mode,
        rating_a: i32,
        rating_b: i32,
        outcome_for_a: PairOutcome,
    ) -> (i32, i32) {
        let k = self.k_for(mode);
        let delta_a = (k * (outcome_for_a.actual_score() - Self::expected_score(rating_a, rating_b)))
            .round() as i32;
        let delta_b = (k
            * (outcome_for_a.inverse().actual_score() - Self::expected_score(rating_b, rating_a)))
        .round() as i32;
        (delta_a, delta_b)
    }

    /// Rating changes for an N-way ranking (placement 1 = first).
    ///
    /// Each participant's actual score is the sum of pairwise results against
    /// every opponent (1 for a better placement, 0.5 for a tied one, 0 for a
    /// worse one) normalized by N-1; for distinct placements this reduces to
    /// (N - placement) / (N - 1). The expected score is the mean of pairwise
    /// expectations against every opponent. Team battles are scored
    /// per-individual with the team's shared placement.
    pub fn rate_ranking(
        &self,
        mode: Mode,
        participants: &[(UserId, i32)],
        placements: &[(UserId, u32)],
    ) -> Result<Vec<RatingChange>> {
        if participants.len() < 2 {
            return Err(ArenaError::InternalError {
                message: "Rating calculation needs at least two participants".to_string(),
            }
            .into());
        }

        let placement_of = |user: &str| -> Result<u32> {
            placements
                .iter()
                .find(|(id, _)| id == user)
                .map(|(_, p)| *p)
                .ok_or_else(|| {
                    ArenaError::InternalError {
                        message: format!("No placement for participant {}", user),
                    }
                    .into()
                })
        };

        let k = self.k_for(mode);
        let n = participants.len() as f64;
        let mut changes = Vec::with_capacity(participants.len());

        for (user, rating) in participants {
            let place = placement_of(user)?;

            let mut actual_sum = 0.0;
            let mut expected_sum = 0.0;
            for (other, other_rating) in participants {
                if other == user {
                    continue;
                }
                let other_place = placement_of(other)?;
                actual_sum += match place.cmp(&other_place) {
                    std::cmp::Ordering::Less => 1.0,
                    std::cmp::Ordering::Equal => 0.5,
                    std::cmp::Ordering::Greater => 0.0,
                };
                expected_sum += Self::expected_score(*rating, *other_rating);
            }

            let actual = actual_sum / (n - 1.0);
            let expected = expected_sum / (n - 1.0);
            let delta = (k * (actual - expected)).round() as i32;

            changes.push(RatingChange {
                user_id: user.clone(),
                old_elo: *rating,
                new_elo: *rating + delta,
                delta,
                placement: place,
            });
        }

        Ok(changes)
    }

    /// Fold a completed match into a rating record: elo, tier, counters and
    /// win streak (streak resets on loss, is untouched by a draw).
    pub fn apply_change(record: &mut RatingRecord, change: &RatingChange, placements: &[(UserId, u32)]) {
        let best = placements.iter().map(|(_, p)| *p).min().unwrap_or(1);
        let drew = placements
            .iter()
            .all(|(_, p)| *p == placements[0].1);
        let won = !drew && change.placement == best;

        record.elo = change.new_elo;
        record.tier = Tier::from_elo(record.elo);
        record.matches_played += 1;
        if won {
            record.matches_won += 1;
            record.current_win_streak += 1;
        } else if !drew {
            record.current_win_streak = 0;
        }
    }
}
