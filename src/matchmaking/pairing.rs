//! Rating-window pairing over the waiting lists
//!
//! Pure functions: the per-mode worker feeds them a snapshot of its waiting
//! list and acts on the result. An entry's tolerance window widens linearly
//! with its time in queue; two entries are compatible when their rating gap
//! fits inside the wider of their two windows, so a long-waiting player can
//! reach a fresh one even before the newcomer's own window has grown.

use crate::config::MatchmakingSettings;
use crate::types::{QueueEntry, UserId};
use crate::utils::rating_difference;
use chrono::{DateTime, Duration, Utc};

/// Tolerance window for an entry that has waited `waited`, growing linearly
/// from the initial window to the maximum over the growth period.
pub fn window_at(settings: &MatchmakingSettings, waited: Duration) -> i32 {
    let growth_ms = (settings.window_growth_seconds * 1000) as f64;
    let waited_ms = (waited.num_milliseconds().max(0) as f64).min(growth_ms);
    let span = (settings.max_window - settings.initial_window) as f64;
    settings.initial_window + (span * waited_ms / growth_ms).round() as i32
}

/// Whether two entries can be matched at `now`.
pub fn compatible(
    settings: &MatchmakingSettings,
    a: &QueueEntry,
    b: &QueueEntry,
    now: DateTime<Utc>,
) -> bool {
    let window = window_at(settings, a.waited(now)).max(window_at(settings, b.waited(now)));
    rating_difference(a.rating, b.rating) <= window
}

/// Find a full group of `2 * team_size` entries to form a match.
///
/// The pool is scanned in enqueue order: the longest-waiting entry that can
/// gather enough compatible partners anchors the group, which keeps
/// first-come-first-served behavior among equally eligible entries. Team
/// groups are additionally rejected when the drafted sides' average ratings
/// fall outside the anchor's window.
pub fn find_group<'a>(
    settings: &MatchmakingSettings,
    pool: &'a [QueueEntry],
    team_size: usize,
    now: DateTime<Utc>,
) -> Option<Vec<&'a QueueEntry>> {
    let needed = team_size * 2;
    if pool.len() < needed {
        return None;
    }

    for (i, anchor) in pool.iter().enumerate() {
        let mut group: Vec<&QueueEntry> = vec![anchor];
        for (j, candidate) in pool.iter().enumerate() {
            if j == i {
                continue;
            }
            if compatible(settings, anchor, candidate, now) {
                group.push(candidate);
                if group.len() == needed {
                    break;
                }
            }
        }
        if group.len() < needed {
            continue;
        }
        if team_size == 1 {
            return Some(group);
        }

        let sides = snake_draft(&group);
        let averages: Vec<f64> = sides
            .iter()
            .map(|side| side_average(&group, side))
            .collect();
        let gap = (averages[0] - averages[1]).abs().round() as i32;
        if gap <= window_at(settings, anchor.waited(now)) {
            return Some(group);
        }
    }
    None
}

fn side_average(group: &[&QueueEntry], side: &[UserId]) -> f64 {
    let ratings: Vec<i32> = side
        .iter()
        .filter_map(|user| group.iter().find(|e| &e.user_id == user).map(|e| e.rating))
        .collect();
    if ratings.is_empty() {
        return 0.0;
    }
    ratings.iter().sum::<i32>() as f64 / ratings.len() as f64
}

/// Split a group into two sides by snake draft.
///
/// Players are ordered by rating descending and dealt in alternating
/// direction each round (A B, B A, A B, ...), which for six players yields
/// the pick sequence A B B A A B and near-equal side strength.
pub fn snake_draft(group: &[&QueueEntry]) -> [Vec<UserId>; 2] {
    let mut ordered: Vec<&QueueEntry> = group.to_vec();
    ordered.sort_by(|a, b| b.rating.cmp(&a.rating).then(a.user_id.cmp(&b.user_id)));

    let mut sides: [Vec<UserId>; 2] = [Vec::new(), Vec::new()];
    for (round, pair) in ordered.chunks(2).enumerate() {
        let (first, second) = if round % 2 == 0 { (0, 1) } else { (1, 0) };
        if let Some(entry) = pair.first() {
            sides[first].push(entry.user_id.clone());
        }
        if let Some(entry) = pair.get(1) {
            sides[second].push(entry.user_id.clone());
        }
    }
    sides
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Mode;
    use crate::utils::current_timestamp;

    fn settings() -> MatchmakingSettings {
        MatchmakingSettings::default()
    }

    fn entry(user: &str, rating: i32, waited_secs: i64) -> QueueEntry {
        QueueEntry {
            user_id: user.to_string(),
            mode: Mode::Ranked1v1,
            rating,
            enqueued_at: current_timestamp() - Duration::seconds(waited_secs),
            team_id: None,
        }
    }

    #[test]
    fn test_window_growth_is_linear() {
        let s = settings();
        assert_eq!(window_at(&s, Duration::seconds(0)), 50);
        assert_eq!(window_at(&s, Duration::seconds(30)), 225);
        assert_eq!(window_at(&s, Duration::seconds(60)), 400);
        // Clamped past the growth period
        assert_eq!(window_at(&s, Duration::seconds(600)), 400);
    }

    #[test]
    fn test_fresh_entries_need_close_ratings() {
        let s = settings();
        let now = current_timestamp();
        assert!(compatible(&s, &entry("a", 1500, 0), &entry("b", 1549, 0), now));
        assert!(!compatible(&s, &entry("a", 1500, 0), &entry("b", 1551, 0), now));
    }

    #[test]
    fn test_wider_of_two_windows_applies() {
        let s = settings();
        let now = current_timestamp();
        // 200 apart: outside both fresh windows, inside the veteran's
        let veteran = entry("a", 1500, 60);
        let newcomer = entry("b", 1700, 0);
        assert!(compatible(&s, &veteran, &newcomer, now));
    }

    #[test]
    fn test_find_group_prefers_longest_waiting_anchor() {
        let s = settings();
        let now = current_timestamp();
        let pool = vec![
            entry("old", 1500, 40),
            entry("mid", 1510, 10),
            entry("new", 1505, 0),
        ];
        let group = find_group(&s, &pool, 1, now).unwrap();
        assert_eq!(group[0].user_id, "old");
        assert_eq!(group[1].user_id, "mid");
    }

    #[test]
    fn test_find_group_empty_when_no_window_fits() {
        let s = settings();
        let now = current_timestamp();
        let pool = vec![entry("a", 1000, 0), entry("b", 2000, 0)];
        assert!(find_group(&s, &pool, 1, now).is_none());
    }

    #[test]
    fn test_snake_draft_balances_sides() {
        let entries: Vec<QueueEntry> = [
            ("p1", 1800),
            ("p2", 1700),
            ("p3", 1600),
            ("p4", 1500),
            ("p5", 1400),
            ("p6", 1300),
        ]
        .iter()
        .map(|(u, r)| entry(u, *r, 0))
        .collect();
        let group: Vec<&QueueEntry> = entries.iter().collect();

        let sides = snake_draft(&group);
        // Pick order A B B A A B on descending rating
        assert_eq!(sides[0], vec!["p1", "p4", "p5"]);
        assert_eq!(sides[1], vec!["p2", "p3", "p6"]);

        let total = |side: &Vec<UserId>| -> i32 {
            side.iter()
                .map(|u| group.iter().find(|e| &e.user_id == u).unwrap().rating)
                .sum()
        };
        assert_eq!((total(&sides[0]) - total(&sides[1])).abs(), 100);
    }

    #[test]
    fn test_find_team_group_needs_six() {
        let s = settings();
        let now = current_timestamp();
        let pool: Vec<QueueEntry> = (0..5).map(|i| entry(&format!("p{}", i), 1500, 0)).collect();
        assert!(find_group(&s, &pool, 3, now).is_none());

        let pool: Vec<QueueEntry> = (0..6).map(|i| entry(&format!("p{}", i), 1500, 0)).collect();
        let group = find_group(&s, &pool, 3, now).unwrap();
        assert_eq!(group.len(), 6);
    }
}
