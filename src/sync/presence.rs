//! Presence tracking from heartbeat recency
//!
//! Connection state is advisory: it informs the UI and the forfeiture timer,
//! but never gates submissions or scoring. A participant whose heartbeats
//! stop flips to disconnected after a fixed number of missed intervals; a
//! live match forfeits a side only after a much longer silence.

use crate::config::SyncSettings;
use crate::types::{ConnectionState, Participant, UserId};
use chrono::{DateTime, Duration, Utc};

/// Outcome of one presence sweep over a match's participants
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PresenceSweep {
    /// Participants whose advisory state should flip to disconnected
    pub disconnected: Vec<UserId>,
    /// Participants silent past the forfeiture threshold
    pub forfeit_candidates: Vec<UserId>,
}

/// Pure assessment of heartbeat recency against the configured thresholds
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    disconnect_after: Duration,
    forfeit_after: Duration,
}

impl PresenceTracker {
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            disconnect_after: Duration::seconds(
                (settings.heartbeat_interval_seconds
                    * settings.missed_heartbeats_disconnect as u64) as i64,
            ),
            forfeit_after: Duration::seconds(settings.forfeit_after_seconds as i64),
        }
    }

    /// Assess all participants at `now`. Only reports transitions: a
    /// participant already marked disconnected is not reported again, but
    /// still counts toward forfeiture.
    pub fn sweep(&self, participants: &[Participant], now: DateTime<Utc>) -> PresenceSweep {
        let mut outcome = PresenceSweep::default();

        for participant in participants {
            let silence = now - participant.last_heartbeat_at;

            if silence > self.disconnect_after
                && participant.connection_state != ConnectionState::Disconnected
            {
                outcome.disconnected.push(participant.user_id.clone());
            }
            if silence > self.forfeit_after {
                outcome.forfeit_candidates.push(participant.user_id.clone());
            }
        }

        outcome
    }

    pub fn disconnect_after(&self) -> Duration {
        self.disconnect_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{current_timestamp, generate_match_id};

    fn tracker() -> PresenceTracker {
        // 5s heartbeats, 3 missed => disconnect after 15s, forfeit after 120s
        PresenceTracker::new(&SyncSettings::default())
    }

    fn participant(user: &str, silent_for: Duration, state: ConnectionState) -> Participant {
        Participant {
            match_id: generate_match_id(),
            user_id: user.to_string(),
            connection_state: state,
            last_heartbeat_at: current_timestamp() - silent_for,
            score: 0,
            submissions: vec![],
        }
    }

    #[test]
    fn test_fresh_heartbeat_keeps_connected() {
        let sweep = tracker().sweep(
            &[participant(
                "alice",
                Duration::seconds(4),
                ConnectionState::Connected,
            )],
            current_timestamp(),
        );
        assert!(sweep.disconnected.is_empty());
        assert!(sweep.forfeit_candidates.is_empty());
    }

    #[test]
    fn test_three_missed_intervals_disconnects() {
        let sweep = tracker().sweep(
            &[participant(
                "alice",
                Duration::seconds(16),
                ConnectionState::Connected,
            )],
            current_timestamp(),
        );
        assert_eq!(sweep.disconnected, vec!["alice".to_string()]);
        assert!(sweep.forfeit_candidates.is_empty());
    }

    #[test]
    fn test_already_disconnected_not_reported_again() {
        let sweep = tracker().sweep(
            &[participant(
                "alice",
                Duration::seconds(30),
                ConnectionState::Disconnected,
            )],
            current_timestamp(),
        );
        assert!(sweep.disconnected.is_empty());
    }

    #[test]
    fn test_long_silence_is_a_forfeit_candidate() {
        let sweep = tracker().sweep(
            &[participant(
                "alice",
                Duration::seconds(121),
                ConnectionState::Disconnected,
            )],
            current_timestamp(),
        );
        assert_eq!(sweep.forfeit_candidates, vec!["alice".to_string()]);
    }

    #[test]
    fn test_reconnecting_participant_can_disconnect_again() {
        let sweep = tracker().sweep(
            &[participant(
                "alice",
                Duration::seconds(20),
                ConnectionState::Reconnecting,
            )],
            current_timestamp(),
        );
        assert_eq!(sweep.disconnected, vec!["alice".to_string()]);
    }
}
