//! In-memory queue store with per-mode waiting lists
//!
//! The store owns every pending `QueueEntry`. Entries are created on join and
//! removed on pairing success, explicit leave, or TTL expiry. Removal for
//! pairing uses compare-and-remove semantics so an entry can never be consumed
//! by two concurrent pairing attempts.

use crate::error::{ArenaError, Result};
use crate::types::{Mode, QueueEntry, UserId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// Shared per-mode waiting lists, kept in enqueue order
#[derive(Debug, Default)]
pub struct QueueStore {
    lists: RwLock<HashMap<Mode, Vec<QueueEntry>>>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_list<T>(&self, mode: Mode, f: impl FnOnce(&[QueueEntry]) -> T) -> Result<T> {
        let lists = self.lists.read().map_err(|_| ArenaError::InternalError {
            message: "Failed to acquire queue store lock".to_string(),
        })?;
        Ok(f(lists.get(&mode).map(|l| l.as_slice()).unwrap_or(&[])))
    }

    fn with_list_mut<T>(&self, mode: Mode, f: impl FnOnce(&mut Vec<QueueEntry>) -> T) -> Result<T> {
        let mut lists = self.lists.write().map_err(|_| ArenaError::InternalError {
            message: "Failed to acquire queue store lock".to_string(),
        })?;
        Ok(f(lists.entry(mode).or_default()))
    }

    /// Insert a new entry. Rejects a second live entry for the same
    /// (user, mode) with `AlreadyQueued`. Entries keep enqueue order; a
    /// re-queued entry with an older `enqueued_at` slots back into place.
    pub fn insert(&self, entry: QueueEntry) -> Result<()> {
        self.with_list_mut(entry.mode, |list| {
            if list.iter().any(|e| e.user_id == entry.user_id) {
                return Err(ArenaError::AlreadyQueued {
                    user_id: entry.user_id.clone(),
                    mode: entry.mode.to_string(),
                }
                .into());
            }
            let pos = list
                .iter()
                .position(|e| e.enqueued_at > entry.enqueued_at)
                .unwrap_or(list.len());
            list.insert(pos, entry);
            Ok(())
        })?
    }

    /// Remove a user's entry. Idempotent: returns whether an entry existed.
    pub fn remove(&self, mode: Mode, user_id: &str) -> Result<bool> {
        self.with_list_mut(mode, |list| {
            let before = list.len();
            list.retain(|e| e.user_id != user_id);
            before != list.len()
        })
    }

    /// Atomically consume a set of entries for pairing.
    ///
    /// Succeeds only if every named user still has a live entry; otherwise
    /// nothing is removed and `PairingRace` is returned so the caller can
    /// re-scan. This is the invariant that makes "a QueueEntry is consumed
    /// exactly once" hold under concurrent pairing attempts.
    pub fn take_entries(&self, mode: Mode, user_ids: &[UserId]) -> Result<Vec<QueueEntry>> {
        self.with_list_mut(mode, |list| {
            let all_present = user_ids
                .iter()
                .all(|id| list.iter().any(|e| &e.user_id == id));
            if !all_present {
                return Err(ArenaError::PairingRace {
                    mode: mode.to_string(),
                }
                .into());
            }

            let mut taken = Vec::with_capacity(user_ids.len());
            for id in user_ids {
                let pos = list.iter().position(|e| &e.user_id == id).unwrap();
                taken.push(list.remove(pos));
            }
            Ok(taken)
        })?
    }

    /// Snapshot of the waiting list in enqueue order (read-only, no blocking
    /// of concurrent pairing beyond the brief read lock).
    pub fn snapshot(&self, mode: Mode) -> Result<Vec<QueueEntry>> {
        self.with_list(mode, |list| list.to_vec())
    }

    /// Number of waiting entries for a mode.
    pub fn len(&self, mode: Mode) -> Result<usize> {
        self.with_list(mode, |list| list.len())
    }

    pub fn is_empty(&self, mode: Mode) -> Result<bool> {
        Ok(self.len(mode)? == 0)
    }

    /// Average wait of current entries, in milliseconds.
    pub fn avg_wait_ms(&self, mode: Mode, now: DateTime<Utc>) -> Result<u64> {
        self.with_list(mode, |list| {
            if list.is_empty() {
                return 0;
            }
            let total: i64 = list
                .iter()
                .map(|e| (now - e.enqueued_at).num_milliseconds().max(0))
                .sum();
            (total / list.len() as i64) as u64
        })
    }

    /// Remove and return entries older than `ttl`.
    pub fn purge_expired(&self, mode: Mode, ttl: Duration, now: DateTime<Utc>) -> Result<Vec<QueueEntry>> {
        self.with_list_mut(mode, |list| {
            let mut expired = Vec::new();
            list.retain(|e| {
                if now - e.enqueued_at > ttl {
                    expired.push(e.clone());
                    false
                } else {
                    true
                }
            });
            expired
        })
    }
}
