//! Share ledger
//!
//! An append-only, ordered record of every credit increment handed out by the
//! pool. The ledger answers two questions the cumulative per-farmer counters
//! can't: how much credit a farmer earned within a trailing time window (used
//! for difficulty retargeting) and how the most recent N credit-units are
//! split between farmers (used for PPLNS).

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::farmer::LauncherId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEntry {
    pub launcher_id: LauncherId,
    pub credit: u64,
    pub timestamp: SystemTime,
}

/// Source of per-farmer credit history.
#[mockall::automock]
pub trait CreditHistory {
    /// Credit earned by the farmer at or after `since`.
    fn credit_since(&self, launcher_id: &LauncherId, since: SystemTime) -> u64;
}

#[derive(Debug)]
pub struct ShareLedger {
    entries: Mutex<VecDeque<ShareEntry>>,
    retention: Duration,
}

impl ShareLedger {
    /// Entries younger than `retention` are never pruned.
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            retention,
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<ShareEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, launcher_id: LauncherId, credit: u64) {
        self.record_at(launcher_id, credit, SystemTime::now());
    }

    /// Append an entry. Insertion order is share order, regardless of `timestamp`.
    pub fn record_at(&self, launcher_id: LauncherId, credit: u64, timestamp: SystemTime) {
        if credit == 0 {
            return;
        }
        self.entries().push_back(ShareEntry {
            launcher_id,
            credit,
            timestamp,
        });
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn total(&self) -> u64 {
        self.entries()
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.credit))
    }

    /// Split of the most recent `n` credit-units between farmers.
    ///
    /// The oldest entry overlapping the window is clipped, so the values sum to
    /// `min(n, total())`.
    pub fn window(&self, n: u64) -> HashMap<LauncherId, u64> {
        let entries = self.entries();
        let mut remaining = n;
        let mut shares = HashMap::new();
        for entry in entries.iter().rev() {
            if remaining == 0 {
                break;
            }
            let take = entry.credit.min(remaining);
            *shares.entry(entry.launcher_id).or_insert(0u64) += take;
            remaining -= take;
        }
        shares
    }

    /// Drop old entries that no longer matter: older than the retention period
    /// and entirely outside the most recent `window` credit-units.
    /// Returns the number of entries removed.
    pub fn prune(&self, window: u64, now: SystemTime) -> usize {
        let mut entries = self.entries();

        let mut covered = 0u64;
        let mut in_window = 0usize;
        for entry in entries.iter().rev() {
            if covered >= window {
                break;
            }
            covered = covered.saturating_add(entry.credit);
            in_window += 1;
        }
        let outside = entries.len() - in_window;
        let cutoff = now.checked_sub(self.retention).unwrap_or(UNIX_EPOCH);

        let mut pruned = 0;
        while pruned < outside && entries.front().is_some_and(|e| e.timestamp < cutoff) {
            entries.pop_front();
            pruned += 1;
        }
        if pruned > 0 {
            log::debug!("pruned {pruned} share ledger entries");
        }
        pruned
    }
}

impl CreditHistory for ShareLedger {
    fn credit_since(&self, launcher_id: &LauncherId, since: SystemTime) -> u64 {
        self.entries()
            .iter()
            .filter(|e| e.launcher_id == *launcher_id && e.timestamp >= since)
            .fold(0u64, |acc, e| acc.saturating_add(e.credit))
    }
}
