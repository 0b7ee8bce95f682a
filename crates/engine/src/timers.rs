use std::collections::HashMap;
use std::time::Duration;

use crate::record::RecordId;

/// Identifies the one pending timer a branch prompt may own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    pub record_id: RecordId,
    pub branch_index: usize,
}

impl TimerKey {
    pub fn new(record_id: impl Into<RecordId>, branch_index: usize) -> Self {
        Self {
            record_id: record_id.into(),
            branch_index,
        }
    }
}

/// What a prompt timer does when it comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    HidePrompt,
    HidePromptAndResume,
}

/// A timer removed from the queue because its deadline passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTimer {
    pub key: TimerKey,
    pub action: TimerAction,
}

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    deadline: Duration,
    seq: u64,
    action: TimerAction,
}

/// One-shot timers keyed by `(record, branch)`.
///
/// Scheduling an existing key replaces it. Cancelling is a map removal, so a
/// cancelled timer can never fire later.
#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: HashMap<TimerKey, Scheduled>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, key: TimerKey, deadline: Duration, action: TimerAction) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key,
            Scheduled {
                deadline,
                seq,
                action,
            },
        );
    }

    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Cancels every timer scheduled against `record_id`.
    pub fn cancel_record(&mut self, record_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.record_id != record_id);
        before - self.entries.len()
    }

    pub fn clear(&mut self) -> usize {
        let cancelled = self.entries.len();
        self.entries.clear();
        cancelled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &TimerKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.entries.values().map(|entry| entry.deadline).min()
    }

    /// Removes and returns every timer due at `now`, earliest first.
    pub fn take_due(&mut self, now: Duration) -> Vec<DueTimer> {
        let mut due: Vec<(TimerKey, Scheduled)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(key, entry)| (key.clone(), *entry))
            .collect();
        due.sort_by_key(|(_, entry)| (entry.deadline, entry.seq));

        due.into_iter()
            .map(|(key, entry)| {
                self.entries.remove(&key);
                DueTimer {
                    key,
                    action: entry.action,
                }
            })
            .collect()
    }
}
