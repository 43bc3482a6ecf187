//! Per-key debounce scheduler driven by explicit timestamps.

use std::collections::BTreeMap;

/// Collapses bursts of triggers per key into one deadline.
///
/// Arming a key replaces its pending deadline. Nothing fires on its own; the
/// owner calls [`DebounceScheduler::take_due`] with the current time.
#[derive(Debug, Clone)]
pub struct DebounceScheduler<K: Ord + Clone> {
    delay_ms: i64,
    deadlines: BTreeMap<K, i64>,
}

impl<K: Ord + Clone> DebounceScheduler<K> {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms: i64::try_from(delay_ms).unwrap_or(i64::MAX),
            deadlines: BTreeMap::new(),
        }
    }

    /// Arm `key` to fire one delay after `now_ms`.
    ///
    /// Returns whether a pending deadline was replaced.
    pub fn arm(&mut self, key: K, now_ms: i64) -> bool {
        self.arm_at(key, now_ms.saturating_add(self.delay_ms))
    }

    /// Arm `key` to fire at `due_at_ms`.
    pub fn arm_at(&mut self, key: K, due_at_ms: i64) -> bool {
        self.deadlines.insert(key, due_at_ms).is_some()
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    pub fn due_at(&self, key: &K) -> Option<i64> {
        self.deadlines.get(key).copied()
    }

    /// Earliest pending deadline.
    pub fn next_due(&self) -> Option<i64> {
        self.deadlines.values().min().copied()
    }

    pub fn has_due(&self, now_ms: i64) -> bool {
        self.deadlines.values().any(|due| *due <= now_ms)
    }

    /// Remove and return every key whose deadline has passed.
    pub fn take_due(&mut self, now_ms: i64) -> Vec<K> {
        let due: Vec<K> = self
            .deadlines
            .iter()
            .filter(|(_, due)| **due <= now_ms)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &due {
            self.deadlines.remove(key);
        }
        due
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
